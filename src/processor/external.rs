use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Invocation, ItemProcessor, ProcessOutput};
use crate::config::ProcessorConfig;
use crate::error::ExecutionError;

/// Runs an external executable once per item.
///
/// The command line is
/// `<program> <args...> --samples-config <path> --output-dir <dir> --max-workers <n>`.
/// A non-zero exit status is a failure. When a timeout is set, the child is
/// killed once it elapses.
#[derive(Debug, Clone)]
pub struct ExternalProcessor {
    program: OsString,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ExternalProcessor {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            program: config.program.clone().into(),
            args: config.args.iter().map(OsString::from).collect(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
        }
    }

    /// Arguments placed before the fixed per-item flags (e.g. a script path).
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    fn command(&self, invocation: &Invocation<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--samples-config")
            .arg(invocation.config_path)
            .arg("--output-dir")
            .arg(invocation.output_dir)
            .arg("--max-workers")
            .arg(invocation.max_workers.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl ItemProcessor for ExternalProcessor {
    async fn execute(&self, invocation: &Invocation<'_>) -> Result<ProcessOutput, ExecutionError> {
        let mut command = self.command(invocation);
        info!(item = invocation.item_id, command = ?command.as_std(), "Executing processor");

        let child = command.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ExecutionError::ExecutableNotFound {
                    program: self.program.to_string_lossy().into_owned(),
                }
            } else {
                ExecutionError::Io(e)
            }
        })?;

        // Dropping the wait future drops the child, and kill_on_drop reaps it.
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecutionError::TimedOut(limit))??,
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ExecutionError::ProcessorFailed {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        debug!(item = invocation.item_id, stdout = %stdout, "Processor stdout");
        if !stderr.trim().is_empty() {
            warn!(item = invocation.item_id, stderr = %stderr, "Processor wrote to stderr");
        }
        Ok(ProcessOutput { stdout, stderr })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::item::{ItemConfig, ItemDetails};
    use std::path::Path;
    use tempfile::TempDir;

    fn run(processor: &ExternalProcessor, dir: &Path) -> Result<ProcessOutput, ExecutionError> {
        let config = ItemConfig::from_details("s1", &ItemDetails::default()).unwrap();
        let config_path = dir.join("samples.yaml");
        std::fs::write(&config_path, "- name: s1\n").unwrap();
        let invocation = Invocation {
            item_id: "s1",
            config: &config,
            config_path: &config_path,
            output_dir: dir,
            max_workers: 1,
        };
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(processor.execute(&invocation))
    }

    fn sh(script: &str) -> ExternalProcessor {
        // `sh -c <script> <arg0> <args...>` leaves the fixed flags in $0..$n.
        ExternalProcessor::new("sh").with_args(["-c", script, "processor"])
    }

    #[test]
    fn zero_exit_is_success_and_captures_output() {
        let tmp = TempDir::new().unwrap();
        let output = run(&sh("echo done; echo note >&2"), tmp.path()).unwrap();
        assert_eq!(output.stdout.trim(), "done");
        assert_eq!(output.stderr.trim(), "note");
    }

    #[test]
    fn passes_fixed_flags() {
        let tmp = TempDir::new().unwrap();
        let output = run(&sh("echo \"$@\""), tmp.path()).unwrap();
        let args = output.stdout.trim();
        assert!(args.starts_with("--samples-config "));
        assert!(args.contains("samples.yaml --output-dir "));
        assert!(args.ends_with("--max-workers 1"));
    }

    #[test]
    fn non_zero_exit_is_processor_failure() {
        let tmp = TempDir::new().unwrap();
        let err = run(&sh("echo partial; echo broken >&2; exit 3"), tmp.path()).unwrap_err();
        match err {
            ExecutionError::ProcessorFailed {
                code,
                stdout,
                stderr,
            } => {
                assert_eq!(code, Some(3));
                assert_eq!(stdout.trim(), "partial");
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("expected ProcessorFailed, got {other:?}"),
        }
    }

    #[test]
    fn missing_executable_is_classified() {
        let tmp = TempDir::new().unwrap();
        let processor = ExternalProcessor::new("/definitely/not/a/real/checkrun-processor");
        let err = run(&processor, tmp.path()).unwrap_err();
        assert!(matches!(err, ExecutionError::ExecutableNotFound { .. }));
    }

    #[test]
    fn timeout_kills_the_child() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("finished");
        let script = format!("sleep 2; touch {}", marker.display());
        let processor = sh(&script).with_timeout(Some(Duration::from_millis(100)));

        let err = run(&processor, tmp.path()).unwrap_err();
        assert!(matches!(err, ExecutionError::TimedOut(_)));

        std::thread::sleep(Duration::from_millis(2500));
        assert!(!marker.exists());
    }

    #[test]
    fn working_dir_is_applied() {
        let tmp = TempDir::new().unwrap();
        let processor = sh("pwd").with_working_dir(Some(tmp.path().to_path_buf()));
        let output = run(&processor, tmp.path()).unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(tmp.path()).unwrap());
    }
}
