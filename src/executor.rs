//! Runs a single item: temp config, processor call, classification,
//! stage recording and configuration aggregation.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

use crate::aggregate::{self, ConfigAggregator};
use crate::error::ExecutionError;
use crate::item::ItemConfig;
use crate::processor::{Invocation, ItemProcessor, ProcessOutput};
use crate::record::{ErrorInfo, LogManager, RecordUpdate, StageEntry};

/// Stage name recorded for the processor invocation.
pub const STAGE_NAME: &str = "full_pipeline";

/// Parallelism hint passed to the processor; items are sequenced here.
pub const MAX_WORKERS: usize = 1;

/// Drives one item through its processor.
pub struct ExecutionUnit<P> {
    processor: P,
    aggregator: Box<dyn ConfigAggregator>,
    output_dir: PathBuf,
    temp_dir: Option<PathBuf>,
}

impl<P: ItemProcessor> ExecutionUnit<P> {
    pub fn new(processor: P, aggregator: Box<dyn ConfigAggregator>, output_dir: &Path) -> Self {
        Self {
            processor,
            aggregator,
            output_dir: output_dir.to_path_buf(),
            temp_dir: None,
        }
    }

    /// Directory for temporary item configs (default: the system temp dir).
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    pub fn with_aggregator(mut self, aggregator: Box<dyn ConfigAggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Execute one item and report whether it succeeded.
    ///
    /// Failures of any kind are recorded on the execution record and turned
    /// into `false`; nothing propagates to the caller.
    pub async fn execute(
        &self,
        config: &ItemConfig,
        id: &str,
        execution_id: &str,
        log: &mut dyn LogManager,
    ) -> bool {
        let started_at = Utc::now();
        let stage = StageEntry::running(STAGE_NAME, started_at);
        update_record(log, RecordUpdate::Stage(stage.clone()), false);

        let outcome = self.invoke(config, id).await;
        let ended_at = Utc::now();

        match outcome {
            Ok(_) => {
                info!(item = id, execution_id, "Item processed successfully");
                update_record(log, RecordUpdate::Stage(stage.finished(ended_at, None)), true);
                self.record_configuration(id, log);
                true
            }
            Err(e) => {
                let message = e.diagnostic();
                error!(item = id, execution_id, kind = %e.kind(), error = %e, "Item failed");
                if let ExecutionError::ProcessorFailed { stdout, stderr, .. } = &e {
                    error!(item = id, stderr = %stderr, stdout = %stdout, "Processor output");
                }
                update_record(
                    log,
                    RecordUpdate::Stage(stage.finished(ended_at, Some(message.clone()))),
                    false,
                );
                update_record(
                    log,
                    RecordUpdate::Error(ErrorInfo {
                        error_type: e.kind(),
                        error_message: message,
                        failed_stage: Some(STAGE_NAME.to_string()),
                    }),
                    true,
                );
                false
            }
        }
    }

    async fn invoke(&self, config: &ItemConfig, id: &str) -> Result<ProcessOutput, ExecutionError> {
        // The TempPath removes the file when dropped, on every exit path.
        let temp = self.materialize(config, id)?;
        info!(item = id, path = %temp.display(), "Generated temporary item config");

        let invocation = Invocation {
            item_id: id,
            config,
            config_path: &temp,
            output_dir: &self.output_dir,
            max_workers: MAX_WORKERS,
        };
        let result = self.processor.execute(&invocation).await;

        let path = temp.to_path_buf();
        match temp.close() {
            Ok(()) => debug!(path = %path.display(), "Removed temporary item config"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary item config"),
        }
        result
    }

    /// Write `[config]` as YAML to a uniquely named file and sync it, since the
    /// processor reads it from another process.
    fn materialize(&self, config: &ItemConfig, id: &str) -> Result<TempPath, ExecutionError> {
        let prefix = format!("checkrun-{id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".yaml");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        serde_yaml::to_writer(&mut file, &[config])?;
        file.flush()?;
        file.as_file().sync_all()?;
        Ok(file.into_temp_path())
    }

    fn record_configuration(&self, id: &str, log: &mut dyn LogManager) {
        let item_dir = self.output_dir.join(id);
        info!(item = id, dir = %item_dir.display(), "Aggregating configurations");

        let summary = aggregate::aggregate(self.aggregator.as_ref(), &item_dir);
        match &summary.error {
            Some(error) => warn!(item = id, error = %error, "Configuration aggregation failed"),
            None => info!(
                item = id,
                files = summary.config_files_found.len(),
                "Aggregated configuration files"
            ),
        }

        update_record(log, RecordUpdate::ConfigurationParameters(summary), false);
        update_record(
            log,
            RecordUpdate::OutputPath {
                key: "temp_configs".to_string(),
                path: self.aggregator.config_location(&item_dir),
            },
            true,
        );
    }
}

/// Record writes are best effort; a failed write never fails the item.
fn update_record(log: &mut dyn LogManager, update: RecordUpdate, immediate_save: bool) {
    if let Err(e) = log.update_log(update, immediate_save) {
        warn!(error = %e, "Failed to update execution record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{ConfigSummary, FsConfigAggregator};
    use crate::error::{CheckrunError, ErrorKind};
    use crate::item::ItemDetails;
    use crate::record::{JsonLogManager, RecordStatus};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Captures each temp config it is handed.
    #[derive(Clone)]
    struct RecordingProcessor {
        fail_with: Option<fn() -> ExecutionError>,
        seen: Arc<Mutex<Vec<(PathBuf, String)>>>,
    }

    impl RecordingProcessor {
        fn ok() -> Self {
            Self {
                fail_with: None,
                seen: Arc::default(),
            }
        }

        fn failing(make: fn() -> ExecutionError) -> Self {
            Self {
                fail_with: Some(make),
                seen: Arc::default(),
            }
        }
    }

    impl ItemProcessor for RecordingProcessor {
        async fn execute(
            &self,
            invocation: &Invocation<'_>,
        ) -> Result<ProcessOutput, ExecutionError> {
            let content = std::fs::read_to_string(invocation.config_path).unwrap();
            self.seen
                .lock()
                .unwrap()
                .push((invocation.config_path.to_path_buf(), content));
            assert_eq!(invocation.max_workers, 1);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(ProcessOutput::default()),
            }
        }
    }

    struct BrokenAggregator;

    impl ConfigAggregator for BrokenAggregator {
        fn aggregate_configs(&self, _dir: &Path) -> crate::error::Result<ConfigSummary> {
            Err(CheckrunError::Config("aggregator exploded".into()))
        }

        fn extract_key_parameters(&self, _effective: &Value) -> BTreeMap<String, Value> {
            BTreeMap::new()
        }
    }

    struct Fixture {
        tmp: TempDir,
        logs: JsonLogManager,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let logs = JsonLogManager::new(&tmp.path().join("logs"));
            Self { tmp, logs }
        }

        fn unit<P: ItemProcessor>(&self, processor: P) -> ExecutionUnit<P> {
            let temp_dir = self.tmp.path().join("tmp");
            std::fs::create_dir_all(&temp_dir).unwrap();
            ExecutionUnit::new(processor, Box::new(FsConfigAggregator::default()), self.tmp.path())
                .with_temp_dir(temp_dir)
        }

        fn temp_dir_is_empty(&self) -> bool {
            std::fs::read_dir(self.tmp.path().join("tmp"))
                .unwrap()
                .next()
                .is_none()
        }
    }

    fn config(id: &str) -> ItemConfig {
        let details = ItemDetails {
            train_config: Some("train.yaml".into()),
            ..Default::default()
        };
        ItemConfig::from_details(id, &details).unwrap()
    }

    #[tokio::test]
    async fn success_records_stage_and_removes_temp_config() {
        let mut fx = Fixture::new();
        let processor = RecordingProcessor::ok();
        let unit = fx.unit(processor.clone());

        let exec_id = fx.logs.create_log("s1", fx.tmp.path()).unwrap();
        assert!(unit.execute(&config("s1"), "s1", &exec_id, &mut fx.logs).await);
        fx.logs.finalize_log(RecordStatus::Completed, None).unwrap();

        let seen = processor.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (path, content) = &seen[0];
        assert!(!path.exists());
        assert!(fx.temp_dir_is_empty());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("checkrun-s1-"));
        assert!(content.starts_with("- name: s1"));
        assert!(content.contains("train_config: train.yaml"));

        let record = fx.logs.load("s1", &exec_id).unwrap();
        let stages = &record.pipeline_information.pipeline_stages;
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name, STAGE_NAME);
        assert_eq!(stages[0].status, RecordStatus::Completed);
        assert!(stages[0].duration_seconds.is_some());
        assert!(record.error_information.is_none());
        assert!(record.configuration_parameters.is_some());
        assert_eq!(
            record.output_information.output_paths["temp_configs"],
            fx.tmp.path().join("s1").join("temp_configs")
        );
    }

    #[tokio::test]
    async fn processor_failure_is_classified_and_cleaned_up() {
        let mut fx = Fixture::new();
        let processor = RecordingProcessor::failing(|| ExecutionError::ProcessorFailed {
            code: Some(1),
            stdout: "partial".into(),
            stderr: "Traceback: boom".into(),
        });
        let unit = fx.unit(processor.clone());

        let exec_id = fx.logs.create_log("s2", fx.tmp.path()).unwrap();
        assert!(!unit.execute(&config("s2"), "s2", &exec_id, &mut fx.logs).await);

        assert!(fx.temp_dir_is_empty());
        let record = fx.logs.load("s2", &exec_id).unwrap();
        let stage = &record.pipeline_information.pipeline_stages[0];
        assert_eq!(stage.status, RecordStatus::Failed);
        assert!(stage.error_message.as_ref().unwrap().contains("Traceback: boom"));
        let info = record.error_information.unwrap();
        assert_eq!(info.error_type, ErrorKind::ExternalProcessorFailed);
        assert_eq!(info.failed_stage.as_deref(), Some(STAGE_NAME));
        // Aggregation only runs for successful items.
        assert!(record.configuration_parameters.is_none());
    }

    #[tokio::test]
    async fn missing_executable_is_recorded() {
        let mut fx = Fixture::new();
        let unit = fx.unit(RecordingProcessor::failing(|| ExecutionError::ExecutableNotFound {
            program: "python3".into(),
        }));

        let exec_id = fx.logs.create_log("s1", fx.tmp.path()).unwrap();
        assert!(!unit.execute(&config("s1"), "s1", &exec_id, &mut fx.logs).await);

        let record = fx.logs.load("s1", &exec_id).unwrap();
        assert_eq!(
            record.error_information.unwrap().error_type,
            ErrorKind::ExecutableNotFound
        );
        assert!(fx.temp_dir_is_empty());
    }

    #[tokio::test]
    async fn aggregation_failure_does_not_fail_item() {
        let mut fx = Fixture::new();
        let unit = fx
            .unit(RecordingProcessor::ok())
            .with_aggregator(Box::new(BrokenAggregator));

        let exec_id = fx.logs.create_log("s1", fx.tmp.path()).unwrap();
        assert!(unit.execute(&config("s1"), "s1", &exec_id, &mut fx.logs).await);

        let record = fx.logs.load("s1", &exec_id).unwrap();
        let params = record.configuration_parameters.unwrap();
        assert!(params.error.unwrap().contains("aggregator exploded"));
        assert!(record.error_information.is_none());
    }

    #[tokio::test]
    async fn unwritable_temp_dir_fails_item_with_io_kind() {
        let mut fx = Fixture::new();
        let processor = RecordingProcessor::ok();
        let unit = fx
            .unit(processor.clone())
            .with_temp_dir(fx.tmp.path().join("does/not/exist"));

        let exec_id = fx.logs.create_log("s1", fx.tmp.path()).unwrap();
        assert!(!unit.execute(&config("s1"), "s1", &exec_id, &mut fx.logs).await);

        assert!(processor.seen.lock().unwrap().is_empty());
        let record = fx.logs.load("s1", &exec_id).unwrap();
        assert_eq!(record.error_information.unwrap().error_type, ErrorKind::Io);
    }

    #[tokio::test]
    async fn record_failures_do_not_change_outcome() {
        let fx = Fixture::new();
        let unit = fx.unit(RecordingProcessor::ok());
        // No record is open, so every update fails.
        let mut logs = JsonLogManager::new(&fx.tmp.path().join("logs"));

        assert!(unit.execute(&config("s1"), "s1", "no-record", &mut logs).await);
    }
}
