use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckrunError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid item `{id}`: {reason}")]
    InvalidItem { id: String, reason: String },

    #[error("No execution record is open")]
    NoOpenRecord,

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl CheckrunError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckrunError>;

/// Why a single item failed to process.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("executable not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("external processor failed with {}", exit_label(.code))]
    ProcessorFailed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("external processor timed out after {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize item config: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("{0}")]
    Internal(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExecutableNotFound { .. } => ErrorKind::ExecutableNotFound,
            Self::ProcessorFailed { .. } => ErrorKind::ExternalProcessorFailed,
            Self::TimedOut(_) => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message recorded on the stage entry. Processor failures carry their
    /// captured stderr so the record is useful without the console log.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::ProcessorFailed { stderr, .. } if !stderr.trim().is_empty() => {
                format!("{self}\nStderr: {}", stderr.trim_end())
            }
            _ => self.to_string(),
        }
    }
}

/// Classifies an item failure in execution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    ExecutableNotFound,
    ExternalProcessorFailed,
    Timeout,
    Io,
    Serialization,
    Internal,
    /// Generic failure attached when a record is finalized as failed.
    PipelineExecutionError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ExecutableNotFound => write!(f, "executable not found"),
            ErrorKind::ExternalProcessorFailed => write!(f, "external processor failed"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Serialization => write!(f, "serialization"),
            ErrorKind::Internal => write!(f, "internal"),
            ErrorKind::PipelineExecutionError => write!(f, "pipeline execution error"),
        }
    }
}
