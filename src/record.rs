//! Per-item execution records.
//!
//! An execution record is opened when an item starts, accumulates stage
//! timings, configuration metadata and error detail, and is finalized exactly
//! once. [`LogManager`] is the seam; [`JsonLogManager`] writes one JSON file
//! per execution.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::aggregate::ConfigSummary;
use crate::checkpoint::CheckpointRecord;
use crate::error::{CheckrunError, ErrorKind, Result};
use crate::persist;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Completed,
    Failed,
}

/// Timing and outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub name: String,
    pub status: RecordStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl StageEntry {
    pub fn running(name: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            status: RecordStatus::Running,
            start_time,
            end_time: None,
            duration_seconds: None,
            error_message: None,
        }
    }

    /// Close the stage at `end_time`. `error` marks it failed.
    pub fn finished(mut self, end_time: DateTime<Utc>, error: Option<String>) -> Self {
        self.status = if error.is_some() {
            RecordStatus::Failed
        } else {
            RecordStatus::Completed
        };
        self.duration_seconds = Some(seconds_between(self.start_time, end_time));
        self.end_time = Some(end_time);
        self.error_message = error;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: ErrorKind,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputConfiguration {
    pub config_files: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineInformation {
    /// Checkpoint state of the item when this execution started.
    pub checkpoint_data: Option<CheckpointRecord>,
    pub pipeline_stages: Vec<StageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputInformation {
    pub output_paths: BTreeMap<String, PathBuf>,
}

/// Structured log of one item execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub item_id: String,
    pub base_output_dir: PathBuf,
    pub status: RecordStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub input_configuration: InputConfiguration,
    pub pipeline_information: PipelineInformation,
    pub configuration_parameters: Option<ConfigSummary>,
    pub output_information: OutputInformation,
    pub error_information: Option<ErrorInfo>,
}

/// A partial update merged into the open record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordUpdate {
    InputConfiguration {
        config_files: BTreeMap<String, PathBuf>,
    },
    CheckpointData(Option<CheckpointRecord>),
    /// Replaces the stage with the same name, or appends it.
    Stage(StageEntry),
    ConfigurationParameters(ConfigSummary),
    OutputPath {
        key: String,
        path: PathBuf,
    },
    Error(ErrorInfo),
}

impl ExecutionRecord {
    pub fn new(execution_id: String, item_id: &str, base_output_dir: &Path) -> Self {
        Self {
            execution_id,
            item_id: item_id.to_string(),
            base_output_dir: base_output_dir.to_path_buf(),
            status: RecordStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_seconds: None,
            input_configuration: InputConfiguration::default(),
            pipeline_information: PipelineInformation::default(),
            configuration_parameters: None,
            output_information: OutputInformation::default(),
            error_information: None,
        }
    }

    pub fn apply(&mut self, update: RecordUpdate) {
        match update {
            RecordUpdate::InputConfiguration { config_files } => {
                self.input_configuration.config_files.extend(config_files);
            }
            RecordUpdate::CheckpointData(data) => {
                self.pipeline_information.checkpoint_data = data;
            }
            RecordUpdate::Stage(stage) => {
                let stages = &mut self.pipeline_information.pipeline_stages;
                match stages.iter_mut().find(|s| s.name == stage.name) {
                    Some(existing) => *existing = stage,
                    None => stages.push(stage),
                }
            }
            RecordUpdate::ConfigurationParameters(summary) => {
                self.configuration_parameters = Some(summary);
            }
            RecordUpdate::OutputPath { key, path } => {
                self.output_information.output_paths.insert(key, path);
            }
            RecordUpdate::Error(info) => {
                self.error_information = Some(info);
            }
        }
    }

    /// Mark the record finished. Detailed error information recorded by a
    /// stage takes precedence over the generic `error_info`.
    pub fn finalize(&mut self, status: RecordStatus, error_info: Option<ErrorInfo>) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_seconds = Some(seconds_between(self.started_at, now));
        if self.error_information.is_none() {
            self.error_information = error_info;
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Owns execution records for a batch run.
pub trait LogManager {
    /// Open a record for `item_id` and return its execution id.
    fn create_log(&mut self, item_id: &str, base_dir: &Path) -> Result<String>;

    /// Merge `update` into the open record. `immediate_save` flushes it to
    /// storage before returning; otherwise it is written at finalization.
    fn update_log(&mut self, update: RecordUpdate, immediate_save: bool) -> Result<()>;

    /// Close the open record as `Completed` or `Failed`.
    fn finalize_log(&mut self, status: RecordStatus, error_info: Option<ErrorInfo>) -> Result<()>;

    /// Where the record for an execution is stored, if it is file-backed.
    fn record_path(&self, item_id: &str, execution_id: &str) -> Option<PathBuf>;
}

/// Writes each execution record to `<log_dir>/<item>_<execution_id>.json`.
#[derive(Debug)]
pub struct JsonLogManager {
    log_dir: PathBuf,
    current: Option<ExecutionRecord>,
}

impl JsonLogManager {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
            current: None,
        }
    }

    /// Read back a stored record.
    pub fn load(&self, item_id: &str, execution_id: &str) -> Result<ExecutionRecord> {
        let path = self.path_for(item_id, execution_id);
        let content = fs::read_to_string(&path)
            .map_err(|e| CheckrunError::io(format!("reading {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn path_for(&self, item_id: &str, execution_id: &str) -> PathBuf {
        record_file(&self.log_dir, item_id, execution_id)
    }
}

fn record_file(log_dir: &Path, item_id: &str, execution_id: &str) -> PathBuf {
    log_dir.join(format!("{item_id}_{execution_id}.json"))
}

fn write_record(log_dir: &Path, record: &ExecutionRecord) -> Result<()> {
    let path = record_file(log_dir, &record.item_id, &record.execution_id);
    persist::write_json_pretty(&path, record)?;
    debug!(path = %path.display(), "Execution record saved");
    Ok(())
}

impl LogManager for JsonLogManager {
    fn create_log(&mut self, item_id: &str, base_dir: &Path) -> Result<String> {
        if let Some(stale) = self.current.take() {
            warn!(
                item = %stale.item_id,
                execution_id = %stale.execution_id,
                "Previous execution record was never finalized"
            );
        }

        let execution_id = Uuid::new_v4().to_string();
        let record = ExecutionRecord::new(execution_id.clone(), item_id, base_dir);
        // The record stays open even if the first write fails; later writes retry.
        if let Err(e) = write_record(&self.log_dir, &record) {
            warn!(item = item_id, execution_id = %execution_id, error = %e, "Initial execution record write failed");
        }
        self.current = Some(record);
        Ok(execution_id)
    }

    fn update_log(&mut self, update: RecordUpdate, immediate_save: bool) -> Result<()> {
        let record = self.current.as_mut().ok_or(CheckrunError::NoOpenRecord)?;
        record.apply(update);
        if immediate_save {
            write_record(&self.log_dir, record)?;
        }
        Ok(())
    }

    fn finalize_log(&mut self, status: RecordStatus, error_info: Option<ErrorInfo>) -> Result<()> {
        if status == RecordStatus::Running {
            return Err(CheckrunError::Config(
                "an execution record cannot be finalized as running".to_string(),
            ));
        }
        let mut record = self.current.take().ok_or(CheckrunError::NoOpenRecord)?;
        record.finalize(status, error_info);
        write_record(&self.log_dir, &record)
    }

    fn record_path(&self, item_id: &str, execution_id: &str) -> Option<PathBuf> {
        Some(self.path_for(item_id, execution_id))
    }
}
