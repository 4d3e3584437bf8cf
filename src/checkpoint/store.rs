//! Durable item → status mapping that makes batch runs resumable.
//!
//! The whole mapping is rewritten after every item, so a crash loses at most
//! the update of the item that was executing.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::record::{CheckpointRecord, ItemStatus};
use crate::error::{CheckrunError, Result};
use crate::persist;

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Checkpoint state for a batch, backed by a JSON file.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    records: BTreeMap<String, CheckpointRecord>,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`.
    ///
    /// A missing or unreadable file yields an empty store; the full item set
    /// is then reconsidered instead of aborting the run.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(store) => store,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Invalid checkpoint, starting fresh");
                Self::empty(path)
            }
        }
    }

    /// Load the checkpoint at `path`, reporting an unreadable or malformed
    /// file instead of starting fresh. A missing file is an empty store.
    ///
    /// Entries are decoded one by one: a single malformed record is dropped
    /// with a warning and the rest of the mapping is kept.
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "Checkpoint not found, starting fresh");
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(CheckrunError::io(format!("reading {}", path.display()), e));
            }
        };

        let raw: BTreeMap<String, Value> = serde_json::from_str(&content)?;
        let mut records = BTreeMap::new();
        for (id, value) in raw {
            match serde_json::from_value::<CheckpointRecord>(value) {
                Ok(record) => {
                    records.insert(id, record);
                }
                Err(e) => {
                    warn!(path = %path.display(), item = %id, error = %e, "Dropping malformed checkpoint record");
                }
            }
        }

        info!(path = %path.display(), items = records.len(), "Loaded checkpoint");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            records: BTreeMap::new(),
        }
    }

    /// Persist the full mapping atomically.
    pub fn save(&self) -> Result<()> {
        persist::write_json_pretty(&self.path, &self.records)?;
        debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    pub fn status_of(&self, id: &str) -> ItemStatus {
        self.records
            .get(id)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    pub fn record(&self, id: &str) -> Option<&CheckpointRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> &BTreeMap<String, CheckpointRecord> {
        &self.records
    }

    /// Record the outcome of one execution in memory. Call [`save`](Self::save)
    /// afterwards to make it durable.
    pub fn commit(&mut self, id: &str, status: ItemStatus, execution_id: &str) -> &CheckpointRecord {
        let record = self.records.entry(id.to_string()).or_default();
        record.status = status;
        record.execution_id = Some(execution_id.to_string());
        record.timestamp = Some(Utc::now());
        record.attempts += 1;
        record
    }

    pub fn counts(&self) -> StatusCounts {
        self.records
            .values()
            .fold(StatusCounts::default(), |mut counts, record| {
                match record.status {
                    ItemStatus::Completed => counts.completed += 1,
                    ItemStatus::Failed => counts.failed += 1,
                    ItemStatus::Pending => counts.pending += 1,
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
