//! Run-level results collection, invoked once after every batch run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::checkpoint::{CheckpointStore, ItemStatus, StatusCounts};
use crate::error::Result;
use crate::record::LogManager;

/// Inputs available to a collector.
pub struct CollectionContext<'a> {
    pub base_output_dir: &'a Path,
    pub checkpoint: &'a CheckpointStore,
    pub log_manager: &'a dyn LogManager,
}

/// Builds a summary over the full checkpoint state.
pub trait ResultsCollector {
    /// `Ok(None)` means there is nothing worth writing as a run summary.
    fn collect_all(&self, ctx: &CollectionContext<'_>) -> Result<Option<Value>>;
}

#[derive(Debug, Serialize)]
struct RunSummary {
    generated_at: DateTime<Utc>,
    base_output_dir: PathBuf,
    total: usize,
    counts: StatusCounts,
    items: Vec<ItemSummary>,
}

#[derive(Debug, Serialize)]
struct ItemSummary {
    id: String,
    status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_record: Option<PathBuf>,
    output_dir: PathBuf,
}

/// Summarizes item statuses straight from the checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointCollector;

impl ResultsCollector for CheckpointCollector {
    fn collect_all(&self, ctx: &CollectionContext<'_>) -> Result<Option<Value>> {
        if ctx.checkpoint.is_empty() {
            return Ok(None);
        }

        let items = ctx
            .checkpoint
            .records()
            .iter()
            .map(|(id, record)| ItemSummary {
                id: id.clone(),
                status: record.status,
                execution_id: record.execution_id.clone(),
                timestamp: record.timestamp,
                attempts: record.attempts,
                execution_record: record
                    .execution_id
                    .as_deref()
                    .and_then(|exec| ctx.log_manager.record_path(id, exec)),
                output_dir: ctx.base_output_dir.join(id),
            })
            .collect();

        let summary = RunSummary {
            generated_at: Utc::now(),
            base_output_dir: ctx.base_output_dir.to_path_buf(),
            total: ctx.checkpoint.len(),
            counts: ctx.checkpoint.counts(),
            items,
        };
        Ok(Some(serde_json::to_value(summary)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::JsonLogManager;
    use tempfile::TempDir;

    #[test]
    fn empty_checkpoint_has_no_summary() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::load(&tmp.path().join("checkpoint.json"));
        let logs = JsonLogManager::new(&tmp.path().join("logs"));
        let ctx = CollectionContext {
            base_output_dir: tmp.path(),
            checkpoint: &store,
            log_manager: &logs,
        };

        assert!(CheckpointCollector.collect_all(&ctx).unwrap().is_none());
    }

    #[test]
    fn summary_reflects_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let mut store = CheckpointStore::load(&tmp.path().join("checkpoint.json"));
        store.commit("s1", ItemStatus::Completed, "e1");
        store.commit("s2", ItemStatus::Failed, "e2");
        let logs = JsonLogManager::new(&tmp.path().join("logs"));
        let ctx = CollectionContext {
            base_output_dir: tmp.path(),
            checkpoint: &store,
            log_manager: &logs,
        };

        let summary = CheckpointCollector.collect_all(&ctx).unwrap().unwrap();
        assert_eq!(summary["total"], 2);
        assert_eq!(summary["counts"]["completed"], 1);
        assert_eq!(summary["counts"]["failed"], 1);
        assert_eq!(summary["items"][0]["id"], "s1");
        assert_eq!(summary["items"][1]["status"], "failed");
        let record = summary["items"][0]["execution_record"].as_str().unwrap();
        assert!(record.ends_with("s1_e1.json"));
    }
}
