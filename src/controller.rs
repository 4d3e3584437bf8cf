use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::aggregate::{ConfigAggregator, FsConfigAggregator};
use crate::checkpoint::{CheckpointStore, ItemStatus};
use crate::collector::{CheckpointCollector, CollectionContext, ResultsCollector};
use crate::config::CheckrunConfig;
use crate::error::ErrorKind;
use crate::executor::ExecutionUnit;
use crate::item::{ItemConfig, ItemDetails};
use crate::persist;
use crate::processor::ItemProcessor;
use crate::record::{ErrorInfo, JsonLogManager, LogManager, RecordStatus, RecordUpdate};
use crate::ui::BatchProgress;

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Distinct item ids requested.
    pub requested: usize,
    pub executed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Previously failed items that were executed again.
    pub retried: usize,
    pub skipped_completed: usize,
    /// Failed items whose attempts reached the retry ceiling.
    pub skipped_exhausted: usize,
    pub skipped_missing: usize,
    pub skipped_invalid: usize,
}

impl RunReport {
    pub fn skipped(&self) -> usize {
        self.skipped_completed + self.skipped_exhausted + self.skipped_missing + self.skipped_invalid
    }

    fn record(&mut self, succeeded: bool) {
        self.executed += 1;
        if succeeded {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// One item scheduled for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub id: String,
    pub config: ItemConfig,
    /// The item failed in an earlier run.
    pub retry: bool,
}

/// Drives a batch of items through the checkpoint lifecycle.
///
/// Items run strictly one after another. Each executed item is committed to
/// the checkpoint and persisted before the next one starts, so an interrupted
/// run resumes where it stopped.
pub struct Controller<P> {
    store: CheckpointStore,
    log_manager: Box<dyn LogManager>,
    unit: ExecutionUnit<P>,
    collector: Box<dyn ResultsCollector>,
    base_output_dir: PathBuf,
    summary_path: PathBuf,
    max_attempts: u32,
    show_progress: bool,
}

impl<P: ItemProcessor> Controller<P> {
    /// Build a controller with the default collaborators, loading the
    /// checkpoint for `base_output_dir`.
    pub fn new(processor: P, base_output_dir: &Path, config: &CheckrunConfig) -> Self {
        let aggregator = Box::new(FsConfigAggregator::new(&config.aggregation));
        Self {
            store: CheckpointStore::load(&config.checkpoint_path(base_output_dir)),
            log_manager: Box::new(JsonLogManager::new(&config.log_dir(base_output_dir))),
            unit: ExecutionUnit::new(processor, aggregator, base_output_dir),
            collector: Box::new(CheckpointCollector),
            base_output_dir: base_output_dir.to_path_buf(),
            summary_path: config.summary_path(base_output_dir),
            max_attempts: config.max_attempts,
            show_progress: false,
        }
    }

    pub fn with_log_manager(mut self, log_manager: Box<dyn LogManager>) -> Self {
        self.log_manager = log_manager;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Box<dyn ConfigAggregator>) -> Self {
        self.unit = self.unit.with_aggregator(aggregator);
        self
    }

    pub fn with_collector(mut self, collector: Box<dyn ResultsCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.unit = self.unit.with_temp_dir(dir);
        self
    }

    /// Show a terminal progress bar while items run.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Decide which items to run, in input order.
    pub fn plan(
        &self,
        items: &[String],
        details: &BTreeMap<String, ItemDetails>,
    ) -> (Vec<PlannedItem>, RunReport) {
        let mut report = RunReport::default();
        let mut work = Vec::new();
        let mut seen = HashSet::new();

        for id in items {
            if !seen.insert(id.as_str()) {
                warn!(item = %id, "Duplicate item in list, ignoring");
                continue;
            }
            report.requested += 1;

            let Some(item_details) = details.get(id) else {
                warn!(item = %id, "No configuration details for item, skipping");
                report.skipped_missing += 1;
                continue;
            };
            let config = match ItemConfig::from_details(id, item_details) {
                Ok(config) => config,
                Err(e) => {
                    warn!(item = %id, error = %e, "Invalid item, skipping");
                    report.skipped_invalid += 1;
                    continue;
                }
            };

            let retry = match self.store.record(id) {
                Some(record) if record.status == ItemStatus::Completed => {
                    info!(item = %id, "Item already completed, skipping");
                    report.skipped_completed += 1;
                    continue;
                }
                Some(record) if record.status == ItemStatus::Failed => {
                    if !record.has_attempts_left(self.max_attempts) {
                        warn!(
                            item = %id,
                            attempts = record.attempts,
                            max_attempts = self.max_attempts,
                            "Retry ceiling reached, skipping failed item"
                        );
                        report.skipped_exhausted += 1;
                        continue;
                    }
                    info!(item = %id, attempts = record.attempts, "Retrying previously failed item");
                    report.retried += 1;
                    true
                }
                _ => false,
            };

            work.push(PlannedItem {
                id: id.clone(),
                config,
                retry,
            });
        }

        (work, report)
    }

    /// Run every eligible item, then collect results. Never fails; errors are
    /// logged and show up in the report.
    pub async fn run(
        &mut self,
        items: &[String],
        details: &BTreeMap<String, ItemDetails>,
    ) -> RunReport {
        let span = info_span!(
            "batch_run",
            output_dir = %self.base_output_dir.display(),
            requested = items.len()
        );
        self.run_batch(items, details).instrument(span).await
    }

    async fn run_batch(
        &mut self,
        items: &[String],
        details: &BTreeMap<String, ItemDetails>,
    ) -> RunReport {
        let (work, mut report) = self.plan(items, details);
        info!(
            to_run = work.len(),
            skipped = report.skipped(),
            "Starting batch run"
        );

        let progress = BatchProgress::new(work.len() as u64, self.show_progress);
        for item in &work {
            progress.start_item(&item.id);
            let succeeded = self.run_item(item).await;
            progress.finish_item(&item.id, succeeded);
            report.record(succeeded);
        }
        progress.finish();

        self.collect_results();
        info!(
            executed = report.executed,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped(),
            "Batch run finished"
        );
        report
    }

    async fn run_item(&mut self, item: &PlannedItem) -> bool {
        let id = item.id.as_str();
        let execution_id = match self.log_manager.create_log(id, &self.base_output_dir) {
            Ok(execution_id) => execution_id,
            Err(e) => {
                warn!(item = id, error = %e, "Failed to open execution record");
                Uuid::new_v4().to_string()
            }
        };
        info!(item = id, execution_id = %execution_id, retry = item.retry, "Processing item");

        self.update_record(
            RecordUpdate::InputConfiguration {
                config_files: item.config.config_files(),
            },
            false,
        );
        let snapshot = self.store.record(id).cloned();
        self.update_record(RecordUpdate::CheckpointData(snapshot), true);

        let succeeded = self
            .unit
            .execute(&item.config, id, &execution_id, self.log_manager.as_mut())
            .await;

        let status = if succeeded {
            ItemStatus::Completed
        } else {
            ItemStatus::Failed
        };
        let attempts = self.store.commit(id, status, &execution_id).attempts;
        if let Err(e) = self.store.save() {
            error!(item = id, error = %e, "Failed to persist checkpoint");
        }
        info!(item = id, status = %status, attempts, "Checkpoint updated");

        let finalized = if succeeded {
            self.log_manager.finalize_log(RecordStatus::Completed, None)
        } else {
            self.log_manager.finalize_log(
                RecordStatus::Failed,
                Some(ErrorInfo {
                    error_type: ErrorKind::PipelineExecutionError,
                    error_message: format!("Pipeline failed for sample {id}"),
                    failed_stage: None,
                }),
            )
        };
        if let Err(e) = finalized {
            warn!(item = id, error = %e, "Failed to finalize execution record");
        }
        succeeded
    }

    fn update_record(&mut self, update: RecordUpdate, immediate_save: bool) {
        if let Err(e) = self.log_manager.update_log(update, immediate_save) {
            warn!(error = %e, "Failed to update execution record");
        }
    }

    fn collect_results(&self) {
        let ctx = CollectionContext {
            base_output_dir: &self.base_output_dir,
            checkpoint: &self.store,
            log_manager: self.log_manager.as_ref(),
        };
        match self.collector.collect_all(&ctx) {
            Ok(Some(summary)) => match persist::write_json_pretty(&self.summary_path, &summary) {
                Ok(()) => info!(path = %self.summary_path.display(), "Run summary written"),
                Err(e) => error!(path = %self.summary_path.display(), error = %e, "Failed to write run summary"),
            },
            Ok(None) => info!("No results to summarize"),
            Err(e) => error!(error = %e, "Results collection failed"),
        }
    }
}
