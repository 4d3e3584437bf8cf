//! Configuration aggregation for finished items.
//!
//! After an item succeeds, the configuration files its processor left under
//! the item output directory are merged into one effective config and a
//! curated set of key parameters is copied into the execution record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::AggregationConfig;
use crate::error::{CheckrunError, Result};

/// What aggregation found for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    #[serde(default)]
    pub config_files_found: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_config: Option<Value>,
    /// Config files whose top level is not a mapping; they are not merged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_parameters: BTreeMap<String, Value>,
    /// Set instead of propagating when aggregation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Discovers configuration files for an item and extracts key parameters.
pub trait ConfigAggregator {
    fn aggregate_configs(&self, item_output_dir: &Path) -> Result<ConfigSummary>;

    fn extract_key_parameters(&self, effective_config: &Value) -> BTreeMap<String, Value>;

    /// Location the summary is built from, recorded next to it.
    fn config_location(&self, item_output_dir: &Path) -> PathBuf {
        item_output_dir.to_path_buf()
    }
}

/// Aggregate for one item. Never fails: errors become `ConfigSummary::error`.
pub fn aggregate(aggregator: &dyn ConfigAggregator, item_output_dir: &Path) -> ConfigSummary {
    let result = aggregator.aggregate_configs(item_output_dir).map(|mut summary| {
        if let Some(effective) = &summary.effective_config {
            summary.key_parameters = aggregator.extract_key_parameters(effective);
        }
        summary
    });
    match result {
        Ok(summary) => summary,
        Err(e) => ConfigSummary {
            error: Some(format!("Failed to aggregate configurations: {e}")),
            ..Default::default()
        },
    }
}

/// Reads YAML and JSON files below `<item_output_dir>/<config_dir>`.
#[derive(Debug, Clone)]
pub struct FsConfigAggregator {
    config_dir: PathBuf,
    key_parameters: Vec<String>,
}

impl FsConfigAggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            config_dir: config.config_dir.clone(),
            key_parameters: config.key_parameters.clone(),
        }
    }
}

impl Default for FsConfigAggregator {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}

impl ConfigAggregator for FsConfigAggregator {
    fn aggregate_configs(&self, item_output_dir: &Path) -> Result<ConfigSummary> {
        let dir = self.config_location(item_output_dir);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No config directory for item");
            return Ok(ConfigSummary::default());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && is_config_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        let mut effective = Value::Object(Default::default());
        let mut merged = 0;
        let mut ignored = Vec::new();
        for path in &files {
            match load_config_file(path)? {
                document @ Value::Object(_) => {
                    merge(&mut effective, document);
                    merged += 1;
                }
                _ => {
                    warn!(path = %path.display(), "Config file is not a mapping, not merged");
                    ignored.push(path.clone());
                }
            }
        }

        info!(dir = %dir.display(), files = files.len(), merged, "Aggregated configuration files");
        Ok(ConfigSummary {
            effective_config: (merged > 0).then_some(effective),
            config_files_found: files,
            ignored_files: ignored,
            ..Default::default()
        })
    }

    fn extract_key_parameters(&self, effective_config: &Value) -> BTreeMap<String, Value> {
        self.key_parameters
            .iter()
            .filter_map(|key| lookup(effective_config, key).map(|v| (key.clone(), v.clone())))
            .collect()
    }

    fn config_location(&self, item_output_dir: &Path) -> PathBuf {
        item_output_dir.join(&self.config_dir)
    }
}

fn is_config_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| CheckrunError::io(format!("reading {}", path.display()), e))?;
    // JSON is valid YAML, so one parser covers both.
    let value: Value = serde_yaml::from_str(&content)?;
    Ok(value)
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else
/// is replaced.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Resolve a dotted path such as `training.learning_rate`.
fn lookup<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(value, |current, segment| current.get(segment))
}
