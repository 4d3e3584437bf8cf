//! Work items and their per-item configuration.
//!
//! [`ItemDetails`] is what callers supply; [`ItemConfig`] is the validated
//! form written to the processor's temporary config file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CheckrunError, Result};

/// Caller-supplied configuration for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "process_data_config",
        alias = "process_config",
        skip_serializing_if = "Option::is_none"
    )]
    pub process_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_config: Option<PathBuf>,
    /// Keys the controller does not interpret; passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Validated configuration handed to the item processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    pub name: String,
    #[serde(
        default,
        rename = "process_data_config",
        skip_serializing_if = "Option::is_none"
    )]
    pub process_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_config: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ItemConfig {
    /// Build the working config for `id`. `name` defaults to the identifier.
    pub fn from_details(id: &str, details: &ItemDetails) -> Result<Self> {
        validate_item_id(id)?;
        let name = match details.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => id.to_string(),
        };
        Ok(Self {
            name,
            process_config: details.process_config.clone(),
            train_config: details.train_config.clone(),
            extra: details.extra.clone(),
        })
    }

    /// Config file references recorded in the execution record.
    pub fn config_files(&self) -> BTreeMap<String, PathBuf> {
        let mut files = BTreeMap::new();
        if let Some(path) = &self.process_config {
            files.insert("process_config".to_string(), path.clone());
        }
        if let Some(path) = &self.train_config {
            files.insert("train_config".to_string(), path.clone());
        }
        files
    }
}

/// Item ids name the per-item output directory and log file, so they must be
/// a single plain path component.
pub fn validate_item_id(id: &str) -> Result<()> {
    let reason = if id.trim().is_empty() {
        Some("identifier is empty")
    } else if id == "." || id == ".." {
        Some("identifier is a relative directory")
    } else if id.contains(['/', '\\']) {
        Some("identifier contains a path separator")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CheckrunError::InvalidItem {
            id: id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Read item ids from a text file: one per line, blank lines and `#` comments
/// ignored.
pub fn load_sample_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CheckrunError::io(format!("reading sample list {}", path.display()), e))?;
    let ids: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(CheckrunError::Config(format!(
            "sample list {} is empty",
            path.display()
        )));
    }
    Ok(ids)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SampleSheet {
    Map(BTreeMap<String, ItemDetails>),
    List(Vec<ItemDetails>),
}

/// Load per-item details from a YAML or JSON sample sheet.
///
/// Accepts either a mapping of item id to details or a list of details where
/// each entry carries a `name` used as its id.
pub fn load_sample_sheet(path: &Path) -> Result<BTreeMap<String, ItemDetails>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CheckrunError::io(format!("reading sample sheet {}", path.display()), e))?;
    match serde_yaml::from_str::<SampleSheet>(&content)? {
        SampleSheet::Map(map) => Ok(map),
        SampleSheet::List(list) => list
            .into_iter()
            .map(|details| match details.name.clone() {
                Some(name) if !name.trim().is_empty() => Ok((name, details)),
                _ => Err(CheckrunError::Config(format!(
                    "sample sheet {} has an entry without a name",
                    path.display()
                ))),
            })
            .collect(),
    }
}
