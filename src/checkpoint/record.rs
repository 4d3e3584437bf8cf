use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Last known outcome of an item.
///
/// A missing checkpoint record means `Pending`. Status strings this version
/// does not recognise also load as `Pending`, so the item is reconsidered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Pending,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Checkpoint entry for a single item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    #[serde(default)]
    pub status: ItemStatus,
    /// Correlates with the item's execution record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Unparseable timestamps load as `None` rather than invalidating the record.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    /// Executions recorded for this item across runs.
    #[serde(default, deserialize_with = "lenient_attempts")]
    pub attempts: u32,
}

/// Parse an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(parse_timestamp))
}

fn lenient_attempts<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0))
}

impl CheckpointRecord {
    /// Whether another execution is allowed under `max_attempts` (0 = unbounded).
    pub fn has_attempts_left(&self, max_attempts: u32) -> bool {
        max_attempts == 0 || self.attempts < max_attempts
    }
}
