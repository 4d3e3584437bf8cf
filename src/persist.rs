//! Crash-safe file writes shared by the checkpoint, execution records and the
//! run summary.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::error::{CheckrunError, Result};

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
///
/// Readers see either the previous content or the new content, never a
/// truncated file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| CheckrunError::io(format!("creating {}", parent.display()), e))?;
    }

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("checkrun");
    let tmp = path.with_file_name(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));

    let mut file =
        File::create(&tmp).map_err(|e| CheckrunError::io(format!("creating {}", tmp.display()), e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| CheckrunError::io(format!("writing {}", tmp.display()), e))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(CheckrunError::io(format!("renaming onto {}", path.display()), e));
    }
    Ok(())
}

/// Pretty-print `value` as JSON and write it atomically.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/out.json");

        atomic_write(&path, b"{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        atomic_write(&path, b"first").unwrap();
        write_json_pretty(&path, &serde_json::json!({"a": 1})).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"a\": 1"));
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
