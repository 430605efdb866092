//! Sentinel files marking export state.
//!
//! `.export-in-progress` exists while a run is live and records why the last
//! run stopped when it did not finish; `.export-completed` marks a clean
//! finish. The resume guard reads both to classify prior state.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsutil;

pub const IN_PROGRESS_FILENAME: &str = ".export-in-progress";
pub const COMPLETED_FILENAME: &str = ".export-completed";

/// Contents of `.export-in-progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProgressSentinel {
  pub timestamp: DateTime<Utc>,
  #[serde(rename = "spaceKey")]
  pub space_key: String,
  /// Signal name when the run was interrupted (e.g. `"interrupt"`).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub signal: Option<String>,
  /// Free-form note about why the run stopped.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

/// Contents of `.export-completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedSentinel {
  pub timestamp: DateTime<Utc>,
  pub message: String,
}

impl InProgressSentinel {
  pub fn new(space_key: impl Into<String>) -> Self {
    Self {
      timestamp: Utc::now(),
      space_key: space_key.into(),
      signal: None,
      message: None,
    }
  }

  /// Write (or overwrite) the in-progress sentinel.
  pub fn write(&self, output_dir: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(self).context("Failed to serialize in-progress sentinel")?;
    fsutil::write_atomic_string(&output_dir.join(IN_PROGRESS_FILENAME), &json)
  }

  pub fn read(output_dir: &Path) -> Result<Option<Self>> {
    read_sentinel(output_dir, IN_PROGRESS_FILENAME)
  }

  pub fn remove(output_dir: &Path) -> Result<()> {
    remove_sentinel(output_dir, IN_PROGRESS_FILENAME)
  }

  pub fn exists(output_dir: &Path) -> bool {
    output_dir.join(IN_PROGRESS_FILENAME).exists()
  }
}

impl CompletedSentinel {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      timestamp: Utc::now(),
      message: message.into(),
    }
  }

  pub fn write(&self, output_dir: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(self).context("Failed to serialize completed sentinel")?;
    fsutil::write_atomic_string(&output_dir.join(COMPLETED_FILENAME), &json)
  }

  pub fn read(output_dir: &Path) -> Result<Option<Self>> {
    read_sentinel(output_dir, COMPLETED_FILENAME)
  }

  pub fn remove(output_dir: &Path) -> Result<()> {
    remove_sentinel(output_dir, COMPLETED_FILENAME)
  }

  pub fn exists(output_dir: &Path) -> bool {
    output_dir.join(COMPLETED_FILENAME).exists()
  }
}

fn read_sentinel<T: serde::de::DeserializeOwned>(output_dir: &Path, filename: &str) -> Result<Option<T>> {
  let path = output_dir.join(filename);
  if !path.exists() {
    return Ok(None);
  }
  let content = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
  let sentinel = serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
  Ok(Some(sentinel))
}

fn remove_sentinel(output_dir: &Path, filename: &str) -> Result<()> {
  let path = output_dir.join(filename);
  match std::fs::remove_file(&path) {
    Ok(()) => Ok(()),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
  }
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn test_in_progress_round_trip() {
    let dir = tempdir().unwrap();
    let mut sentinel = InProgressSentinel::new("TEST");
    sentinel.signal = Some("interrupt".to_string());
    sentinel.write(dir.path()).unwrap();

    let loaded = InProgressSentinel::read(dir.path()).unwrap().unwrap();
    assert_eq!(loaded.space_key, "TEST");
    assert_eq!(loaded.signal.as_deref(), Some("interrupt"));
  }

  #[test]
  fn test_completed_round_trip() {
    let dir = tempdir().unwrap();
    CompletedSentinel::new("42 pages exported").write(dir.path()).unwrap();

    let loaded = CompletedSentinel::read(dir.path()).unwrap().unwrap();
    assert_eq!(loaded.message, "42 pages exported");
  }

  #[test]
  fn test_remove_missing_is_ok() {
    let dir = tempdir().unwrap();
    InProgressSentinel::remove(dir.path()).unwrap();
    CompletedSentinel::remove(dir.path()).unwrap();
  }

  #[test]
  fn test_exists() {
    let dir = tempdir().unwrap();
    assert!(!InProgressSentinel::exists(dir.path()));
    InProgressSentinel::new("TEST").write(dir.path()).unwrap();
    assert!(InProgressSentinel::exists(dir.path()));
    InProgressSentinel::remove(dir.path()).unwrap();
    assert!(!InProgressSentinel::exists(dir.path()));
  }
}
