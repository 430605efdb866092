//! Per-item resume journal.
//!
//! The journal records the pipeline status of every page and attachment so an
//! interrupted run can be continued without repeating completed work. It is
//! persisted opportunistically during the run and once more at shutdown.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsutil;

/// Filename of the journal inside the output directory.
pub const JOURNAL_FILENAME: &str = "resume-journal.json";

/// What kind of artifact a journal entry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
  Page,
  Attachment,
}

/// Pipeline status of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  Pending,
  Completed,
  Failed,
}

/// One tracked item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
  /// Page id, or `<pageId>/<filename>` for attachments.
  pub id: String,
  #[serde(rename = "type")]
  pub entry_type: EntryType,
  pub status: EntryStatus,
  /// Relative output path once known, empty before that.
  pub path: String,
  /// Last status transition time.
  pub timestamp: DateTime<Utc>,
  /// Failure description for `failed` entries.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// The resume journal for one export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeJournal {
  #[serde(rename = "spaceKey")]
  pub space_key: String,
  /// Entries keyed by id; a BTreeMap keeps serialization stable.
  pub entries: BTreeMap<String, JournalEntry>,
}

impl ResumeJournal {
  /// Create an empty journal for a fresh run.
  pub fn new(space_key: impl Into<String>) -> Self {
    Self {
      space_key: space_key.into(),
      entries: BTreeMap::new(),
    }
  }

  /// Record that an item entered the pipeline.
  pub fn mark_pending(&mut self, id: impl Into<String>, entry_type: EntryType) {
    let id = id.into();
    self.entries.insert(
      id.clone(),
      JournalEntry {
        id,
        entry_type,
        status: EntryStatus::Pending,
        path: String::new(),
        timestamp: Utc::now(),
        error: None,
      },
    );
  }

  /// Record a completed item and its output path.
  pub fn mark_completed(&mut self, id: &str, path: impl Into<String>) {
    if let Some(entry) = self.entries.get_mut(id) {
      entry.status = EntryStatus::Completed;
      entry.path = path.into();
      entry.timestamp = Utc::now();
      entry.error = None;
    }
  }

  /// Record a terminal failure for an item.
  pub fn mark_failed(&mut self, id: &str, error: impl Into<String>) {
    if let Some(entry) = self.entries.get_mut(id) {
      entry.status = EntryStatus::Failed;
      entry.timestamp = Utc::now();
      entry.error = Some(error.into());
    }
  }

  pub fn status_of(&self, id: &str) -> Option<EntryStatus> {
    self.entries.get(id).map(|e| e.status)
  }

  /// Ids of entries with `completed` status.
  pub fn completed_ids(&self) -> impl Iterator<Item = &str> {
    self
      .entries
      .values()
      .filter(|e| e.status == EntryStatus::Completed)
      .map(|e| e.id.as_str())
  }

  /// Persist the journal atomically.
  pub fn save(&self, output_dir: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(self).context("Failed to serialize resume journal")?;
    fsutil::write_atomic_string(&output_dir.join(JOURNAL_FILENAME), &json)
  }

  /// Load the journal from the output directory, if one exists.
  pub fn load(output_dir: &Path) -> Result<Option<Self>> {
    let path = output_dir.join(JOURNAL_FILENAME);
    if !path.exists() {
      return Ok(None);
    }
    let content =
      std::fs::read_to_string(&path).with_context(|| format!("Failed to read journal {}", path.display()))?;
    let journal =
      serde_json::from_str(&content).with_context(|| format!("Failed to parse journal {}", path.display()))?;
    Ok(Some(journal))
  }

  /// Remove the journal file, ignoring a missing file.
  pub fn remove(output_dir: &Path) -> Result<()> {
    let path = output_dir.join(JOURNAL_FILENAME);
    match std::fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err).with_context(|| format!("Failed to remove journal {}", path.display())),
    }
  }
}
