//! Crash-safe queue snapshots.
//!
//! Snapshots are canonical JSON: `queueItems` sorted by page id,
//! `processedPageIds` sorted lexicographically, and a SHA-256 checksum
//! computed over the serialized bytes with the checksum field nulled.
//! Writes go through temp-file + rename, the previous snapshot is kept as a
//! rolling `.backup.<timestamp>`, and restore falls back through
//! repair -> backups -> fresh when the primary snapshot is damaged.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DownloadQueue, ItemStatus, QueueItem, SnapshotParts};
use crate::checksum::sha256_hex;
use crate::fsutil;
use crate::metrics::QueueMetrics;

/// Primary snapshot filename inside the output directory.
pub const QUEUE_STATE_FILENAME: &str = ".queue-state.json";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
  pub version: u32,
  pub timestamp: DateTime<Utc>,
  #[serde(rename = "spaceKey")]
  pub space_key: String,
  #[serde(rename = "queueItems")]
  pub queue_items: Vec<QueueItem>,
  #[serde(rename = "processedPageIds")]
  pub processed_page_ids: Vec<String>,
  pub metrics: QueueMetrics,
  /// SHA-256 over the canonical serialization with this field nulled.
  pub checksum: Option<String>,
}

impl QueueSnapshot {
  /// Build a canonical snapshot from cloned queue state.
  fn from_parts(space_key: &str, parts: SnapshotParts) -> Self {
    let mut queue_items = parts.items;
    queue_items.sort_by(|a, b| a.page_id.cmp(&b.page_id));

    let mut processed_page_ids = parts.processed_pages;
    processed_page_ids.sort();
    processed_page_ids.dedup();

    let mut snapshot = Self {
      version: SNAPSHOT_VERSION,
      timestamp: Utc::now(),
      space_key: space_key.to_string(),
      queue_items,
      processed_page_ids,
      metrics: parts.metrics,
      checksum: None,
    };
    snapshot.checksum = Some(snapshot.compute_checksum());
    snapshot
  }

  /// Canonical serialization: pretty JSON with fields in declaration order.
  pub fn serialize_canonical(&self) -> String {
    serde_json::to_string_pretty(self).expect("queue snapshot serialization cannot fail")
  }

  /// Checksum over the canonical serialization with `checksum` nulled.
  pub fn compute_checksum(&self) -> String {
    let mut unsummed = self.clone();
    unsummed.checksum = None;
    sha256_hex(unsummed.serialize_canonical().as_bytes())
  }

  /// Whether the embedded checksum matches the content.
  pub fn checksum_valid(&self) -> bool {
    match &self.checksum {
      Some(stored) => *stored == self.compute_checksum(),
      None => false,
    }
  }

  /// Structural validation: item-level invariants plus
  /// `completed implies processed`.
  pub fn is_structurally_valid(&self) -> bool {
    self.queue_items.iter().all(|item| {
      item.is_valid()
        && (item.status != ItemStatus::Completed || self.processed_page_ids.iter().any(|id| *id == item.page_id))
    })
  }

  fn into_parts(self) -> SnapshotParts {
    SnapshotParts {
      items: self.queue_items,
      processed_pages: self.processed_page_ids,
      metrics: self.metrics,
    }
  }
}

/// How a restore got its state back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMethod {
  /// No snapshot existed; nothing restored.
  NoSnapshot,
  /// The primary snapshot verified cleanly.
  Direct,
  /// The primary snapshot was coerced back into shape.
  Repaired,
  /// A rolling backup verified after the primary failed.
  Backup,
  /// Only the processed set survived; the queue restarted clean.
  Fresh,
}

/// Outcome report for a restore attempt.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
  pub method: RestoreMethod,
  /// Items discarded during repair or fresh recovery.
  pub dropped_items: usize,
  /// Items that made it back into the queue.
  pub recovered_items: usize,
  /// Processed ids carried over.
  pub recovered_processed: usize,
  /// Human-readable notes about what happened.
  pub notes: Vec<String>,
}

impl RecoveryReport {
  fn new(method: RestoreMethod) -> Self {
    Self {
      method,
      dropped_items: 0,
      recovered_items: 0,
      recovered_processed: 0,
      notes: Vec::new(),
    }
  }
}

/// Persist the queue to `.queue-state.json`, rotating the previous snapshot
/// into a timestamped backup.
///
/// # Arguments
/// * `queue` - Queue to snapshot; state is cloned inside its mutex and
///   serialized outside it.
/// * `output_dir` - Export output directory.
/// * `space_key` - Space recorded in the snapshot header.
pub fn persist(queue: &DownloadQueue, output_dir: &Path, space_key: &str) -> Result<()> {
  let snapshot = QueueSnapshot::from_parts(space_key, queue.snapshot_parts());
  let target = output_dir.join(QUEUE_STATE_FILENAME);

  if target.exists() {
    let backup = output_dir.join(format!(
      "{QUEUE_STATE_FILENAME}.backup.{}",
      Utc::now().timestamp_millis()
    ));
    std::fs::copy(&target, &backup)
      .with_context(|| format!("Failed to rotate queue snapshot into {}", backup.display()))?;
    prune_backups(output_dir, queue.config().backup_retention)?;
  }

  fsutil::write_atomic_string(&target, &snapshot.serialize_canonical())?;
  debug!(
    items = snapshot.queue_items.len(),
    processed = snapshot.processed_page_ids.len(),
    "queue snapshot persisted"
  );
  Ok(())
}

/// Restore queue state from disk, repairing or falling back as needed.
///
/// # Returns
/// A [`RecoveryReport`] describing which stage of the recovery sequence
/// produced the restored state. The queue is left empty (aside from any
/// salvaged processed set) when everything fails.
pub fn restore(queue: &DownloadQueue, output_dir: &Path) -> Result<RecoveryReport> {
  let target = output_dir.join(QUEUE_STATE_FILENAME);
  if !target.exists() {
    return Ok(RecoveryReport::new(RestoreMethod::NoSnapshot));
  }

  let raw = std::fs::read_to_string(&target)
    .with_context(|| format!("Failed to read queue snapshot {}", target.display()))?;

  // Stage 1: direct - parse, verify checksum, validate structure.
  if let Ok(snapshot) = serde_json::from_str::<QueueSnapshot>(&raw)
    && snapshot.checksum_valid()
    && snapshot.is_structurally_valid()
  {
    let mut report = RecoveryReport::new(RestoreMethod::Direct);
    report.recovered_items = snapshot.queue_items.len();
    report.recovered_processed = snapshot.processed_page_ids.len();
    queue.load_parts(snapshot.into_parts(), true);
    return Ok(report);
  }

  warn!("queue snapshot failed verification, attempting repair");

  // Stage 2: auto-repair - coerce what can be coerced, drop the rest.
  if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw)
    && let Some((parts, dropped)) = repair_from_value(&value)
  {
    let mut report = RecoveryReport::new(RestoreMethod::Repaired);
    report.dropped_items = dropped;
    report.recovered_items = parts.items.len();
    report.recovered_processed = parts.processed_pages.len();
    report
      .notes
      .push(format!("repaired snapshot, dropped {dropped} invalid items"));
    queue.load_parts(parts, true);
    return Ok(report);
  }

  // Stage 3: backups, newest first.
  for backup in list_backups(output_dir)? {
    let Ok(raw) = std::fs::read_to_string(&backup) else {
      continue;
    };
    if let Ok(snapshot) = serde_json::from_str::<QueueSnapshot>(&raw)
      && snapshot.checksum_valid()
      && snapshot.is_structurally_valid()
    {
      let mut report = RecoveryReport::new(RestoreMethod::Backup);
      report.recovered_items = snapshot.queue_items.len();
      report.recovered_processed = snapshot.processed_page_ids.len();
      report
        .notes
        .push(format!("restored from backup {}", backup.display()));
      queue.load_parts(snapshot.into_parts(), true);
      return Ok(report);
    }
  }

  // Stage 4: fresh queue, salvaging the processed set when possible.
  let mut report = RecoveryReport::new(RestoreMethod::Fresh);
  let processed = salvage_processed_ids(&raw);
  report.recovered_processed = processed.len();
  report
    .notes
    .push("snapshot unrecoverable, starting a fresh queue".to_string());
  queue.load_parts(
    SnapshotParts {
      items: Vec::new(),
      processed_pages: processed,
      metrics: QueueMetrics::default(),
    },
    true,
  );
  Ok(report)
}

/// Coerce a parsed-but-invalid snapshot value back into queue parts.
///
/// Missing per-item fields get defaults; items without a usable `pageId`
/// are dropped and counted.
fn repair_from_value(value: &serde_json::Value) -> Option<(SnapshotParts, usize)> {
  let object = value.as_object()?;

  let raw_items = object.get("queueItems").and_then(|v| v.as_array());
  let mut items = Vec::new();
  let mut dropped = 0;

  if let Some(raw_items) = raw_items {
    for raw in raw_items {
      match coerce_item(raw) {
        Some(item) if item.is_valid() => items.push(item),
        _ => dropped += 1,
      }
    }
  }

  let processed: Vec<String> = object
    .get("processedPageIds")
    .and_then(|v| v.as_array())
    .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
    .unwrap_or_default();

  if items.is_empty() && processed.is_empty() {
    return None;
  }

  let mut metrics: QueueMetrics = object
    .get("metrics")
    .and_then(|v| serde_json::from_value(v.clone()).ok())
    .unwrap_or_default();
  metrics.current_queue_size = items
    .iter()
    .filter(|item| matches!(item.status, ItemStatus::Pending | ItemStatus::Processing))
    .count();

  Some((
    SnapshotParts {
      items,
      processed_pages: processed,
      metrics,
    },
    dropped,
  ))
}

/// Best-effort coercion of one raw queue item, defaulting missing fields.
fn coerce_item(raw: &serde_json::Value) -> Option<QueueItem> {
  let object = raw.as_object()?;
  let page_id = object.get("pageId")?.as_str()?.to_string();

  let mut patched = serde_json::Map::new();
  patched.insert("pageId".into(), serde_json::Value::String(page_id));
  patched.insert(
    "sourceType".into(),
    object.get("sourceType").cloned().unwrap_or_else(|| "reference".into()),
  );
  patched.insert(
    "discoveryTimestamp".into(),
    object.get("discoveryTimestamp").cloned().unwrap_or_else(|| 0.into()),
  );
  patched.insert(
    "retryCount".into(),
    object.get("retryCount").cloned().unwrap_or_else(|| 0.into()),
  );
  patched.insert(
    "status".into(),
    object.get("status").cloned().unwrap_or_else(|| "pending".into()),
  );
  if let Some(parent) = object.get("parentPageId") {
    patched.insert("parentPageId".into(), parent.clone());
  }

  serde_json::from_value(serde_json::Value::Object(patched)).ok()
}

/// Pull processed ids out of an arbitrarily damaged snapshot string.
fn salvage_processed_ids(raw: &str) -> Vec<String> {
  serde_json::from_str::<serde_json::Value>(raw)
    .ok()
    .and_then(|value| {
      value
        .get("processedPageIds")?
        .as_array()
        .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
    })
    .unwrap_or_default()
}

/// Backup snapshot paths, newest first.
fn list_backups(output_dir: &Path) -> Result<Vec<PathBuf>> {
  let prefix = format!("{QUEUE_STATE_FILENAME}.backup.");
  let mut backups = Vec::new();

  if !output_dir.exists() {
    return Ok(backups);
  }

  for entry in std::fs::read_dir(output_dir).context("Failed to list output directory")? {
    let entry = entry?;
    let name = entry.file_name();
    if let Some(name) = name.to_str()
      && name.starts_with(&prefix)
    {
      backups.push(entry.path());
    }
  }

  // Timestamps are fixed-width millis, so lexicographic order works; newest
  // first.
  backups.sort();
  backups.reverse();
  Ok(backups)
}

/// Drop the oldest backups beyond the retention count.
fn prune_backups(output_dir: &Path, retention: usize) -> Result<()> {
  let backups = list_backups(output_dir)?;
  for stale in backups.iter().skip(retention.max(1)) {
    if let Err(err) = std::fs::remove_file(stale) {
      warn!(path = %stale.display(), %err, "failed to prune queue backup");
    }
  }
  Ok(())
}

/// Remove the snapshot and all backups (used by `--fresh`).
pub fn remove_snapshots(output_dir: &Path) -> Result<()> {
  let target = output_dir.join(QUEUE_STATE_FILENAME);
  if target.exists() {
    std::fs::remove_file(&target).with_context(|| format!("Failed to remove {}", target.display()))?;
  }
  for backup in list_backups(output_dir)? {
    std::fs::remove_file(&backup).with_context(|| format!("Failed to remove {}", backup.display()))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;
  use crate::queue::SourceType;

  fn seeded_queue() -> DownloadQueue {
    let queue = DownloadQueue::with_defaults();
    queue.add(QueueItem::new("100", SourceType::Initial));
    queue.add(QueueItem::new("101", SourceType::Reference));
    queue.next();
    queue.mark_processed("100");
    queue
  }

  #[test]
  fn test_snapshot_round_trip_is_byte_identical() {
    let snapshot = QueueSnapshot::from_parts(
      "TEST",
      SnapshotParts {
        items: vec![QueueItem::new("2", SourceType::Macro), QueueItem::new("1", SourceType::Initial)],
        processed_pages: vec!["9".to_string(), "3".to_string()],
        metrics: QueueMetrics::default(),
      },
    );

    let serialized = snapshot.serialize_canonical();
    let parsed: QueueSnapshot = serde_json::from_str(&serialized).unwrap();
    assert_eq!(parsed.serialize_canonical(), serialized);
    assert!(parsed.checksum_valid());
  }

  #[test]
  fn test_snapshot_sorts_items_and_processed_ids() {
    let snapshot = QueueSnapshot::from_parts(
      "TEST",
      SnapshotParts {
        items: vec![QueueItem::new("b", SourceType::Initial), QueueItem::new("a", SourceType::Initial)],
        processed_pages: vec!["z".to_string(), "a".to_string(), "z".to_string()],
        metrics: QueueMetrics::default(),
      },
    );

    let ids: Vec<_> = snapshot.queue_items.iter().map(|i| i.page_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(snapshot.processed_page_ids, vec!["a", "z"]);
  }

  #[test]
  fn test_checksum_detects_tampering() {
    let mut snapshot = QueueSnapshot::from_parts(
      "TEST",
      SnapshotParts {
        items: vec![QueueItem::new("1", SourceType::Initial)],
        processed_pages: vec![],
        metrics: QueueMetrics::default(),
      },
    );
    assert!(snapshot.checksum_valid());

    snapshot.queue_items[0].retry_count = 7;
    assert!(!snapshot.checksum_valid());
  }

  #[test]
  fn test_persist_and_restore_direct() {
    let dir = tempdir().unwrap();
    let queue = seeded_queue();
    persist(&queue, dir.path(), "TEST").unwrap();

    let restored = DownloadQueue::with_defaults();
    let report = restore(&restored, dir.path()).unwrap();

    assert_eq!(report.method, RestoreMethod::Direct);
    assert!(restored.is_processed("100"));
    assert_eq!(restored.next().unwrap().page_id, "101");
  }

  #[test]
  fn test_restore_without_snapshot() {
    let dir = tempdir().unwrap();
    let queue = DownloadQueue::with_defaults();
    let report = restore(&queue, dir.path()).unwrap();
    assert_eq!(report.method, RestoreMethod::NoSnapshot);
  }

  #[test]
  fn test_restore_repairs_items_with_missing_fields() {
    let dir = tempdir().unwrap();
    let damaged = r#"{
      "version": 1,
      "queueItems": [
        {"pageId": "100"},
        {"pageId": "", "status": "pending"},
        {"noPageId": true}
      ],
      "processedPageIds": ["99"]
    }"#;
    std::fs::write(dir.path().join(QUEUE_STATE_FILENAME), damaged).unwrap();

    let queue = DownloadQueue::with_defaults();
    let report = restore(&queue, dir.path()).unwrap();

    assert_eq!(report.method, RestoreMethod::Repaired);
    assert_eq!(report.dropped_items, 2);
    assert_eq!(report.recovered_items, 1);
    assert!(queue.is_processed("99"));
    assert_eq!(queue.next().unwrap().page_id, "100");
  }

  #[test]
  fn test_restore_falls_back_to_backup() {
    let dir = tempdir().unwrap();
    let queue = seeded_queue();
    persist(&queue, dir.path(), "TEST").unwrap();
    // Second persist rotates the good snapshot into a backup.
    persist(&queue, dir.path(), "TEST").unwrap();

    // Corrupt the primary beyond parsing.
    std::fs::write(dir.path().join(QUEUE_STATE_FILENAME), "{not json").unwrap();

    let restored = DownloadQueue::with_defaults();
    let report = restore(&restored, dir.path()).unwrap();

    assert_eq!(report.method, RestoreMethod::Backup);
    assert!(restored.is_processed("100"));
  }

  #[test]
  fn test_restore_fresh_salvages_processed_ids() {
    let dir = tempdir().unwrap();
    // Parseable JSON but with nothing repairable in the queue and no
    // backups; processed ids survive.
    std::fs::write(
      dir.path().join(QUEUE_STATE_FILENAME),
      r#"{"queueItems": "not-an-array", "processedPageIds": ["1", "2"]}"#,
    )
    .unwrap();

    let queue = DownloadQueue::with_defaults();
    let report = restore(&queue, dir.path()).unwrap();

    assert_eq!(report.method, RestoreMethod::Repaired);
    assert_eq!(report.recovered_processed, 2);
    assert!(queue.is_processed("1"));
  }

  #[test]
  fn test_backup_pruning_respects_retention() {
    let dir = tempdir().unwrap();
    let queue = seeded_queue();
    for _ in 0..6 {
      persist(&queue, dir.path(), "TEST").unwrap();
      // Backup names are millisecond-timestamped; space them out.
      std::thread::sleep(std::time::Duration::from_millis(3));
    }

    let backups = list_backups(dir.path()).unwrap();
    assert!(
      backups.len() <= queue.config().backup_retention,
      "expected at most {} backups, found {}",
      queue.config().backup_retention,
      backups.len()
    );
  }

  #[test]
  fn test_remove_snapshots() {
    let dir = tempdir().unwrap();
    let queue = seeded_queue();
    persist(&queue, dir.path(), "TEST").unwrap();
    persist(&queue, dir.path(), "TEST").unwrap();

    remove_snapshots(dir.path()).unwrap();

    assert!(!dir.path().join(QUEUE_STATE_FILENAME).exists());
    assert!(list_backups(dir.path()).unwrap().is_empty());
  }
}
