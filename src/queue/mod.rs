//! Persistent FIFO download queue.
//!
//! The queue holds unique page ids in discovery order, tracks a processed
//! set so re-discovered ids are no-ops, and keeps retry accounting per item.
//! All state lives behind one mutex; persistence serializes a cloned
//! snapshot outside the critical section so producers are never blocked on
//! disk.

pub mod monitor;
pub mod persistence;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::QueueMetrics;

/// How a page id entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
  /// Seeded from the space root or `--root`.
  Initial,
  /// Emitted by a macro expansion (`children`, `content-by-label`, ...).
  Macro,
  /// Found as an inter-page link in a page body.
  Reference,
  /// Found through a user mention.
  User,
}

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

/// One discovered page awaiting (or done with) processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
  #[serde(rename = "pageId")]
  pub page_id: String,
  #[serde(rename = "sourceType")]
  pub source_type: SourceType,
  /// Unix milliseconds at discovery; FIFO key ahead of insertion order.
  #[serde(rename = "discoveryTimestamp")]
  pub discovery_timestamp: i64,
  #[serde(rename = "retryCount")]
  pub retry_count: u32,
  #[serde(rename = "parentPageId", skip_serializing_if = "Option::is_none")]
  pub parent_page_id: Option<String>,
  pub status: ItemStatus,
}

impl QueueItem {
  /// Create a pending item discovered now.
  pub fn new(page_id: impl Into<String>, source_type: SourceType) -> Self {
    Self {
      page_id: page_id.into(),
      source_type,
      discovery_timestamp: Utc::now().timestamp_millis(),
      retry_count: 0,
      parent_page_id: None,
      status: ItemStatus::Pending,
    }
  }

  /// Same as [`QueueItem::new`] with a known parent page.
  pub fn with_parent(page_id: impl Into<String>, source_type: SourceType, parent: impl Into<String>) -> Self {
    let mut item = Self::new(page_id, source_type);
    item.parent_page_id = Some(parent.into());
    item
  }

  /// Per-item structural validation used during snapshot repair.
  pub fn is_valid(&self) -> bool {
    !self.page_id.is_empty() && self.discovery_timestamp >= 0
  }
}

/// Coarse state of the queue as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
  /// Nothing was ever added.
  Empty,
  /// Items are waiting, none in flight.
  Populated,
  /// At least one item is in flight.
  Processing,
  /// Everything that was added is completed or terminally failed.
  Drained,
  /// Restore failed and recovery could not produce a usable queue.
  Failed,
  /// Restored from an interrupted run's snapshot.
  Interrupted,
}

/// Outcome of an [`DownloadQueue::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
  /// Accepted as a new pending item.
  Added,
  /// The id is already tracked in the queue.
  Duplicate,
  /// The id was processed earlier; silently ignored.
  AlreadyProcessed,
  /// The pending+processing population is at `max_queue_size`.
  QueueFull,
}

/// Tunables for the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
  /// Soft cap on pending+processing items.
  pub max_queue_size: usize,
  /// Persist after this many state changes.
  pub persistence_threshold: u64,
  /// Rolling snapshot backups to retain.
  pub backup_retention: usize,
  /// Retries before an item fails terminally.
  pub max_retries: u32,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_queue_size: 10_000,
      persistence_threshold: 25,
      backup_retention: 3,
      max_retries: 3,
    }
  }
}

#[derive(Debug, Default)]
struct QueueInner {
  items: HashMap<String, QueueItem>,
  processing_order: VecDeque<String>,
  processed_pages: HashSet<String>,
  metrics: QueueMetrics,
  /// State changes since the last persist; compared against the threshold.
  dirty_changes: u64,
  restored_interrupted: bool,
}

/// The persistent download queue.
#[derive(Debug)]
pub struct DownloadQueue {
  config: QueueConfig,
  inner: Mutex<QueueInner>,
}

impl DownloadQueue {
  pub fn new(config: QueueConfig) -> Self {
    Self {
      config,
      inner: Mutex::new(QueueInner::default()),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(QueueConfig::default())
  }

  pub fn config(&self) -> &QueueConfig {
    &self.config
  }

  /// Add a single discovered item.
  ///
  /// Re-adding an id in the processed set is a silent no-op (this is the
  /// cycle guard); re-adding an id already tracked is a duplicate; and a
  /// pending+processing population at the cap rejects with
  /// [`AddOutcome::QueueFull`].
  pub fn add(&self, item: QueueItem) -> AddOutcome {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");
    Self::add_locked(&mut inner, &self.config, item)
  }

  /// Add a batch, returning the per-item outcomes in input order.
  pub fn add_all(&self, items: Vec<QueueItem>) -> Vec<AddOutcome> {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");
    items
      .into_iter()
      .map(|item| Self::add_locked(&mut inner, &self.config, item))
      .collect()
  }

  fn add_locked(inner: &mut QueueInner, config: &QueueConfig, item: QueueItem) -> AddOutcome {
    if inner.processed_pages.contains(&item.page_id) {
      inner.metrics.circular_references += 1;
      return AddOutcome::AlreadyProcessed;
    }
    if inner.items.contains_key(&item.page_id) {
      inner.metrics.duplicates_rejected += 1;
      return AddOutcome::Duplicate;
    }
    if Self::active_count(inner) >= config.max_queue_size {
      debug!(page_id = %item.page_id, "queue full, rejecting item");
      return AddOutcome::QueueFull;
    }

    inner.processing_order.push_back(item.page_id.clone());
    inner.items.insert(item.page_id.clone(), item);
    inner.metrics.total_enqueued += 1;
    inner.metrics.current_queue_size = Self::active_count(inner);
    inner.dirty_changes += 1;
    AddOutcome::Added
  }

  /// Pop the oldest pending item and mark it `processing` atomically.
  ///
  /// FIFO is keyed on `discovery_timestamp` with insertion order as the
  /// tiebreaker; both are captured by `processing_order`, so a front-to-back
  /// scan for the first pending id suffices.
  pub fn next(&self) -> Option<QueueItem> {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");

    let page_id = inner
      .processing_order
      .iter()
      .find(|id| {
        inner
          .items
          .get(id.as_str())
          .is_some_and(|item| item.status == ItemStatus::Pending)
      })?
      .clone();

    let item = inner.items.get_mut(&page_id).expect("ordered id must exist in items");
    item.status = ItemStatus::Processing;
    inner.dirty_changes += 1;
    Some(inner.items[&page_id].clone())
  }

  /// Transition `processing -> completed` and publish the id to the
  /// processed set.
  pub fn mark_processed(&self, page_id: &str) {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");

    if let Some(item) = inner.items.get_mut(page_id) {
      item.status = ItemStatus::Completed;
    }
    inner.processing_order.retain(|id| id != page_id);
    inner.processed_pages.insert(page_id.to_string());
    inner.metrics.total_processed += 1;
    inner.metrics.current_queue_size = Self::active_count(&inner);
    inner.dirty_changes += 1;
  }

  /// Record a failure for an item.
  ///
  /// Retryable failures below the retry cap re-queue the item at the tail
  /// with a fresh discovery timestamp; anything else is terminal.
  ///
  /// # Arguments
  /// * `page_id` - Item that failed.
  /// * `retryable` - Whether the underlying error is worth retrying.
  ///
  /// # Returns
  /// `true` when the item was re-queued, `false` when it failed terminally.
  pub fn mark_failed(&self, page_id: &str, retryable: bool) -> bool {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");
    let max_retries = self.config.max_retries;

    let Some(item) = inner.items.get_mut(page_id) else {
      return false;
    };

    item.retry_count += 1;
    let requeue = retryable && item.retry_count < max_retries;

    if requeue {
      item.status = ItemStatus::Pending;
      item.discovery_timestamp = Utc::now().timestamp_millis();
      inner.processing_order.retain(|id| id != page_id);
      inner.processing_order.push_back(page_id.to_string());
      inner.metrics.total_retries += 1;
    } else {
      item.status = ItemStatus::Failed;
      inner.processing_order.retain(|id| id != page_id);
      inner.metrics.total_failed += 1;
    }

    inner.metrics.current_queue_size = Self::active_count(&inner);
    inner.dirty_changes += 1;
    requeue
  }

  /// Number of pending + processing items.
  pub fn size(&self) -> usize {
    let inner = self.inner.lock().expect("queue mutex poisoned");
    Self::active_count(&inner)
  }

  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  pub fn is_processed(&self, page_id: &str) -> bool {
    let inner = self.inner.lock().expect("queue mutex poisoned");
    inner.processed_pages.contains(page_id)
  }

  pub fn metrics(&self) -> QueueMetrics {
    let inner = self.inner.lock().expect("queue mutex poisoned");
    inner.metrics.clone()
  }

  /// Ids of items that failed terminally.
  pub fn failed_ids(&self) -> Vec<String> {
    let inner = self.inner.lock().expect("queue mutex poisoned");
    let mut ids: Vec<_> = inner
      .items
      .values()
      .filter(|item| item.status == ItemStatus::Failed)
      .map(|item| item.page_id.clone())
      .collect();
    ids.sort();
    ids
  }

  /// Coarse queue state.
  pub fn state(&self) -> QueueState {
    let inner = self.inner.lock().expect("queue mutex poisoned");

    if inner.restored_interrupted && Self::active_count(&inner) > 0 {
      return QueueState::Interrupted;
    }
    if inner.items.is_empty() && inner.processed_pages.is_empty() {
      return QueueState::Empty;
    }

    let processing = inner
      .items
      .values()
      .any(|item| item.status == ItemStatus::Processing);
    if processing {
      QueueState::Processing
    } else if inner
      .items
      .values()
      .any(|item| item.status == ItemStatus::Pending)
    {
      QueueState::Populated
    } else {
      QueueState::Drained
    }
  }

  /// Whether enough state changes accumulated to justify a persist.
  pub fn should_persist(&self) -> bool {
    let inner = self.inner.lock().expect("queue mutex poisoned");
    inner.dirty_changes >= self.config.persistence_threshold
  }

  /// Clone the state needed for a snapshot and reset the change counter.
  ///
  /// Serialization and disk IO happen on the returned clone, outside the
  /// queue mutex.
  pub(crate) fn snapshot_parts(&self) -> SnapshotParts {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");
    inner.dirty_changes = 0;
    SnapshotParts {
      items: inner.items.values().cloned().collect(),
      processed_pages: inner.processed_pages.iter().cloned().collect(),
      metrics: inner.metrics.clone(),
    }
  }

  /// Replace in-memory state from a restored snapshot.
  ///
  /// Items restored in `processing` state go back to `pending`: their worker
  /// died with the previous run.
  pub(crate) fn load_parts(&self, parts: SnapshotParts, interrupted: bool) {
    let mut inner = self.inner.lock().expect("queue mutex poisoned");

    let mut items: Vec<QueueItem> = parts.items;
    items.sort_by(|a, b| {
      a.discovery_timestamp
        .cmp(&b.discovery_timestamp)
        .then_with(|| a.page_id.cmp(&b.page_id))
    });

    inner.items.clear();
    inner.processing_order.clear();
    for mut item in items {
      if item.status == ItemStatus::Processing {
        item.status = ItemStatus::Pending;
      }
      if matches!(item.status, ItemStatus::Pending) {
        inner.processing_order.push_back(item.page_id.clone());
      }
      inner.items.insert(item.page_id.clone(), item);
    }

    inner.processed_pages = parts.processed_pages.into_iter().collect();
    // Completed items must appear in the processed set (snapshot repair
    // enforces the same rule).
    let completed: Vec<String> = inner
      .items
      .values()
      .filter(|item| item.status == ItemStatus::Completed)
      .map(|item| item.page_id.clone())
      .collect();
    inner.processed_pages.extend(completed);

    inner.metrics = parts.metrics;
    inner.metrics.current_queue_size = Self::active_count(&inner);
    inner.dirty_changes = 0;
    inner.restored_interrupted = interrupted;
  }

  fn active_count(inner: &QueueInner) -> usize {
    inner
      .items
      .values()
      .filter(|item| matches!(item.status, ItemStatus::Pending | ItemStatus::Processing))
      .count()
  }
}

/// Cloned queue state handed to the persistence layer.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotParts {
  pub items: Vec<QueueItem>,
  pub processed_pages: Vec<String>,
  pub metrics: QueueMetrics,
}
