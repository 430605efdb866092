//! Queue health monitoring.
//!
//! Evaluates queue metrics against configured thresholds, derives a health
//! score from the active alerts, and rate-limits alert emission so a stuck
//! queue does not flood the log.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::metrics::QueueMetrics;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertLevel {
  Warning,
  Critical,
}

/// What tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
  /// Queue at or above the hard cap.
  QueueFull,
  /// Queue above the warning ratio of the cap.
  QueueNearCapacity,
  /// Items are waiting but throughput fell below the floor.
  SlowProcessing,
  /// No completion for longer than the stall timeout.
  Stalled,
  /// Two consecutive snapshot persists failed.
  PersistenceFailing,
}

/// One emitted alert.
#[derive(Debug, Clone)]
pub struct Alert {
  pub kind: AlertKind,
  pub level: AlertLevel,
  pub message: String,
}

/// Monitoring thresholds.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
  /// Mirror of the queue's hard cap.
  pub max_queue_size: usize,
  /// Fraction of the cap that triggers a warning.
  pub warning_ratio: f64,
  /// Items/second below which processing counts as slow.
  pub min_processing_rate: f64,
  /// No completed item for this long counts as stalled.
  pub stalled_timeout: Duration,
  /// Minimum gap between two alerts of the same kind.
  pub alert_cooldown: Duration,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      max_queue_size: 10_000,
      warning_ratio: 0.9,
      min_processing_rate: 0.1,
      stalled_timeout: Duration::from_secs(300),
      alert_cooldown: Duration::from_secs(60),
    }
  }
}

/// Stateful monitor owned by the orchestrator.
#[derive(Debug)]
pub struct QueueMonitor {
  config: MonitorConfig,
  last_emitted: HashMap<AlertKind, Instant>,
  last_progress: Instant,
  last_processed_total: u64,
  consecutive_persist_failures: u32,
}

impl QueueMonitor {
  pub fn new(config: MonitorConfig) -> Self {
    Self {
      config,
      last_emitted: HashMap::new(),
      last_progress: Instant::now(),
      last_processed_total: 0,
      consecutive_persist_failures: 0,
    }
  }

  /// Record the outcome of a snapshot persist attempt.
  pub fn record_persist(&mut self, succeeded: bool) {
    if succeeded {
      self.consecutive_persist_failures = 0;
    } else {
      self.consecutive_persist_failures += 1;
    }
  }

  /// Evaluate thresholds against current metrics.
  ///
  /// # Arguments
  /// * `metrics` - Snapshot of queue counters.
  /// * `processing_rate` - Items/second from the rolling window.
  ///
  /// # Returns
  /// Alerts that are due (respecting the per-kind cooldown). Each alert is
  /// also logged at warn level.
  pub fn evaluate(&mut self, metrics: &QueueMetrics, processing_rate: f64) -> Vec<Alert> {
    if metrics.total_processed > self.last_processed_total {
      self.last_processed_total = metrics.total_processed;
      self.last_progress = Instant::now();
    }

    let mut due = Vec::new();

    if metrics.current_queue_size >= self.config.max_queue_size {
      due.push(Alert {
        kind: AlertKind::QueueFull,
        level: AlertLevel::Critical,
        message: format!(
          "queue size {} reached the cap of {}",
          metrics.current_queue_size, self.config.max_queue_size
        ),
      });
    } else if (metrics.current_queue_size as f64) >= self.config.warning_ratio * self.config.max_queue_size as f64 {
      due.push(Alert {
        kind: AlertKind::QueueNearCapacity,
        level: AlertLevel::Warning,
        message: format!(
          "queue size {} is above {:.0}% of the cap",
          metrics.current_queue_size,
          self.config.warning_ratio * 100.0
        ),
      });
    }

    if metrics.current_queue_size > 0 && processing_rate < self.config.min_processing_rate {
      due.push(Alert {
        kind: AlertKind::SlowProcessing,
        level: AlertLevel::Warning,
        message: format!(
          "processing rate {processing_rate:.2}/s is below the {:.2}/s floor",
          self.config.min_processing_rate
        ),
      });
    }

    if metrics.current_queue_size > 0 && self.last_progress.elapsed() >= self.config.stalled_timeout {
      due.push(Alert {
        kind: AlertKind::Stalled,
        level: AlertLevel::Critical,
        message: format!(
          "no item completed for {}s with {} items queued",
          self.last_progress.elapsed().as_secs(),
          metrics.current_queue_size
        ),
      });
    }

    if self.consecutive_persist_failures >= 2 {
      due.push(Alert {
        kind: AlertKind::PersistenceFailing,
        level: AlertLevel::Critical,
        message: format!(
          "{} consecutive queue snapshot failures, continuing in memory",
          self.consecutive_persist_failures
        ),
      });
    }

    let now = Instant::now();
    due.retain(|alert| {
      let emit = self
        .last_emitted
        .get(&alert.kind)
        .is_none_or(|last| now.duration_since(*last) >= self.config.alert_cooldown);
      if emit {
        self.last_emitted.insert(alert.kind, now);
        warn!(kind = ?alert.kind, level = ?alert.level, "{}", alert.message);
      }
      emit
    });

    due
  }

  /// Health in `[0.0, 1.0]`: 1.0 with no active alerts, reduced by 0.15 per
  /// warning and 0.4 per critical.
  pub fn health_score(&self, alerts: &[Alert]) -> f64 {
    let penalty: f64 = alerts
      .iter()
      .map(|alert| match alert.level {
        AlertLevel::Warning => 0.15,
        AlertLevel::Critical => 0.4,
      })
      .sum();
    (1.0 - penalty).max(0.0)
  }
}
