//! Rolling-window throughput metrics for the export pipeline.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window over `(time, cumulative count)` samples.
///
/// The processing rate is the slope across the retained window, so a burst
/// followed by a stall decays instead of being averaged over the whole run.
#[derive(Debug)]
pub struct RateWindow {
  window: Duration,
  samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
  /// Create a window retaining samples for `window` of wall time.
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      samples: VecDeque::new(),
    }
  }

  /// Record the current cumulative total.
  pub fn record(&mut self, total: u64) {
    self.record_at(Instant::now(), total);
  }

  fn record_at(&mut self, now: Instant, total: u64) {
    self.samples.push_back((now, total));
    self.prune(now);
  }

  fn prune(&mut self, now: Instant) {
    while let Some((earliest, _)) = self.samples.front()
      && now.duration_since(*earliest) > self.window
      && self.samples.len() > 1
    {
      self.samples.pop_front();
    }
  }

  /// Items per second across the window, or 0.0 with fewer than two samples.
  pub fn rate(&self) -> f64 {
    let (Some((first_t, first_n)), Some((last_t, last_n))) = (self.samples.front(), self.samples.back()) else {
      return 0.0;
    };

    let elapsed = last_t.duration_since(*first_t).as_secs_f64();
    if elapsed <= f64::EPSILON {
      return 0.0;
    }

    (last_n.saturating_sub(*first_n)) as f64 / elapsed
  }

  /// Time since the cumulative total last increased, measured from the
  /// earliest sample at the current total.
  pub fn time_since_progress(&self) -> Option<Duration> {
    let (_, last_n) = self.samples.back()?;
    let reached_at = self.samples.iter().find(|(_, n)| n == last_n).map(|(t, _)| *t)?;
    Some(reached_at.elapsed())
  }
}

/// Counters shared by the queue and the orchestrator summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueMetrics {
  /// Items ever accepted into the queue.
  #[serde(rename = "totalEnqueued")]
  pub total_enqueued: u64,
  /// Items that reached `completed`.
  #[serde(rename = "totalProcessed")]
  pub total_processed: u64,
  /// Items that reached terminal `failed`.
  #[serde(rename = "totalFailed")]
  pub total_failed: u64,
  /// Retry transitions (failed -> pending).
  #[serde(rename = "totalRetries")]
  pub total_retries: u64,
  /// Duplicate adds that were rejected or ignored.
  #[serde(rename = "duplicatesRejected")]
  pub duplicates_rejected: u64,
  /// Re-discoveries of already-processed ids (cycle hits).
  #[serde(rename = "circularReferences")]
  pub circular_references: u64,
  /// Items currently pending or processing.
  #[serde(rename = "currentQueueSize")]
  pub current_queue_size: usize,
}
