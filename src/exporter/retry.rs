//! Exponential backoff with jitter for page and attachment fetches.

use std::time::Duration;

/// Retry tunables for API calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
  /// Attempts after the first failure.
  pub max_retries: u32,
  /// Delay before the first retry.
  pub base_delay: Duration,
  /// Cap applied to every delay, including server-requested ones.
  pub max_delay: Duration,
  /// Jitter factor: a delay of `d` becomes `d * (1-jitter ..= 1+jitter)`.
  pub jitter: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(30),
      jitter: 0.3,
    }
  }
}

/// Delay before retry number `attempt` (1-indexed).
///
/// A server-requested `Retry-After` is used verbatim (clamped to
/// `max_delay`) instead of the computed backoff; jitter only applies to
/// computed delays.
///
/// # Arguments
/// * `config` - Retry tunables.
/// * `attempt` - 1 for the first retry, doubling the delay each step.
/// * `retry_after_ms` - Server-requested delay from a 429, if any.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
  if let Some(millis) = retry_after_ms {
    return Duration::from_millis(millis).min(config.max_delay);
  }

  let pow = attempt.saturating_sub(1).min(16);
  let delay = config.base_delay.saturating_mul(2_u32.saturating_pow(pow));
  let capped = delay.min(config.max_delay);

  if config.jitter > 0.0 {
    apply_jitter(capped, config.jitter)
  } else {
    capped
  }
}

/// Scale a delay by a random factor in `[1 - jitter, 1 + jitter]`.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
  use rand::Rng;

  let mut rng = rand::rng();
  let random_value: f64 = rng.random();
  let random_factor = 1.0 - jitter + (random_value * 2.0 * jitter);
  let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
  Duration::from_millis(millis)
}
