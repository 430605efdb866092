//! Resume guard: classifies prior export state and enforces explicit
//! `--resume` / `--fresh` choices before touching the output directory.

use std::path::Path;

use anyhow::Result;

use crate::journal::ResumeJournal;
use crate::queue::persistence;
use crate::sentinel::{CompletedSentinel, InProgressSentinel};

/// Prior state of the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorState {
  /// No sentinel, no completed marker.
  Fresh,
  /// In-progress sentinel without a completed marker: a run died here.
  Interrupted,
  /// A completed marker exists (an in-progress sentinel may too, from a
  /// run that crashed after finishing a previous one).
  CompletedPrior,
}

/// How the export should proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  /// No prior state; start normally.
  Normal,
  /// Continue from journal + queue snapshot.
  Resume,
  /// Discard all prior state and start over.
  Fresh,
}

/// Outcome of validating the flags against prior state.
#[derive(Debug, Clone)]
pub struct GuardDecision {
  pub state: PriorState,
  pub mode: RunMode,
  /// When set, the export must not start; `message` says why.
  pub should_abort: bool,
  pub message: String,
}

/// Classify the output directory from its sentinel files.
pub fn classify(output_dir: &Path) -> PriorState {
  if CompletedSentinel::exists(output_dir) {
    PriorState::CompletedPrior
  } else if InProgressSentinel::exists(output_dir) {
    PriorState::Interrupted
  } else {
    PriorState::Fresh
  }
}

/// Validate the requested mode against the directory's prior state.
///
/// # Arguments
/// * `output_dir` - Export output directory.
/// * `resume` - `--resume` was passed.
/// * `fresh` - `--fresh` was passed.
///
/// # Returns
/// A [`GuardDecision`]; callers abort with exit code 4 when `should_abort`
/// is set, after printing `message`.
pub fn validate(output_dir: &Path, resume: bool, fresh: bool) -> Result<GuardDecision> {
  let state = classify(output_dir);

  let decision = match (state, resume, fresh) {
    (_, true, true) => GuardDecision {
      state,
      mode: RunMode::Normal,
      should_abort: true,
      message: "--resume and --fresh are mutually exclusive".to_string(),
    },
    (PriorState::Fresh, false, _) => GuardDecision {
      state,
      mode: if fresh { RunMode::Fresh } else { RunMode::Normal },
      should_abort: false,
      message: String::new(),
    },
    (PriorState::Fresh, true, false) => GuardDecision {
      state,
      mode: RunMode::Normal,
      should_abort: true,
      message: "Nothing to resume: no prior export state found".to_string(),
    },
    (PriorState::Interrupted, false, false) => {
      let detail = interrupted_detail(output_dir)?;
      GuardDecision {
        state,
        mode: RunMode::Normal,
        should_abort: true,
        message: format!(
          "A previous export of this directory was interrupted{detail}. \
           Pass --resume to continue it or --fresh to discard it."
        ),
      }
    }
    (PriorState::Interrupted, true, false) => GuardDecision {
      state,
      mode: RunMode::Resume,
      should_abort: false,
      message: String::new(),
    },
    (PriorState::Interrupted, false, true) => GuardDecision {
      state,
      mode: RunMode::Fresh,
      should_abort: false,
      message: String::new(),
    },
    (PriorState::CompletedPrior, true, false) => GuardDecision {
      state,
      mode: RunMode::Normal,
      should_abort: true,
      message: "The previous export completed; there is nothing to resume. Use --fresh to re-export.".to_string(),
    },
    (PriorState::CompletedPrior, false, true) => GuardDecision {
      state,
      mode: RunMode::Fresh,
      should_abort: false,
      message: String::new(),
    },
    (PriorState::CompletedPrior, false, false) => GuardDecision {
      state,
      mode: RunMode::Normal,
      should_abort: true,
      message: "This directory holds a completed export. Use --fresh to re-export into it.".to_string(),
    },
  };

  Ok(decision)
}

/// Describe why the interrupted run stopped, when the sentinel says.
fn interrupted_detail(output_dir: &Path) -> Result<String> {
  let Some(sentinel) = InProgressSentinel::read(output_dir).unwrap_or(None) else {
    return Ok(String::new());
  };

  let mut detail = format!(" at {}", sentinel.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
  if let Some(signal) = sentinel.signal {
    detail.push_str(&format!(" by signal {signal}"));
  }
  Ok(detail)
}

/// Remove all prior state for a `--fresh` run: sentinels, journal, and queue
/// snapshots (including backups).
pub fn clear_prior_state(output_dir: &Path) -> Result<()> {
  InProgressSentinel::remove(output_dir)?;
  CompletedSentinel::remove(output_dir)?;
  ResumeJournal::remove(output_dir)?;
  persistence::remove_snapshots(output_dir)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn test_fresh_directory_runs_normally() {
    let dir = tempdir().unwrap();
    let decision = validate(dir.path(), false, false).unwrap();
    assert_eq!(decision.state, PriorState::Fresh);
    assert_eq!(decision.mode, RunMode::Normal);
    assert!(!decision.should_abort);
  }

  #[test]
  fn test_interrupted_requires_explicit_mode() {
    let dir = tempdir().unwrap();
    InProgressSentinel::new("TEST").write(dir.path()).unwrap();

    let decision = validate(dir.path(), false, false).unwrap();
    assert_eq!(decision.state, PriorState::Interrupted);
    assert!(decision.should_abort);
    assert!(decision.message.contains("--resume"));

    let resume = validate(dir.path(), true, false).unwrap();
    assert_eq!(resume.mode, RunMode::Resume);
    assert!(!resume.should_abort);

    let fresh = validate(dir.path(), false, true).unwrap();
    assert_eq!(fresh.mode, RunMode::Fresh);
    assert!(!fresh.should_abort);
  }

  #[test]
  fn test_resume_on_completed_aborts() {
    let dir = tempdir().unwrap();
    CompletedSentinel::new("done").write(dir.path()).unwrap();

    let decision = validate(dir.path(), true, false).unwrap();
    assert_eq!(decision.state, PriorState::CompletedPrior);
    assert!(decision.should_abort);
  }

  #[test]
  fn test_fresh_on_completed_is_allowed() {
    let dir = tempdir().unwrap();
    CompletedSentinel::new("done").write(dir.path()).unwrap();

    let decision = validate(dir.path(), false, true).unwrap();
    assert_eq!(decision.mode, RunMode::Fresh);
    assert!(!decision.should_abort);
  }

  #[test]
  fn test_mutually_exclusive_flags_abort() {
    let dir = tempdir().unwrap();
    let decision = validate(dir.path(), true, true).unwrap();
    assert!(decision.should_abort);
  }

  #[test]
  fn test_resume_with_no_state_aborts() {
    let dir = tempdir().unwrap();
    let decision = validate(dir.path(), true, false).unwrap();
    assert!(decision.should_abort);
    assert!(decision.message.contains("Nothing to resume"));
  }

  #[test]
  fn test_clear_prior_state_removes_everything() {
    let dir = tempdir().unwrap();
    InProgressSentinel::new("TEST").write(dir.path()).unwrap();
    CompletedSentinel::new("done").write(dir.path()).unwrap();
    ResumeJournal::new("TEST").save(dir.path()).unwrap();

    clear_prior_state(dir.path()).unwrap();

    assert_eq!(classify(dir.path()), PriorState::Fresh);
    assert!(ResumeJournal::load(dir.path()).unwrap().is_none());
  }
}
