//! Restricted-page classification and failure thresholds.
//!
//! Pages the API refuses to return are recorded in the manifest without an
//! on-disk file. At the end of a run the accumulated failure counts are
//! checked against the configured thresholds; exceeding any of them turns an
//! otherwise successful run into a content failure.

use std::collections::BTreeMap;

use crate::error::{ErrorKind, ExportError};
use crate::manifest::{EntryStatus, ManifestEntry};

/// Why a page could not be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestrictionKind {
  /// 401/403 on the page itself.
  PermissionDenied,
  /// 404 from the API.
  NotFound,
  /// Page status reports archived.
  Archived,
  /// Page status reports trashed/deleted.
  Deleted,
  /// The whole space is inaccessible.
  RestrictedSpace,
}

impl RestrictionKind {
  /// Manifest status for a page with this restriction.
  pub fn manifest_status(self) -> EntryStatus {
    match self {
      RestrictionKind::PermissionDenied | RestrictionKind::RestrictedSpace => EntryStatus::Denied,
      RestrictionKind::NotFound | RestrictionKind::Archived | RestrictionKind::Deleted => EntryStatus::Removed,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      RestrictionKind::PermissionDenied => "permission_denied",
      RestrictionKind::NotFound => "not_found",
      RestrictionKind::Archived => "archived",
      RestrictionKind::Deleted => "deleted",
      RestrictionKind::RestrictedSpace => "restricted_space",
    }
  }
}

/// Classify a fetch error as a restriction, when it is one.
///
/// Transient and API errors return `None` and stay in the retry path.
pub fn classify_error(error: &ExportError) -> Option<RestrictionKind> {
  match error.kind {
    ErrorKind::Authentication | ErrorKind::Authorization => Some(RestrictionKind::PermissionDenied),
    ErrorKind::NotFound => Some(RestrictionKind::NotFound),
    _ => None,
  }
}

/// Classify a fetched page's status field (`archived`, `trashed`).
pub fn classify_page_status(status: &str) -> Option<RestrictionKind> {
  match status {
    "archived" => Some(RestrictionKind::Archived),
    "trashed" | "deleted" => Some(RestrictionKind::Deleted),
    _ => None,
  }
}

/// One recorded restricted page.
#[derive(Debug, Clone)]
pub struct RestrictedRecord {
  pub page_id: String,
  pub title: String,
  pub kind: RestrictionKind,
}

/// Accumulates restricted pages over a run.
#[derive(Debug, Default)]
pub struct RestrictedPageHandler {
  records: Vec<RestrictedRecord>,
}

impl RestrictedPageHandler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a restricted page and produce its file-less manifest entry.
  pub fn record(&mut self, page_id: &str, title: &str, kind: RestrictionKind) -> ManifestEntry {
    self.records.push(RestrictedRecord {
      page_id: page_id.to_string(),
      title: title.to_string(),
      kind,
    });
    ManifestEntry::without_file(page_id, title, kind.manifest_status())
  }

  pub fn count(&self) -> usize {
    self.records.len()
  }

  /// Per-kind counts for the run summary.
  pub fn summary(&self) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for record in &self.records {
      *counts.entry(record.kind.as_str()).or_insert(0) += 1;
    }
    counts
  }

  pub fn records(&self) -> &[RestrictedRecord] {
    &self.records
  }
}

/// End-of-run failure thresholds.
#[derive(Debug, Clone)]
pub struct FailureThresholds {
  /// Terminal page failures tolerated before the run fails.
  pub max_page_failures: usize,
  /// Absolute attachment failures tolerated.
  pub max_attachment_failures: usize,
  /// Attachment failure percentage tolerated (0-100).
  pub max_attachment_failure_percentage: f64,
  /// When false, restricted pages count against `max_page_failures`.
  pub allow_restricted_pages: bool,
}

impl Default for FailureThresholds {
  fn default() -> Self {
    Self {
      max_page_failures: 0,
      max_attachment_failures: 10,
      max_attachment_failure_percentage: 20.0,
      allow_restricted_pages: true,
    }
  }
}

/// Counters the thresholds are evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureCounts {
  pub page_failures: usize,
  pub restricted_pages: usize,
  pub attachment_failures: usize,
  pub attachment_attempts: usize,
}

impl FailureThresholds {
  /// Evaluate at completion.
  ///
  /// # Returns
  /// `Err` with a description of the first breached threshold, `Ok` when
  /// the run stayed within limits.
  pub fn evaluate(&self, counts: &FailureCounts) -> Result<(), String> {
    let mut page_failures = counts.page_failures;
    if !self.allow_restricted_pages {
      page_failures += counts.restricted_pages;
    }

    if page_failures > self.max_page_failures {
      return Err(format!(
        "{page_failures} page failures exceed the limit of {}",
        self.max_page_failures
      ));
    }

    if counts.attachment_failures > self.max_attachment_failures {
      return Err(format!(
        "{} attachment failures exceed the limit of {}",
        counts.attachment_failures, self.max_attachment_failures
      ));
    }

    if counts.attachment_attempts > 0 {
      let percentage = 100.0 * counts.attachment_failures as f64 / counts.attachment_attempts as f64;
      if percentage > self.max_attachment_failure_percentage {
        return Err(format!(
          "attachment failure rate {percentage:.1}% exceeds the limit of {:.1}%",
          self.max_attachment_failure_percentage
        ));
      }
    }

    Ok(())
  }
}
