//! Error taxonomy shared across the export pipeline.
//!
//! Every failure observable by the core is classified into an [`ErrorKind`]
//! carrying a retryability flag and a severity, so the orchestrator, the
//! restricted-page handler, and the final summary all agree on what a given
//! failure means.

use thiserror::Error;

/// Broad classification of an export failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// DNS, connect, or read failures below the HTTP layer.
  Network,
  /// A request or phase exceeded its deadline.
  Timeout,
  /// HTTP 429 from the Confluence API.
  RateLimit,
  /// HTTP 401 - credentials rejected.
  Authentication,
  /// HTTP 403 - credentials valid but access denied.
  Authorization,
  /// HTTP 404 - page or attachment missing.
  NotFound,
  /// Malformed storage format or otherwise unconvertible content.
  Content,
  /// Local IO failure (ENOSPC, EACCES, ...).
  Filesystem,
  /// Invalid or missing configuration.
  Configuration,
  /// Structural validation of an artifact failed.
  Validation,
  /// Anything that could not be classified.
  Unknown,
}

/// How serious a failure of this kind is for the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
}

impl ErrorKind {
  /// Whether a failure of this kind is worth retrying.
  pub fn is_retryable(self) -> bool {
    matches!(
      self,
      ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Unknown
    )
  }

  /// Severity used when ranking failures in the final summary.
  pub fn severity(self) -> Severity {
    match self {
      ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit => Severity::Low,
      ErrorKind::NotFound | ErrorKind::Content | ErrorKind::Unknown => Severity::Medium,
      ErrorKind::Authentication
      | ErrorKind::Authorization
      | ErrorKind::Filesystem
      | ErrorKind::Configuration
      | ErrorKind::Validation => Severity::High,
    }
  }

  /// Short remediation hint surfaced in the failure summary.
  pub fn remediation(self) -> &'static str {
    match self {
      ErrorKind::Network => "check network connectivity to the Confluence instance",
      ErrorKind::Timeout => "increase --timeout or reduce --concurrency",
      ErrorKind::RateLimit => "lower --concurrency or the client rate limit",
      ErrorKind::Authentication => "verify CONFLUENCE_USERNAME / CONFLUENCE_PASSWORD",
      ErrorKind::Authorization => "the account lacks permission for some pages",
      ErrorKind::NotFound => "pages may have been deleted or archived since discovery",
      ErrorKind::Content => "the page body could not be parsed; export it manually",
      ErrorKind::Filesystem => "check free disk space and directory permissions",
      ErrorKind::Configuration => "fix the reported configuration value",
      ErrorKind::Validation => "the export state is inconsistent; rerun with --fresh",
      ErrorKind::Unknown => "rerun with --log-level debug for details",
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      ErrorKind::Network => "network",
      ErrorKind::Timeout => "timeout",
      ErrorKind::RateLimit => "rate_limit",
      ErrorKind::Authentication => "authentication",
      ErrorKind::Authorization => "authorization",
      ErrorKind::NotFound => "not_found",
      ErrorKind::Content => "content",
      ErrorKind::Filesystem => "filesystem",
      ErrorKind::Configuration => "configuration",
      ErrorKind::Validation => "validation",
      ErrorKind::Unknown => "unknown",
    };
    f.write_str(name)
  }
}

/// A classified export failure.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ExportError {
  /// Classification used for retry and threshold decisions.
  pub kind: ErrorKind,
  /// Human-readable description of what went wrong.
  pub message: String,
  /// HTTP status when the failure came from the Confluence API.
  pub status: Option<u16>,
  /// Server-requested delay in milliseconds from a 429 `Retry-After`.
  pub retry_after_ms: Option<u64>,
}

impl ExportError {
  /// Build an error of the given kind with a message.
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      status: None,
      retry_after_ms: None,
    }
  }

  /// Build an error classified from an HTTP status code.
  ///
  /// # Arguments
  /// * `status` - HTTP status returned by the Confluence API.
  /// * `message` - Description, typically the response body.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    Self {
      kind: classify_status(status),
      message: message.into(),
      status: Some(status),
      retry_after_ms: None,
    }
  }

  /// Attach a server-requested retry delay (429 `Retry-After`).
  pub fn with_retry_after_ms(mut self, millis: u64) -> Self {
    self.retry_after_ms = Some(millis);
    self
  }

  /// Whether the orchestrator should retry the operation that produced this
  /// error.
  pub fn is_retryable(&self) -> bool {
    self.kind.is_retryable()
  }

  pub fn severity(&self) -> Severity {
    self.kind.severity()
  }
}

impl From<reqwest::Error> for ExportError {
  fn from(err: reqwest::Error) -> Self {
    let kind = if err.is_timeout() {
      ErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
      ErrorKind::Network
    } else if err.is_decode() {
      ErrorKind::Content
    } else if let Some(status) = err.status() {
      return ExportError::from_status(status.as_u16(), err.to_string());
    } else {
      ErrorKind::Unknown
    };
    ExportError::new(kind, err.to_string())
  }
}

impl From<std::io::Error> for ExportError {
  fn from(err: std::io::Error) -> Self {
    ExportError::new(ErrorKind::Filesystem, err.to_string())
  }
}

/// Map an HTTP status to an [`ErrorKind`].
pub fn classify_status(status: u16) -> ErrorKind {
  match status {
    401 => ErrorKind::Authentication,
    403 => ErrorKind::Authorization,
    404 => ErrorKind::NotFound,
    429 => ErrorKind::RateLimit,
    408 | 504 => ErrorKind::Timeout,
    500..=599 => ErrorKind::Network,
    _ => ErrorKind::Unknown,
  }
}
