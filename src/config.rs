//! Configuration resolution.
//!
//! Settings come from three layers with CLI flags (and their env-var
//! fallbacks, which clap applies) taking precedence over the optional JSON
//! config file, which takes precedence over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;
use crate::exporter::restricted::FailureThresholds;
use crate::exporter::retry::RetryConfig;
use crate::exporter::ExportConfig;
use crate::queue::QueueConfig;

/// Optional JSON config file (`--config <path>`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
  pub base_url: Option<String>,
  pub username: Option<String>,
  pub password: Option<String>,
  pub space: Option<String>,
  pub out: Option<PathBuf>,
  pub concurrency: Option<usize>,
  pub rate_limit: Option<usize>,
  pub timeout_secs: Option<u64>,
  pub max_retries: Option<u32>,
  pub attachment_threshold: Option<f64>,
  pub allow_restricted_pages: Option<bool>,
  pub max_page_failures: Option<usize>,
  pub download_attachments: Option<bool>,
}

impl FileConfig {
  /// Load and parse a config file.
  pub fn load(path: &Path) -> Result<Self> {
    let content =
      std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
  }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
  pub base_url: String,
  pub username: String,
  pub password: String,
  pub space_key: String,
  pub output_dir: PathBuf,
  pub root_page_id: Option<String>,
  pub concurrency: usize,
  pub rate_limit: usize,
  pub timeout_secs: u64,
  pub dry_run: bool,
  pub resume: bool,
  pub fresh: bool,
  pub export: ExportConfig,
}

impl Settings {
  /// Merge CLI arguments with an optional config file.
  ///
  /// # Errors
  /// Returns a usage-style error (exit code 2 territory) when a required
  /// value is missing after all layers are merged.
  pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self, String> {
    let base_url = cli
      .auth
      .base_url
      .clone()
      .or(file.base_url)
      .ok_or("Confluence base URL is required (--base-url or CONFLUENCE_BASE_URL)")?;
    let username = cli
      .auth
      .username
      .clone()
      .or(file.username)
      .ok_or("Confluence username is required (--username or CONFLUENCE_USERNAME)")?;
    let password = cli
      .auth
      .password
      .clone()
      .or(file.password)
      .ok_or("Confluence password is required (--password or CONFLUENCE_PASSWORD)")?;
    let space_key = cli
      .space
      .clone()
      .or(file.space)
      .ok_or("A space key is required (--space)")?;

    let output_dir = cli
      .out
      .clone()
      .or(file.out)
      .unwrap_or_else(|| PathBuf::from("./confluence-export"));

    let concurrency = cli.concurrency.or(file.concurrency).unwrap_or(5);
    if concurrency == 0 {
      return Err("--concurrency must be at least 1".to_string());
    }

    let rate_limit = cli.performance.rate_limit.or(file.rate_limit).unwrap_or(10);
    let timeout_secs = cli.performance.timeout.or(file.timeout_secs).unwrap_or(30);

    let attachment_threshold = cli
      .attachment_threshold
      .or(file.attachment_threshold)
      .unwrap_or(20.0);
    if !(0.0..=100.0).contains(&attachment_threshold) {
      return Err("--attachment-threshold must be between 0 and 100".to_string());
    }

    let thresholds = FailureThresholds {
      max_page_failures: file.max_page_failures.unwrap_or(0),
      max_attachment_failure_percentage: attachment_threshold,
      allow_restricted_pages: file.allow_restricted_pages.unwrap_or(true),
      ..FailureThresholds::default()
    };

    let retry = RetryConfig {
      max_retries: file.max_retries.unwrap_or(3),
      ..RetryConfig::default()
    };

    let mut export = ExportConfig::new(&base_url, &space_key, &output_dir);
    export.root_page_id = cli.root.clone();
    export.concurrency_limit = concurrency;
    export.dry_run = cli.dry_run;
    export.download_attachments = file.download_attachments.unwrap_or(true);
    export.retry = retry;
    export.queue = QueueConfig::default();
    export.thresholds = thresholds;
    export.pause_between_phases = Duration::from_millis(50);

    Ok(Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      username,
      password,
      space_key,
      output_dir,
      root_page_id: cli.root.clone(),
      concurrency,
      rate_limit,
      timeout_secs,
      dry_run: cli.dry_run,
      resume: cli.resume,
      fresh: cli.fresh,
      export,
    })
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;
  use tempfile::tempdir;

  use super::*;

  fn cli(args: &[&str]) -> Cli {
    let mut full = vec!["confluence-export"];
    full.extend(args);
    Cli::try_parse_from(full).unwrap()
  }

  fn base_args<'a>() -> Vec<&'a str> {
    vec![
      "--space",
      "TEST",
      "--base-url",
      "https://example.atlassian.net",
      "--username",
      "user@example.com",
      "--password",
      "token",
    ]
  }

  #[test]
  fn test_resolve_with_defaults() {
    let settings = Settings::resolve(&cli(&base_args()), FileConfig::default()).unwrap();
    assert_eq!(settings.space_key, "TEST");
    assert_eq!(settings.concurrency, 5);
    assert_eq!(settings.rate_limit, 10);
    assert_eq!(settings.output_dir, PathBuf::from("./confluence-export"));
    assert!(!settings.dry_run);
  }

  #[test]
  fn test_resolve_requires_base_url() {
    let parsed = cli(&["--space", "TEST", "--username", "u", "--password", "p"]);
    let err = Settings::resolve(&parsed, FileConfig::default()).unwrap_err();
    assert!(err.contains("base URL"));
  }

  #[test]
  fn test_cli_overrides_file() {
    let mut args = base_args();
    args.extend(["--concurrency", "9"]);
    let file = FileConfig {
      concurrency: Some(2),
      ..FileConfig::default()
    };
    let settings = Settings::resolve(&cli(&args), file).unwrap();
    assert_eq!(settings.concurrency, 9);
  }

  #[test]
  fn test_file_fills_missing_credentials() {
    let parsed = cli(&["--space", "TEST"]);
    let file = FileConfig {
      base_url: Some("https://example.atlassian.net".to_string()),
      username: Some("u".to_string()),
      password: Some("p".to_string()),
      ..FileConfig::default()
    };
    let settings = Settings::resolve(&parsed, file).unwrap();
    assert_eq!(settings.username, "u");
  }

  #[test]
  fn test_rejects_zero_concurrency() {
    let mut args = base_args();
    args.extend(["--concurrency", "0"]);
    assert!(Settings::resolve(&cli(&args), FileConfig::default()).is_err());
  }

  #[test]
  fn test_rejects_out_of_range_threshold() {
    let mut args = base_args();
    args.extend(["--attachment-threshold", "150"]);
    assert!(Settings::resolve(&cli(&args), FileConfig::default()).is_err());
  }

  #[test]
  fn test_load_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"baseUrl": "https://x.example", "concurrency": 3}"#).unwrap();

    let file = FileConfig::load(&path).unwrap();
    assert_eq!(file.base_url.as_deref(), Some("https://x.example"));
    assert_eq!(file.concurrency, Some(3));
  }

  #[test]
  fn test_load_config_rejects_unknown_fields() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"unknownKey": true}"#).unwrap();
    assert!(FileConfig::load(&path).is_err());
  }
}
