//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// confluence-export - Export Confluence spaces to Markdown
#[derive(Debug, Parser)]
#[command(
  name = "confluence-export",
  version,
  about = "Export a Confluence space to a local Markdown tree",
  long_about = "Exports a Confluence space (or a page subtree) to a local, hierarchy-preserving\n\
                tree of Markdown files with attachments and a manifest. Interrupted exports can\n\
                be resumed with --resume or discarded with --fresh.",
  styles = get_clap_styles()
)]
pub struct Cli {
  /// Space key to export
  #[arg(long, value_name = "KEY")]
  pub space: Option<String>,

  /// Output directory
  #[arg(long, value_name = "DIR")]
  pub out: Option<PathBuf>,

  /// Discover and fetch without writing any files
  #[arg(long)]
  pub dry_run: bool,

  /// Number of parallel page workers
  #[arg(long, value_name = "N")]
  pub concurrency: Option<usize>,

  /// Continue a previously interrupted export
  #[arg(long, conflicts_with = "fresh")]
  pub resume: bool,

  /// Discard prior export state and start over
  #[arg(long, conflicts_with = "resume")]
  pub fresh: bool,

  /// Export only the subtree under this page id
  #[arg(long, value_name = "PAGE_ID")]
  pub root: Option<String>,

  /// Log verbosity
  #[arg(long, value_enum, env = "LOG_LEVEL", default_value = "info", value_name = "LEVEL")]
  pub log_level: LogLevel,

  /// Path to a JSON config file
  #[arg(long, value_name = "PATH")]
  pub config: Option<PathBuf>,

  /// Attachment failure percentage tolerated before the run fails
  #[arg(long, value_name = "PCT")]
  pub attachment_threshold: Option<f64>,

  /// Colorize output
  #[arg(long, value_enum, default_value = "auto", value_name = "WHEN")]
  pub color: ColorOption,

  /// Authentication options
  #[command(flatten)]
  pub auth: AuthOptions,

  /// Performance options
  #[command(flatten)]
  pub performance: PerformanceOptions,

  /// Subcommand to execute
  #[command(subcommand)]
  pub command: Option<Command>,
}

/// Subcommands for introspection
#[derive(Debug, Subcommand)]
pub enum Command {
  /// Display version and build information
  Version {
    /// Output in JSON format
    #[arg(long)]
    json: bool,

    /// Show only the version number
    #[arg(long)]
    short: bool,
  },

  /// Generate shell completion scripts
  Completions {
    /// Target shell for completions
    #[arg(value_enum)]
    shell: Shell,
  },
}

/// Shell types for completion generation
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Shell {
  Bash,
  Zsh,
  Fish,
  Powershell,
  Elvish,
}

/// Authentication options
#[derive(Debug, Parser)]
pub struct AuthOptions {
  /// Confluence base URL
  #[arg(long, env = "CONFLUENCE_BASE_URL", value_name = "URL")]
  pub base_url: Option<String>,

  /// Confluence user (email address)
  #[arg(long, env = "CONFLUENCE_USERNAME", value_name = "EMAIL")]
  pub username: Option<String>,

  /// Confluence API token or password
  #[arg(long, env = "CONFLUENCE_PASSWORD", value_name = "TOKEN", hide_env_values = true)]
  pub password: Option<String>,
}

/// Performance options
#[derive(Debug, Parser)]
pub struct PerformanceOptions {
  /// Max requests per second against the API
  #[arg(long, value_name = "N")]
  pub rate_limit: Option<usize>,

  /// Per-request timeout in seconds
  #[arg(long, value_name = "SECONDS")]
  pub timeout: Option<u64>,
}

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
  Error,
  Warn,
  Info,
  Debug,
}

impl LogLevel {
  /// The `tracing` filter directive for this level.
  pub fn as_filter(self) -> &'static str {
    match self {
      LogLevel::Error => "error",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
    }
  }
}

/// Color output options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
  Auto,
  Always,
  Never,
}

impl Cli {
  /// Parse CLI arguments from the environment.
  pub fn parse_args() -> Self {
    Self::parse()
  }

  /// Validate argument combinations clap cannot express.
  pub fn validate(&self) -> Result<(), String> {
    if self.command.is_none() && self.space.is_none() {
      return Err("--space is required (or use a subcommand)".to_string());
    }

    if let Some(ref root) = self.root
      && !root.chars().all(|c| c.is_ascii_digit())
    {
      return Err(format!("--root must be a numeric page id, got '{root}'"));
    }

    Ok(())
  }
}

/// Custom styles for clap help output.
fn get_clap_styles() -> clap::builder::Styles {
  use clap::builder::styling::{AnsiColor, Effects};

  clap::builder::Styles::styled()
    .header(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
    .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
    .literal(AnsiColor::BrightGreen.on_default())
    .placeholder(AnsiColor::BrightCyan.on_default())
    .error(AnsiColor::BrightRed.on_default() | Effects::BOLD)
    .valid(AnsiColor::BrightGreen.on_default())
    .invalid(AnsiColor::BrightRed.on_default())
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    let mut full = vec!["confluence-export"];
    full.extend(args);
    Cli::try_parse_from(full)
  }

  #[test]
  fn test_parse_minimal_export() {
    let cli = parse(&["--space", "TEST"]).unwrap();
    assert_eq!(cli.space.as_deref(), Some("TEST"));
    assert!(!cli.resume);
    assert!(!cli.fresh);
    assert!(cli.validate().is_ok());
  }

  #[test]
  fn test_resume_and_fresh_conflict() {
    assert!(parse(&["--space", "TEST", "--resume", "--fresh"]).is_err());
  }

  #[test]
  fn test_space_required_without_subcommand() {
    let cli = parse(&[]).unwrap();
    assert!(cli.validate().is_err());
  }

  #[test]
  fn test_version_subcommand_needs_no_space() {
    let cli = parse(&["version"]).unwrap();
    assert!(cli.validate().is_ok());
  }

  #[test]
  fn test_root_must_be_numeric() {
    let cli = parse(&["--space", "TEST", "--root", "abc"]).unwrap();
    assert!(cli.validate().is_err());

    let cli = parse(&["--space", "TEST", "--root", "12345"]).unwrap();
    assert!(cli.validate().is_ok());
  }

  #[test]
  fn test_log_level_default() {
    let cli = parse(&["--space", "TEST"]).unwrap();
    assert_eq!(cli.log_level, LogLevel::Info);
  }

  #[test]
  fn test_performance_flags() {
    let cli = parse(&["--space", "TEST", "--rate-limit", "3", "--timeout", "60"]).unwrap();
    assert_eq!(cli.performance.rate_limit, Some(3));
    assert_eq!(cli.performance.timeout, Some(60));
  }
}
