//! confluence-export - Export a Confluence space to Markdown
//!
//! Main entry point: resolves configuration, enforces the resume guard,
//! installs the interrupt handler, runs the export, and maps the outcome to
//! the documented exit codes.

use std::io;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::CommandFactory;
use clap_complete::{Shell as CompletionShell, generate};
use tracing_subscriber::EnvFilter;

use confluence_export::cli::{Cli, Command, Shell};
use confluence_export::color::ColorScheme;
use confluence_export::config::{FileConfig, Settings};
use confluence_export::confluence::ConfluenceClient;
use confluence_export::exporter::{Cancellation, ExportResult, Exporter};
use confluence_export::resume;

/// Exit codes, stable across releases.
mod exit_codes {
  pub const SUCCESS: i32 = 0;
  pub const CONTENT_FAILURE: i32 = 1;
  pub const INVALID_USAGE: i32 = 2;
  pub const INTERRUPTED: i32 = 3;
  pub const RESUME_REQUIRED: i32 = 4;
  pub const VALIDATION_ERROR: i32 = 5;
}

fn main() {
  let cli = Cli::parse_args();
  let colors = ColorScheme::new(cli.color);

  init_tracing(&cli);

  if let Err(message) = cli.validate() {
    eprintln!("{} {}", colors.error("Error:"), message);
    process::exit(exit_codes::INVALID_USAGE);
  }

  if let Some(ref command) = cli.command {
    match command {
      Command::Version { json, short } => handle_version_command(*json, *short, &colors),
      Command::Completions { shell } => handle_completions_command(*shell),
    }
    return;
  }

  let file_config = match cli.config.as_deref() {
    Some(path) => match FileConfig::load(path) {
      Ok(config) => config,
      Err(error) => {
        eprintln!("{} {error:#}", colors.error("Error:"));
        process::exit(exit_codes::INVALID_USAGE);
      }
    },
    None => FileConfig::default(),
  };

  let settings = match Settings::resolve(&cli, file_config) {
    Ok(settings) => settings,
    Err(message) => {
      eprintln!("{} {}", colors.error("Error:"), message);
      process::exit(exit_codes::INVALID_USAGE);
    }
  };

  let code = run(settings, &colors);
  process::exit(code);
}

/// Run the export end to end, returning the process exit code.
fn run(settings: Settings, colors: &ColorScheme) -> i32 {
  // Resume guard: prior state requires an explicit --resume / --fresh.
  let decision = match resume::validate(&settings.output_dir, settings.resume, settings.fresh) {
    Ok(decision) => decision,
    Err(error) => {
      eprintln!("{} {error:#}", colors.error("Error:"));
      return exit_codes::VALIDATION_ERROR;
    }
  };

  if decision.should_abort {
    eprintln!("{} {}", colors.error("Error:"), decision.message);
    return exit_codes::RESUME_REQUIRED;
  }

  if decision.mode == resume::RunMode::Fresh
    && let Err(error) = resume::clear_prior_state(&settings.output_dir)
  {
    eprintln!("{} {error:#}", colors.error("Error:"));
    return exit_codes::VALIDATION_ERROR;
  }

  let client = match ConfluenceClient::new(
    &settings.base_url,
    &settings.username,
    &settings.password,
    settings.timeout_secs,
    settings.rate_limit,
  ) {
    Ok(client) => client,
    Err(error) => {
      eprintln!("{} {error:#}", colors.error("Error:"));
      return exit_codes::INVALID_USAGE;
    }
  };

  println!(
    "{} {} {}",
    colors.info("Exporting space"),
    colors.emphasis(&settings.space_key),
    colors.dimmed(format!("-> {}", settings.output_dir.display()))
  );
  if settings.dry_run {
    println!("{}", colors.warning("Dry run: no files will be written"));
  }

  let runtime = match tokio::runtime::Runtime::new() {
    Ok(runtime) => runtime,
    Err(error) => {
      eprintln!("{} failed to start async runtime: {error}", colors.error("Error:"));
      return exit_codes::VALIDATION_ERROR;
    }
  };

  let cancel = Cancellation::new();
  let exporter = Exporter::new(Arc::new(client), settings.export.clone(), cancel.clone());

  let outcome = runtime.block_on(async {
    install_interrupt_handler(cancel.clone());
    exporter.process(decision.mode).await
  });

  match outcome {
    Ok(result) => {
      print_summary(&result, colors);

      if result.interrupted {
        eprintln!(
          "{}",
          colors.warning("Export interrupted; rerun with --resume to continue or --fresh to start over")
        );
        exit_codes::INTERRUPTED
      } else if let Some(ref breach) = result.threshold_breach {
        eprintln!("{} {}", colors.error("Content failure:"), breach);
        exit_codes::CONTENT_FAILURE
      } else {
        println!("{}", colors.success("Export complete"));
        exit_codes::SUCCESS
      }
    }
    Err(error) => {
      eprintln!("{} {error:#}", colors.error("Export failed:"));
      exit_codes::VALIDATION_ERROR
    }
  }
}

/// First signal cancels cooperatively; the second exits hard with the
/// interrupted code.
fn install_interrupt_handler(cancel: Cancellation) {
  tokio::spawn(async move {
    let second_signal = Arc::new(AtomicBool::new(false));
    loop {
      if tokio::signal::ctrl_c().await.is_err() {
        return;
      }
      if second_signal.swap(true, Ordering::SeqCst) {
        eprintln!("second interrupt, exiting immediately");
        process::exit(exit_codes::INTERRUPTED);
      }
      eprintln!("interrupt received, finishing in-flight pages (press again to exit immediately)");
      cancel.cancel();
    }
  });
}

/// Human-readable run summary with remediation hints for failures.
fn print_summary(result: &ExportResult, colors: &ColorScheme) {
  println!(
    "{} {} exported, {} unchanged, {} restricted, {} failed",
    colors.emphasis("Pages:"),
    colors.number(result.pages_exported),
    colors.number(result.pages_unchanged),
    colors.number(result.pages_restricted),
    colors.number(result.pages_failed),
  );

  if result.attachments_downloaded > 0 || result.attachment_failures > 0 {
    println!(
      "{} {} downloaded, {} failed",
      colors.emphasis("Attachments:"),
      colors.number(result.attachments_downloaded),
      colors.number(result.attachment_failures),
    );
  }

  if result.rewrite.files_scanned > 0 {
    println!(
      "{} {} links rewritten, {} broken",
      colors.emphasis("Links:"),
      colors.number(result.rewrite.links_rewritten),
      colors.number(result.rewrite.broken_links),
    );
  }

  if !result.restricted_summary.is_empty() {
    println!("{}", colors.emphasis("Restricted pages:"));
    for (kind, count) in &result.restricted_summary {
      println!("  {kind}: {}", colors.number(count));
    }
  }

  if let Some(ref recovery) = result.recovery {
    println!(
      "{} {:?} ({} items, {} processed ids)",
      colors.emphasis("Queue recovery:"),
      recovery.method,
      colors.number(recovery.recovered_items),
      colors.number(recovery.recovered_processed),
    );
  }

  if !result.error_counts.is_empty() {
    println!("{}", colors.emphasis("Failures by kind:"));
    for (kind, count) in &result.error_counts {
      println!(
        "  {kind}: {} {}",
        colors.number(count),
        colors.dimmed(format!("({})", kind.remediation()))
      );
    }
  }

  // Failed page ids, truncated to a displayable count.
  const DISPLAY_LIMIT: usize = 10;
  if !result.errors.is_empty() {
    let shown: Vec<&str> = result
      .errors
      .iter()
      .take(DISPLAY_LIMIT)
      .map(|e| e.page_id.as_str())
      .collect();
    let suffix = if result.errors.len() > DISPLAY_LIMIT {
      format!(" (+{} more)", result.errors.len() - DISPLAY_LIMIT)
    } else {
      String::new()
    };
    println!(
      "{} {}{}",
      colors.emphasis("Failed pages:"),
      shown.join(", "),
      colors.dimmed(suffix)
    );
  }
}

fn init_tracing(cli: &Cli) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter()));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

/// Handle the version subcommand.
fn handle_version_command(json: bool, short: bool, colors: &ColorScheme) {
  let version = env!("CARGO_PKG_VERSION");

  if short {
    println!("{version}");
    return;
  }

  let git_hash = env!("GIT_HASH");
  let build_timestamp = env!("BUILD_TIMESTAMP");
  let target = env!("TARGET");

  if json {
    println!("{{");
    println!("  \"version\": \"{version}\",");
    println!("  \"git_commit\": \"{git_hash}\",");
    println!("  \"build_timestamp\": \"{build_timestamp}\",");
    println!("  \"target\": \"{target}\"");
    println!("}}");
  } else {
    println!("{} {}", colors.emphasis("confluence-export"), colors.number(version));
    println!("{}: {}", colors.emphasis("Git commit"), git_hash);
    println!("{}: {}", colors.emphasis("Built"), build_timestamp);
    println!("{}: {}", colors.emphasis("Target"), target);
  }
}

/// Handle the completions subcommand.
fn handle_completions_command(shell: Shell) {
  let mut cmd = Cli::command();
  let bin_name = cmd.get_name().to_string();

  let clap_shell = match shell {
    Shell::Bash => CompletionShell::Bash,
    Shell::Zsh => CompletionShell::Zsh,
    Shell::Fish => CompletionShell::Fish,
    Shell::Powershell => CompletionShell::PowerShell,
    Shell::Elvish => CompletionShell::Elvish,
  };

  generate(clap_shell, &mut cmd, bin_name, &mut io::stdout());
}
