//! Queue-aware export orchestrator.
//!
//! Runs discovery phases over the persistent queue: drain a batch, process
//! each item under the concurrency budget (fetch, transform, emit, enqueue
//! whatever the transformer discovered), and stop once the queue stays
//! empty. Interrupts are cooperative; every suspension point checks the
//! cancellation flag, and a graceful shutdown persists the queue, journal,
//! and manifest before the sentinel is updated.

pub mod restricted;
pub mod retry;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupContext, CleanupPipeline};
use crate::confluence::{ConfluenceApi, Page};
use crate::error::{ErrorKind, ExportError};
use crate::fsutil;
use crate::journal::{self, ResumeJournal};
use crate::linkrewrite::{self, RewriteStats};
use crate::manifest::{EntryStatus, Manifest, ManifestEntry};
use crate::metrics::RateWindow;
use crate::queue::monitor::{MonitorConfig, QueueMonitor};
use crate::queue::{AddOutcome, DownloadQueue, QueueConfig, QueueItem, SourceType, persistence};
use crate::resume::RunMode;
use crate::sentinel::{CompletedSentinel, InProgressSentinel};
use crate::slug::SlugAllocator;
use crate::transform::{self, TransformContext, TransformOutput};

use restricted::{FailureCounts, FailureThresholds, RestrictedPageHandler, classify_error, classify_page_status};
use retry::RetryConfig;

/// Tunables for one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
  pub base_url: String,
  pub space_key: String,
  pub output_dir: PathBuf,
  /// Export the subtree under this page instead of the whole space.
  pub root_page_id: Option<String>,
  /// Parallel workers per discovery phase.
  pub concurrency_limit: usize,
  /// Items drained from the queue per phase.
  pub batch_size: usize,
  /// Hard cap on discovery phases.
  pub max_discovery_phases: u32,
  /// Consecutive empty polls before the run is considered drained.
  pub max_empty_phases: u32,
  /// Pause between phases (also an interrupt suspension point).
  pub pause_between_phases: Duration,
  /// Soft per-phase budget; exceeding it is logged, not fatal.
  pub phase_soft_timeout: Duration,
  /// Optional wall-clock limit for the whole run; exceeding it cancels the
  /// run as if interrupted.
  pub run_deadline: Option<Duration>,
  /// Discover and fetch but write nothing.
  pub dry_run: bool,
  /// Download attachments referenced by page bodies.
  pub download_attachments: bool,
  pub retry: RetryConfig,
  pub queue: QueueConfig,
  pub thresholds: FailureThresholds,
}

impl ExportConfig {
  /// Defaults matching the CLI's documented defaults.
  pub fn new(base_url: impl Into<String>, space_key: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      space_key: space_key.into(),
      output_dir: output_dir.into(),
      root_page_id: None,
      concurrency_limit: 5,
      batch_size: 25,
      max_discovery_phases: 100,
      max_empty_phases: 3,
      pause_between_phases: Duration::from_millis(50),
      phase_soft_timeout: Duration::from_secs(300),
      run_deadline: None,
      dry_run: false,
      download_attachments: true,
      retry: RetryConfig::default(),
      queue: QueueConfig::default(),
      thresholds: FailureThresholds::default(),
    }
  }
}

/// Cooperative cancellation flag shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
  flag: Arc<AtomicBool>,
}

impl Cancellation {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}

/// One terminally failed page.
#[derive(Debug, Clone)]
pub struct ProcessingError {
  pub page_id: String,
  pub kind: ErrorKind,
  pub message: String,
}

/// Outcome of an export run.
#[derive(Debug, Default)]
pub struct ExportResult {
  pub pages_exported: usize,
  pub pages_unchanged: usize,
  pub pages_failed: usize,
  pub pages_restricted: usize,
  pub attachments_downloaded: usize,
  pub attachment_failures: usize,
  /// Restricted pages per classification.
  pub restricted_summary: BTreeMap<&'static str, usize>,
  /// Link-rewriting counters from the final pass.
  pub rewrite: RewriteStats,
  /// Per-kind error counts for the failure summary.
  pub error_counts: BTreeMap<ErrorKind, u64>,
  /// Terminally failed pages, in failure order.
  pub errors: Vec<ProcessingError>,
  /// Snapshot recovery report when the run resumed from disk.
  pub recovery: Option<persistence::RecoveryReport>,
  /// The run stopped on a cancellation signal.
  pub interrupted: bool,
  /// Set when a completion threshold was breached.
  pub threshold_breach: Option<String>,
}

#[derive(Debug, Default)]
struct RunCounters {
  pages_exported: usize,
  pages_unchanged: usize,
  pages_failed: usize,
  attachments_downloaded: usize,
  attachment_failures: usize,
  attachment_attempts: usize,
  error_counts: BTreeMap<ErrorKind, u64>,
  errors: Vec<ProcessingError>,
}

impl RunCounters {
  fn record_error(&mut self, page_id: &str, error: &ExportError) {
    *self.error_counts.entry(error.kind).or_insert(0) += 1;
    self.errors.push(ProcessingError {
      page_id: page_id.to_string(),
      kind: error.kind,
      message: error.message.clone(),
    });
  }
}

/// The export orchestrator. Owns the queue, manifest-in-progress, and
/// journal for the lifetime of a run.
pub struct Exporter {
  api: Arc<dyn ConfluenceApi>,
  config: ExportConfig,
  cancel: Cancellation,
  queue: Arc<DownloadQueue>,
  manifest: std::sync::Mutex<Manifest>,
  journal: std::sync::Mutex<ResumeJournal>,
  slugs: std::sync::Mutex<HashMap<String, SlugAllocator>>,
  restricted: std::sync::Mutex<RestrictedPageHandler>,
  counters: std::sync::Mutex<RunCounters>,
  rate: std::sync::Mutex<RateWindow>,
  monitor: std::sync::Mutex<QueueMonitor>,
  cleanup: CleanupPipeline,
}

impl Exporter {
  pub fn new(api: Arc<dyn ConfluenceApi>, config: ExportConfig, cancel: Cancellation) -> Self {
    let queue = Arc::new(DownloadQueue::new(config.queue.clone()));
    let monitor = QueueMonitor::new(MonitorConfig {
      max_queue_size: config.queue.max_queue_size,
      ..MonitorConfig::default()
    });

    Self {
      api,
      queue,
      cancel,
      manifest: std::sync::Mutex::new(Manifest::new(&config.space_key)),
      journal: std::sync::Mutex::new(ResumeJournal::new(&config.space_key)),
      slugs: std::sync::Mutex::new(HashMap::new()),
      restricted: std::sync::Mutex::new(RestrictedPageHandler::new()),
      counters: std::sync::Mutex::new(RunCounters::default()),
      rate: std::sync::Mutex::new(RateWindow::new(Duration::from_secs(60))),
      monitor: std::sync::Mutex::new(monitor),
      cleanup: CleanupPipeline::standard(),
      config,
    }
  }

  fn space_dir(&self) -> PathBuf {
    self.config.output_dir.join(&self.config.space_key)
  }

  /// Run the export to completion, graceful interruption, or failure.
  ///
  /// The caller is expected to have run the resume guard first; `mode`
  /// decides whether prior manifest/journal/queue state is loaded.
  pub async fn process(&self, mode: RunMode) -> Result<ExportResult> {
    let mut result = ExportResult::default();

    if !self.config.dry_run {
      std::fs::create_dir_all(self.space_dir()).context("Failed to create output directory")?;
      InProgressSentinel::new(&self.config.space_key)
        .write(&self.config.output_dir)
        .context("Failed to write in-progress sentinel")?;
    }

    if mode == RunMode::Resume {
      result.recovery = Some(self.load_prior_state()?);
    }

    // Seeding failures (network, bad space key) are content failures, not
    // hard errors: the run ends with a failure count and exit code 1.
    if let Err(error) = self.seed_queue().await {
      warn!(%error, "seeding failed");
      let mut counters = self.counters.lock().expect("counters mutex poisoned");
      counters.pages_failed += 1;
      counters.record_error("(seed)", &ExportError::new(ErrorKind::Network, error.to_string()));
    }

    self.run_phases().await;

    let interrupted = self.cancel.is_cancelled();
    result.interrupted = interrupted;

    if !self.config.dry_run {
      self.persist_state(interrupted)?;
    }

    if !interrupted && !self.config.dry_run {
      let manifest = self.manifest.lock().expect("manifest mutex poisoned").clone();
      result.rewrite = linkrewrite::rewrite_links(&self.space_dir(), &manifest, &self.config.base_url)?;
    }

    self.collect_result(&mut result);

    if !interrupted {
      let counts = FailureCounts {
        page_failures: result.pages_failed,
        restricted_pages: result.pages_restricted,
        attachment_failures: result.attachment_failures,
        attachment_attempts: {
          let counters = self.counters.lock().expect("counters mutex poisoned");
          counters.attachment_attempts
        },
      };
      result.threshold_breach = self.config.thresholds.evaluate(&counts).err();

      if !self.config.dry_run {
        if result.threshold_breach.is_none() {
          CompletedSentinel::new(format!(
            "{} pages exported, {} restricted, {} failed",
            result.pages_exported, result.pages_restricted, result.pages_failed
          ))
          .write(&self.config.output_dir)?;
        }
        InProgressSentinel::remove(&self.config.output_dir)?;
      }
    }

    Ok(result)
  }

  /// Load manifest, journal, and queue snapshot for a `--resume` run.
  fn load_prior_state(&self) -> Result<persistence::RecoveryReport> {
    if let Some(prior) = Manifest::load(&self.config.output_dir)? {
      let mut manifest = self.manifest.lock().expect("manifest mutex poisoned");
      *manifest = prior;

      // Reserve existing slugs so resumed runs never collide with files
      // already on disk.
      let mut slugs = self.slugs.lock().expect("slug mutex poisoned");
      for entry in manifest.entries.iter().filter(|e| e.status.has_file()) {
        let path = std::path::Path::new(&entry.path);
        let dir = path.parent().map(fsutil::to_forward_slashes).unwrap_or_default();
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
          slugs.entry(dir).or_default().reserve(stem);
        }
      }
    }

    if let Some(prior) = ResumeJournal::load(&self.config.output_dir)? {
      let mut journal = self.journal.lock().expect("journal mutex poisoned");
      *journal = prior;
    }

    let report = persistence::restore(&self.queue, &self.config.output_dir)?;
    info!(method = ?report.method, items = report.recovered_items, "queue restored");
    Ok(report)
  }

  /// Seed the queue: the explicit root page, or every page the space search
  /// returns.
  async fn seed_queue(&self) -> Result<()> {
    if !self.queue.is_empty() {
      // A restored queue already has work.
      return Ok(());
    }

    if let Some(ref root) = self.config.root_page_id {
      self.enqueue(QueueItem::new(root.clone(), SourceType::Initial));
      return Ok(());
    }

    let cql = format!("space = \"{}\" AND type = page", self.config.space_key);
    let pages = self
      .api
      .search_pages(&cql, self.config.queue.max_queue_size.min(1000))
      .await
      .map_err(|e| anyhow::anyhow!("Space search failed: {e}"))?;

    if pages.is_empty() {
      warn!(space = %self.config.space_key, "space search returned no pages");
    }
    for page in pages {
      self.enqueue(QueueItem::new(page.id, SourceType::Initial));
    }
    Ok(())
  }

  /// The discovery/processing loop.
  async fn run_phases(&self) {
    let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
    let started = std::time::Instant::now();
    let mut phase: u32 = 0;
    let mut empty_phases: u32 = 0;

    while phase < self.config.max_discovery_phases && !self.cancel.is_cancelled() {
      if let Some(deadline) = self.config.run_deadline
        && started.elapsed() >= deadline
      {
        warn!(elapsed = ?started.elapsed(), "run deadline exceeded, stopping");
        self.cancel.cancel();
        break;
      }
      let mut batch = Vec::with_capacity(self.config.batch_size);
      while batch.len() < self.config.batch_size
        && let Some(item) = self.queue.next()
      {
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        if journal.status_of(&item.page_id).is_none() {
          journal.mark_pending(&item.page_id, journal::EntryType::Page);
        }
        drop(journal);
        batch.push(item);
      }

      if batch.is_empty() {
        empty_phases += 1;
        if empty_phases >= self.config.max_empty_phases {
          break;
        }
        tokio::time::sleep(self.config.pause_between_phases).await;
        continue;
      }

      empty_phases = 0;
      phase += 1;
      debug!(phase, items = batch.len(), "discovery phase");
      let phase_started = std::time::Instant::now();

      let tasks = batch.into_iter().map(|item| {
        let semaphore = Arc::clone(&semaphore);
        async move {
          let _permit = semaphore.acquire().await.expect("semaphore never closed");
          if self.cancel.is_cancelled() {
            // Leave the item in `processing`; shutdown persistence will
            // requeue it on the next run.
            return;
          }
          self.process_item(item).await;
        }
      });
      join_all(tasks).await;

      if phase_started.elapsed() > self.config.phase_soft_timeout {
        warn!(phase, elapsed = ?phase_started.elapsed(), "discovery phase exceeded its soft timeout");
      }

      self.after_phase();

      if !self.cancel.is_cancelled() {
        tokio::time::sleep(self.config.pause_between_phases).await;
      }
    }
  }

  /// Metrics, monitoring, and opportunistic persistence between phases.
  fn after_phase(&self) {
    let metrics = self.queue.metrics();

    let processing_rate = {
      let mut rate = self.rate.lock().expect("rate mutex poisoned");
      rate.record(metrics.total_processed);
      rate.rate()
    };

    {
      let mut monitor = self.monitor.lock().expect("monitor mutex poisoned");
      let alerts = monitor.evaluate(&metrics, processing_rate);
      let health = monitor.health_score(&alerts);
      debug!(
        queue_size = metrics.current_queue_size,
        rate = processing_rate,
        health,
        "queue health"
      );
    }

    if !self.config.dry_run && self.queue.should_persist() {
      let outcome = persistence::persist(&self.queue, &self.config.output_dir, &self.config.space_key);
      let succeeded = outcome.is_ok();
      if let Err(err) = outcome {
        warn!(%err, "queue persistence failed, continuing in memory");
      }
      self
        .monitor
        .lock()
        .expect("monitor mutex poisoned")
        .record_persist(succeeded);

      let journal = self.journal.lock().expect("journal mutex poisoned").clone();
      if let Err(err) = journal.save(&self.config.output_dir) {
        warn!(%err, "journal persistence failed");
      }
    }
  }

  /// Process one queue item end to end.
  async fn process_item(&self, item: QueueItem) {
    let page_id = item.page_id.clone();
    {
      let mut journal = self.journal.lock().expect("journal mutex poisoned");
      if journal.status_of(&page_id).is_none() {
        journal.mark_pending(&page_id, journal::EntryType::Page);
      }
    }

    let page = match self.fetch_with_retries(&page_id).await {
      Ok(page) => page,
      Err(error) => {
        self.handle_fetch_failure(&page_id, error);
        return;
      }
    };

    // Archived and trashed pages are recorded, never emitted.
    if let Some(kind) = classify_page_status(&page.status) {
      self.record_restricted(&page_id, &page.title, kind);
      return;
    }

    let cx = TransformContext::new(&self.config.base_url, &self.config.space_key);
    let output = match transform::transform(&page, &cx) {
      Ok(output) => output,
      Err(error) => {
        warn!(page_id = %page_id, %error, "transform failed");
        self.record_terminal_failure(&page_id, &error);
        return;
      }
    };

    if self.cancel.is_cancelled() {
      // Cancel arrived before the atomic write: discard the result; the
      // item stays in `processing` and is requeued on resume.
      return;
    }

    match self.emit_page(&page, output).await {
      Ok(path) => {
        self.queue.mark_processed(&page_id);
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        journal.mark_completed(&page_id, path);
      }
      Err(error) => {
        warn!(page_id = %page_id, %error, "emit failed");
        self.record_terminal_failure(&page_id, &ExportError::new(ErrorKind::Filesystem, error.to_string()));
      }
    }
  }

  /// Fetch a page with exponential backoff on retryable errors.
  async fn fetch_with_retries(&self, page_id: &str) -> Result<Page, ExportError> {
    let mut attempt: u32 = 0;

    loop {
      match self.api.get_page_with_body(page_id).await {
        Ok(page) => return Ok(page),
        Err(error) => {
          attempt += 1;
          if !error.is_retryable() || attempt > self.config.retry.max_retries || self.cancel.is_cancelled() {
            return Err(error);
          }

          let delay = retry::backoff_delay(&self.config.retry, attempt, error.retry_after_ms);
          debug!(page_id, attempt, ?delay, "retrying fetch");
          tokio::time::sleep(delay).await;
        }
      }
    }
  }

  /// Restricted pages go to the manifest without a file; everything else is
  /// a terminal processing error.
  fn handle_fetch_failure(&self, page_id: &str, error: ExportError) {
    if let Some(kind) = classify_error(&error) {
      self.record_restricted(page_id, "", kind);
      return;
    }

    warn!(page_id, %error, "page fetch failed terminally");
    self.record_terminal_failure(page_id, &error);
  }

  fn record_restricted(&self, page_id: &str, title: &str, kind: restricted::RestrictionKind) {
    let entry = {
      let mut restricted = self.restricted.lock().expect("restricted mutex poisoned");
      restricted.record(page_id, title, kind)
    };
    self.manifest.lock().expect("manifest mutex poisoned").upsert(entry);
    self.queue.mark_failed(page_id, false);
    self
      .journal
      .lock()
      .expect("journal mutex poisoned")
      .mark_failed(page_id, kind.as_str());
  }

  fn record_terminal_failure(&self, page_id: &str, error: &ExportError) {
    self.queue.mark_failed(page_id, false);
    {
      let mut counters = self.counters.lock().expect("counters mutex poisoned");
      counters.pages_failed += 1;
      counters.record_error(page_id, error);
    }
    self
      .journal
      .lock()
      .expect("journal mutex poisoned")
      .mark_failed(page_id, &error.message);
  }

  /// Write the page (and its attachments), update the manifest, and enqueue
  /// discovered work. Returns the emitted relative path.
  async fn emit_page(&self, page: &Page, mut output: TransformOutput) -> Result<String> {
    // A page already in the manifest keeps its path across runs; only new
    // pages go through slug allocation.
    let prior = {
      let manifest = self.manifest.lock().expect("manifest mutex poisoned");
      manifest
        .get(&page.id)
        .filter(|entry| entry.status.has_file())
        .map(|entry| (entry.path.clone(), entry.hash.clone()))
    };

    let (dir, leaf, relative_path) = match &prior {
      Some((path, _)) => {
        let parsed = std::path::Path::new(path);
        let dir = parsed.parent().map(fsutil::to_forward_slashes).unwrap_or_default();
        let leaf = parsed
          .file_stem()
          .and_then(|s| s.to_str())
          .unwrap_or(&page.id)
          .to_string();
        (dir, leaf, path.clone())
      }
      None => {
        let (dir, leaf) = self.allocate_path(page);
        let relative_path = if dir.is_empty() {
          format!("{leaf}.md")
        } else {
          format!("{dir}/{leaf}.md")
        };
        (dir, leaf, relative_path)
      }
    };

    // Resolve user mentions before the content is written so the file needs
    // no second pass.
    let mut content = std::mem::take(&mut output.content);
    if !output.users.is_empty() {
      let resolutions = self.resolve_users(&output.users).await;
      if !resolutions.is_empty() {
        content = transform::resolve_user_placeholders(&content, &resolutions);
      }
    }

    // Attachments are matched against the page's listing up front so the
    // emitted links point at the unique sanitized filenames the bytes are
    // actually saved under.
    let mut planned_attachments = Vec::new();
    if self.config.download_attachments && !self.config.dry_run && !output.attachments.is_empty() {
      planned_attachments = self.plan_attachments(&page.id, &output.attachments).await;
      content = rewrite_attachment_links(&content, &leaf, &planned_attachments);
    }

    // Cosmetic cleanup rules run over the finished Markdown, fences
    // shielded.
    let cleanup_context = CleanupContext {
      space_key: self.config.space_key.clone(),
      path: relative_path.clone(),
    };
    let (content, _reports) = self.cleanup.run(&content, &cleanup_context);

    let hash = crate::checksum::content_hash(&content);
    let unchanged = prior.as_ref().is_some_and(|(_, prior_hash)| *prior_hash == hash);

    if !self.config.dry_run && !unchanged {
      let target = self.space_dir().join(&relative_path);
      fsutil::write_atomic_string(&target, &content)?;
    }

    let mut entry = ManifestEntry::exported(&page.id, &page.title, &relative_path, hash);
    entry.version = page.version_number();
    entry.parent_id = page.parent_id().map(str::to_string);
    if unchanged {
      entry.status = EntryStatus::Unchanged;
    }
    self.manifest.lock().expect("manifest mutex poisoned").upsert(entry);

    {
      let mut counters = self.counters.lock().expect("counters mutex poisoned");
      if unchanged {
        counters.pages_unchanged += 1;
      } else {
        counters.pages_exported += 1;
      }
    }

    if !planned_attachments.is_empty() {
      self.download_attachments(page, &leaf, &dir, &planned_attachments).await;
    }

    self.enqueue_discoveries(page, &output).await;

    Ok(relative_path)
  }

  /// Allocate the hierarchical slug path for a page: ancestor slugs form the
  /// directory, the leaf gets collision handling within it.
  fn allocate_path(&self, page: &Page) -> (String, String) {
    // The first ancestor is the space homepage; pages directly under it live
    // at the space root.
    let dir = page
      .ancestors
      .iter()
      .skip(1)
      .map(|ancestor| crate::slug::slugify(&ancestor.title, crate::slug::DEFAULT_MAX_LENGTH))
      .filter(|slug| !slug.is_empty())
      .collect::<Vec<_>>()
      .join("/");

    let mut slugs = self.slugs.lock().expect("slug mutex poisoned");
    let leaf = slugs.entry(dir.clone()).or_default().allocate(&page.title, &page.id);
    (dir, leaf)
  }

  /// Resolve user mentions to display names, best effort.
  async fn resolve_users(&self, users: &[transform::UserReference]) -> BTreeMap<String, String> {
    let mut resolutions = BTreeMap::new();

    for user in users {
      if resolutions.contains_key(&user.placeholder) {
        continue;
      }

      let lookup = match (&user.user_key, &user.username) {
        (Some(key), _) => self.api.get_user(key).await,
        (None, Some(name)) => self.api.get_user_by_username(name).await,
        (None, None) => continue,
      };

      match lookup {
        Ok(resolved) => {
          resolutions.insert(user.placeholder.clone(), format!("@{}", resolved.display_name));
        }
        Err(error) => {
          debug!(placeholder = %user.placeholder, %error, "user lookup failed, keeping placeholder");
        }
      }
    }

    resolutions
  }

  /// Resolve referenced attachments against the page's listing.
  ///
  /// Every listing entry matching a referenced title is planned under a
  /// unique sanitized filename, so two same-titled attachments never
  /// overwrite each other. References absent from the listing still get a
  /// plan entry (without a URL) so the failure is counted and journaled.
  async fn plan_attachments(
    &self,
    page_id: &str,
    references: &[transform::AttachmentReference],
  ) -> Vec<PlannedAttachment> {
    let listing = match self.list_all_attachments(page_id).await {
      Ok(listing) => listing,
      Err(error) => {
        warn!(page_id, %error, "attachment listing failed");
        Vec::new()
      }
    };

    let mut used_filenames = HashSet::new();
    let mut planned = Vec::new();

    for reference in references {
      let matches: Vec<_> = listing
        .iter()
        .filter(|attachment| attachment.title == reference.filename)
        .collect();

      if matches.is_empty() {
        planned.push(PlannedAttachment {
          original: reference.filename.clone(),
          saved: generate_unique_filename(&reference.filename, &mut used_filenames),
          download_url: None,
        });
        continue;
      }

      for attachment in matches {
        planned.push(PlannedAttachment {
          original: reference.filename.clone(),
          saved: generate_unique_filename(&attachment.title, &mut used_filenames),
          download_url: attachment.download_url().map(str::to_string),
        });
      }
    }

    planned
  }

  /// Download planned attachments into the page's co-located `attachments/`
  /// directory.
  async fn download_attachments(&self, page: &Page, leaf: &str, dir: &str, planned: &[PlannedAttachment]) {
    let attachment_dir = if dir.is_empty() {
      self.space_dir().join(leaf).join("attachments")
    } else {
      self.space_dir().join(dir).join(leaf).join("attachments")
    };

    for plan in planned {
      if self.cancel.is_cancelled() {
        return;
      }

      {
        let mut counters = self.counters.lock().expect("counters mutex poisoned");
        counters.attachment_attempts += 1;
      }

      let journal_id = format!("{}/{}", page.id, plan.saved);
      {
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        journal.mark_pending(&journal_id, journal::EntryType::Attachment);
      }

      let outcome = match &plan.download_url {
        Some(url) => self.api.download_attachment(url).await,
        None => Err(ExportError::new(
          ErrorKind::NotFound,
          format!("attachment '{}' not present in listing", plan.original),
        )),
      };

      match outcome {
        Ok(bytes) => {
          let target = attachment_dir.join(&plan.saved);
          match fsutil::write_atomic(&target, &bytes) {
            Ok(()) => {
              let mut counters = self.counters.lock().expect("counters mutex poisoned");
              counters.attachments_downloaded += 1;
              drop(counters);
              let mut journal = self.journal.lock().expect("journal mutex poisoned");
              journal.mark_completed(&journal_id, fsutil::to_forward_slashes(&target));
            }
            Err(error) => self.record_attachment_failure(&journal_id, &error.to_string()),
          }
        }
        Err(error) => self.record_attachment_failure(&journal_id, &error.to_string()),
      }
    }
  }

  fn record_attachment_failure(&self, journal_id: &str, message: &str) {
    warn!(attachment = journal_id, message, "attachment download failed");
    {
      let mut counters = self.counters.lock().expect("counters mutex poisoned");
      counters.attachment_failures += 1;
    }
    let mut journal = self.journal.lock().expect("journal mutex poisoned");
    journal.mark_failed(journal_id, message);
  }

  async fn list_all_attachments(&self, page_id: &str) -> Result<Vec<crate::confluence::Attachment>, ExportError> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
      let batch = self.api.list_attachments(page_id, cursor.as_deref()).await?;
      all.extend(batch.results);
      match batch.next_cursor {
        Some(next) => cursor = Some(next),
        None => return Ok(all),
      }
    }
  }

  /// Enqueue everything the transformer discovered: linked page ids, macro
  /// children, and label search results.
  async fn enqueue_discoveries(&self, page: &Page, output: &TransformOutput) {
    for discovered in &output.discovered_page_ids {
      let source = if output
        .links
        .iter()
        .any(|link| link.page_id.as_deref() == Some(discovered) && link.href.contains("/display/~"))
      {
        SourceType::User
      } else {
        SourceType::Reference
      };
      self.enqueue(QueueItem::with_parent(discovered.clone(), source, page.id.clone()));
    }

    for expansion in &output.macro_expansions {
      if expansion.disposition != transform::MacroDisposition::Expanded {
        continue;
      }

      match expansion.name.as_str() {
        "children" | "children-display" => self.enqueue_children(&page.id).await,
        "content-by-label" | "contentbylabel" => {
          if let Some(label) = expansion.params.get("label").or_else(|| expansion.params.get("labels")) {
            self.enqueue_labeled(&page.id, label).await;
          }
        }
        _ => {}
      }
    }
  }

  /// Enqueue all direct children of a page (paged listing).
  async fn enqueue_children(&self, parent_id: &str) {
    let mut cursor: Option<String> = None;

    loop {
      if self.cancel.is_cancelled() {
        return;
      }

      match self.api.get_child_pages(parent_id, cursor.as_deref()).await {
        Ok(batch) => {
          for child in batch.results {
            self.enqueue(QueueItem::with_parent(child.id, SourceType::Macro, parent_id.to_string()));
          }
          match batch.next_cursor {
            Some(next) => cursor = Some(next),
            None => return,
          }
        }
        Err(error) => {
          warn!(parent_id, %error, "child listing failed");
          return;
        }
      }
    }
  }

  /// Enqueue CQL search results for a `content-by-label` macro.
  async fn enqueue_labeled(&self, parent_id: &str, label: &str) {
    let cql = format!("space = \"{}\" AND type = page AND label = \"{label}\"", self.config.space_key);
    match self.api.search_pages(&cql, self.config.batch_size).await {
      Ok(pages) => {
        for page in pages {
          self.enqueue(QueueItem::with_parent(page.id, SourceType::Macro, parent_id.to_string()));
        }
      }
      Err(error) => warn!(parent_id, label, %error, "label search failed"),
    }
  }

  fn enqueue(&self, item: QueueItem) {
    let page_id = item.page_id.clone();
    match self.queue.add(item) {
      AddOutcome::Added => debug!(page_id = %page_id, "enqueued"),
      AddOutcome::QueueFull => warn!(page_id = %page_id, "queue full, discovery dropped"),
      AddOutcome::Duplicate | AddOutcome::AlreadyProcessed => {}
    }
  }

  /// Persist queue, journal, manifest, and the sentinel at shutdown.
  fn persist_state(&self, interrupted: bool) -> Result<()> {
    if let Err(err) = persistence::persist(&self.queue, &self.config.output_dir, &self.config.space_key) {
      warn!(%err, "final queue persist failed");
    }

    let journal = self.journal.lock().expect("journal mutex poisoned").clone();
    journal.save(&self.config.output_dir)?;

    let mut manifest = self.manifest.lock().expect("manifest mutex poisoned");
    manifest.validate()?;
    manifest.save(&self.config.output_dir)?;
    drop(manifest);

    if interrupted {
      let mut sentinel = InProgressSentinel::new(&self.config.space_key);
      sentinel.signal = Some("interrupt".to_string());
      sentinel.message = Some("export interrupted; rerun with --resume or --fresh".to_string());
      sentinel.write(&self.config.output_dir)?;
    }

    Ok(())
  }

  fn collect_result(&self, result: &mut ExportResult) {
    let counters = self.counters.lock().expect("counters mutex poisoned");
    result.pages_exported = counters.pages_exported;
    result.pages_unchanged = counters.pages_unchanged;
    result.pages_failed = counters.pages_failed;
    result.attachments_downloaded = counters.attachments_downloaded;
    result.attachment_failures = counters.attachment_failures;
    result.error_counts = counters.error_counts.clone();
    result.errors = counters.errors.clone();
    drop(counters);

    let restricted = self.restricted.lock().expect("restricted mutex poisoned");
    result.pages_restricted = restricted.count();
    result.restricted_summary = restricted.summary();
  }
}

/// One attachment download resolved against the page's listing.
#[derive(Debug, Clone)]
struct PlannedAttachment {
  /// Filename as referenced in the page body.
  original: String,
  /// Unique sanitized filename the bytes are saved under.
  saved: String,
  /// Download URL from the listing; `None` when the listing had no match.
  download_url: Option<String>,
}

/// Rewrite `](attachments/<original>)` links emitted by the transformer to
/// the saved filenames under the page's own attachment directory. When a
/// title matched several listing entries, the first saved copy wins.
fn rewrite_attachment_links(content: &str, leaf: &str, planned: &[PlannedAttachment]) -> String {
  let mut result = content.to_string();
  let mut seen = HashSet::new();

  for plan in planned {
    if !seen.insert(plan.original.as_str()) {
      continue;
    }
    let search = format!("](attachments/{})", plan.original);
    let replacement = format!("]({leaf}/attachments/{})", plan.saved);
    result = result.replace(&search, &replacement);
  }

  result
}

/// Strip path separators and other unsafe characters from an attachment
/// filename.
fn sanitize_attachment_filename(filename: &str) -> String {
  filename
    .chars()
    .map(|c| match c {
      '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
      c => c,
    })
    .collect()
}

/// Pick a unique filename for an attachment within one page's attachment
/// directory: sanitize, then append `-N` before the extension until the
/// name is free.
fn generate_unique_filename(name: &str, used_filenames: &mut HashSet<String>) -> String {
  let sanitized = sanitize_attachment_filename(name);
  let (base, ext) = split_name_and_extension(&sanitized);
  let mut candidate = sanitized;
  let mut counter = 1;

  while used_filenames.contains(&candidate) {
    candidate = if ext.is_empty() {
      format!("{base}-{counter}")
    } else {
      format!("{base}-{counter}.{ext}")
    };
    counter += 1;
  }

  used_filenames.insert(candidate.clone());
  candidate
}

fn split_name_and_extension(name: &str) -> (String, String) {
  if let Some((stem, ext)) = name.rsplit_once('.') {
    (stem.to_string(), ext.to_string())
  } else {
    (name.to_string(), String::new())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cancellation_flag() {
    let cancel = Cancellation::new();
    assert!(!cancel.is_cancelled());

    let shared = cancel.clone();
    shared.cancel();
    assert!(cancel.is_cancelled());
  }

  #[test]
  fn test_sanitize_attachment_filename() {
    assert_eq!(sanitize_attachment_filename("report.pdf"), "report.pdf");
    assert_eq!(sanitize_attachment_filename("a/b\\c:d.png"), "a_b_c_d.png");
  }

  #[test]
  fn test_generate_unique_filename_appends_counter_before_extension() {
    let mut used = HashSet::new();
    assert_eq!(generate_unique_filename("photo.png", &mut used), "photo.png");
    assert_eq!(generate_unique_filename("photo.png", &mut used), "photo-1.png");
    assert_eq!(generate_unique_filename("photo.png", &mut used), "photo-2.png");
    assert_eq!(generate_unique_filename("notes", &mut used), "notes");
    assert_eq!(generate_unique_filename("notes", &mut used), "notes-1");
  }

  #[test]
  fn test_generate_unique_filename_dedups_after_sanitizing() {
    let mut used = HashSet::new();
    assert_eq!(generate_unique_filename("a/b.png", &mut used), "a_b.png");
    // A different title sanitizing to the same name still gets a suffix.
    assert_eq!(generate_unique_filename("a:b.png", &mut used), "a_b-1.png");
  }

  #[test]
  fn test_split_name_and_extension() {
    assert_eq!(split_name_and_extension("report.pdf"), ("report".to_string(), "pdf".to_string()));
    assert_eq!(split_name_and_extension("README"), ("README".to_string(), String::new()));
  }

  #[test]
  fn test_rewrite_attachment_links_uses_saved_names() {
    let planned = vec![
      PlannedAttachment {
        original: "q1:draft.png".to_string(),
        saved: "q1_draft.png".to_string(),
        download_url: None,
      },
      PlannedAttachment {
        original: "photo.png".to_string(),
        saved: "photo.png".to_string(),
        download_url: None,
      },
      // Second listing entry for the same title; the first saved copy wins.
      PlannedAttachment {
        original: "photo.png".to_string(),
        saved: "photo-1.png".to_string(),
        download_url: None,
      },
    ];

    let content = "![a](attachments/q1:draft.png) and [b](attachments/photo.png)";
    let rewritten = rewrite_attachment_links(content, "report", &planned);
    assert_eq!(
      rewritten,
      "![a](report/attachments/q1_draft.png) and [b](report/attachments/photo.png)"
    );
  }

  #[test]
  fn test_export_config_defaults() {
    let config = ExportConfig::new("https://example.atlassian.net/", "TEST", "/tmp/out");
    assert_eq!(config.base_url, "https://example.atlassian.net");
    assert_eq!(config.concurrency_limit, 5);
    assert_eq!(config.batch_size, 25);
    assert_eq!(config.max_empty_phases, 3);
    assert!(!config.dry_run);
  }
}
