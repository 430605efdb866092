//! Fake Confluence API for testing.
//!
//! Returns predefined responses without any network traffic, records every
//! page fetch, and can inject HTTP failures, transient errors, and a
//! cancellation trigger to drive interrupt scenarios.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use confluence_export::confluence::{
  ApiResult, Attachment, AttachmentBatch, ConfluenceApi, ConfluenceUser, Page, PageBatch,
};
use confluence_export::error::ExportError;
use confluence_export::exporter::Cancellation;

/// A scripted Confluence API.
#[derive(Default)]
pub struct FakeConfluence {
  pages: HashMap<String, Page>,
  child_pages: HashMap<String, Vec<String>>,
  attachments: HashMap<String, Vec<Attachment>>,
  attachment_bytes: HashMap<String, Vec<u8>>,
  users: HashMap<String, ConfluenceUser>,
  /// Page id to HTTP status returned instead of the page.
  failures: HashMap<String, u16>,
  /// Page id to number of transient 503s served before success.
  transient_failures: Mutex<HashMap<String, u32>>,
  /// Ids returned by any space-level search.
  search_seed: Vec<String>,
  /// Label to matching page ids for content-by-label searches.
  labels: HashMap<String, Vec<String>>,
  /// Cancel this token when the given page id is fetched.
  cancel_on_fetch: Mutex<Option<(String, Cancellation)>>,
  /// Every page id passed to `get_page_with_body`, in call order.
  fetch_log: Mutex<Vec<String>>,
}

impl FakeConfluence {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_page(&mut self, page: Page) {
    self.search_seed.push(page.id.clone());
    self.pages.insert(page.id.clone(), page);
  }

  /// Add a page reachable only through discovery, not space search.
  pub fn add_unseeded_page(&mut self, page: Page) {
    self.pages.insert(page.id.clone(), page);
  }

  pub fn add_child(&mut self, parent_id: &str, child_id: &str) {
    self
      .child_pages
      .entry(parent_id.to_string())
      .or_default()
      .push(child_id.to_string());
  }

  /// Register an attachment on a page. Repeated titles are allowed and get
  /// distinct download URLs, like a real instance with versioned uploads.
  pub fn add_attachment(&mut self, page_id: &str, filename: &str, bytes: &[u8]) {
    let seq = self.attachments.get(page_id).map_or(0, |entries| entries.len());
    let download = format!("/download/attachments/{page_id}/{seq}/{filename}");
    let attachment: Attachment = serde_json::from_value(serde_json::json!({
      "id": format!("att-{page_id}-{seq}"),
      "title": filename,
      "mediaType": "application/octet-stream",
      "fileSize": bytes.len(),
      "_links": {"download": download.clone()}
    }))
    .expect("fixture attachment must deserialize");

    self.attachments.entry(page_id.to_string()).or_default().push(attachment);
    self.attachment_bytes.insert(download, bytes.to_vec());
  }

  pub fn add_user(&mut self, user_key: &str, display_name: &str) {
    self.users.insert(
      user_key.to_string(),
      ConfluenceUser {
        user_key: user_key.to_string(),
        username: None,
        display_name: display_name.to_string(),
      },
    );
  }

  /// Serve this HTTP status for a page instead of content. The page still
  /// appears in space search results (a stub entry), matching an instance
  /// where search lists pages the caller cannot read.
  pub fn fail_with_status(&mut self, page_id: &str, status: u16) {
    let stub: Page = serde_json::from_value(serde_json::json!({
      "id": page_id,
      "title": format!("Restricted {page_id}"),
      "status": "current"
    }))
    .expect("stub page must deserialize");
    self.add_page(stub);
    self.failures.insert(page_id.to_string(), status);
  }

  /// Serve `count` 503s for a page before succeeding.
  pub fn fail_transiently(&mut self, page_id: &str, count: u32) {
    self
      .transient_failures
      .lock()
      .unwrap()
      .insert(page_id.to_string(), count);
  }

  pub fn add_label(&mut self, label: &str, page_ids: &[&str]) {
    self
      .labels
      .insert(label.to_string(), page_ids.iter().map(|s| s.to_string()).collect());
  }

  /// Cancel `token` when `page_id` is fetched (drives interrupt tests).
  pub fn cancel_when_fetching(&self, page_id: &str, token: Cancellation) {
    *self.cancel_on_fetch.lock().unwrap() = Some((page_id.to_string(), token));
  }

  /// Page ids fetched so far, in order.
  pub fn fetched_ids(&self) -> Vec<String> {
    self.fetch_log.lock().unwrap().clone()
  }
}

#[async_trait]
impl ConfluenceApi for FakeConfluence {
  async fn get_page_with_body(&self, page_id: &str) -> ApiResult<Page> {
    self.fetch_log.lock().unwrap().push(page_id.to_string());

    if let Some((trigger, token)) = self.cancel_on_fetch.lock().unwrap().as_ref()
      && trigger == page_id
    {
      token.cancel();
    }

    {
      let mut transient = self.transient_failures.lock().unwrap();
      if let Some(remaining) = transient.get_mut(page_id)
        && *remaining > 0
      {
        *remaining -= 1;
        return Err(ExportError::from_status(503, "Service Unavailable"));
      }
    }

    if let Some(status) = self.failures.get(page_id) {
      return Err(ExportError::from_status(*status, format!("HTTP {status} for page {page_id}")));
    }

    self
      .pages
      .get(page_id)
      .cloned()
      .ok_or_else(|| ExportError::from_status(404, format!("No content found with id {page_id}")))
  }

  async fn get_child_pages(&self, page_id: &str, _cursor: Option<&str>) -> ApiResult<PageBatch> {
    let results = self
      .child_pages
      .get(page_id)
      .map(|ids| ids.iter().filter_map(|id| self.pages.get(id).cloned()).collect())
      .unwrap_or_default();

    Ok(PageBatch {
      results,
      next_cursor: None,
    })
  }

  async fn list_attachments(&self, page_id: &str, _cursor: Option<&str>) -> ApiResult<AttachmentBatch> {
    Ok(AttachmentBatch {
      results: self.attachments.get(page_id).cloned().unwrap_or_default(),
      next_cursor: None,
    })
  }

  async fn download_attachment(&self, url: &str) -> ApiResult<Vec<u8>> {
    self
      .attachment_bytes
      .get(url)
      .cloned()
      .ok_or_else(|| ExportError::from_status(404, format!("no attachment at {url}")))
  }

  async fn get_user(&self, user_key: &str) -> ApiResult<ConfluenceUser> {
    self
      .users
      .get(user_key)
      .cloned()
      .ok_or_else(|| ExportError::from_status(404, format!("no user {user_key}")))
  }

  async fn get_user_by_username(&self, username: &str) -> ApiResult<ConfluenceUser> {
    self
      .users
      .values()
      .find(|user| user.username.as_deref() == Some(username))
      .cloned()
      .ok_or_else(|| ExportError::from_status(404, format!("no user named {username}")))
  }

  async fn search_pages(&self, cql: &str, page_size: usize) -> ApiResult<Vec<Page>> {
    // Label searches carry `label = "..."`; everything else is treated as
    // the space seed query.
    if let Some(rest) = cql.split("label = \"").nth(1) {
      let label = rest.split('"').next().unwrap_or_default();
      let ids = self.labels.get(label).cloned().unwrap_or_default();
      return Ok(
        ids
          .iter()
          .filter_map(|id| self.pages.get(id).cloned())
          .take(page_size)
          .collect(),
      );
    }

    Ok(
      self
        .search_seed
        .iter()
        .filter_map(|id| self.pages.get(id).cloned())
        .take(page_size)
        .collect(),
    )
  }
}
