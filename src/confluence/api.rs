//! Trait definition for the Confluence API adapter.
//!
//! The export core depends only on this contract; tests run against a fake
//! implementation and the binary wires in the HTTP client.

use async_trait::async_trait;

use super::models::{AttachmentBatch, ConfluenceUser, Page, PageBatch};
use crate::error::ExportError;

/// Result alias for API calls; errors carry a classified kind and, when the
/// failure was HTTP-level, the status code.
pub type ApiResult<T> = Result<T, ExportError>;

/// Confluence API operations the export pipeline needs.
#[async_trait]
pub trait ConfluenceApi: Send + Sync {
  /// Fetch a page with its storage-format body, version, and ancestors.
  async fn get_page_with_body(&self, page_id: &str) -> ApiResult<Page>;

  /// List one batch of direct children of a page.
  ///
  /// # Arguments
  /// * `page_id` - Parent page.
  /// * `cursor` - Cursor from the previous batch, or `None` for the first.
  async fn get_child_pages(&self, page_id: &str, cursor: Option<&str>) -> ApiResult<PageBatch>;

  /// List one batch of attachments on a page.
  async fn list_attachments(&self, page_id: &str, cursor: Option<&str>) -> ApiResult<AttachmentBatch>;

  /// Download attachment bytes from a (possibly relative) download URL.
  async fn download_attachment(&self, url: &str) -> ApiResult<Vec<u8>>;

  /// Look up a user by their stable user key.
  async fn get_user(&self, user_key: &str) -> ApiResult<ConfluenceUser>;

  /// Look up a user by their login name.
  async fn get_user_by_username(&self, username: &str) -> ApiResult<ConfluenceUser>;

  /// Run a CQL search and return up to `page_size` matching pages.
  async fn search_pages(&self, cql: &str, page_size: usize) -> ApiResult<Vec<Page>>;
}
