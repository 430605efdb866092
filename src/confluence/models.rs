//! Data transfer objects returned by the Confluence REST API.

use serde::{Deserialize, Serialize};

/// Confluence page metadata and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
  /// Unique numeric identifier assigned by Confluence.
  pub id: String,
  /// Human-readable title displayed in the UI.
  pub title: String,
  /// Publication status such as `"current"` or `"archived"`.
  #[serde(default)]
  pub status: String,
  /// Rich body content in different renderings.
  pub body: Option<PageBody>,
  /// Version counter, incremented on every edit.
  pub version: Option<PageVersion>,
  /// Ancestor chain from the space root down to the direct parent.
  #[serde(default)]
  pub ancestors: Vec<Ancestor>,
  /// Space metadata describing where the page lives.
  pub space: Option<PageSpace>,
  #[serde(rename = "_links")]
  /// Useful hyperlinks, including the canonical UI URL.
  pub links: Option<PageLinks>,
}

impl Page {
  /// The storage-format body, when the page was fetched with one.
  pub fn storage_content(&self) -> Option<&str> {
    self
      .body
      .as_ref()
      .and_then(|body| body.storage.as_ref())
      .map(|storage| storage.value.as_str())
  }

  /// Version number, when the API expanded it.
  pub fn version_number(&self) -> Option<u32> {
    self.version.as_ref().map(|v| v.number)
  }

  /// Id of the direct parent (last ancestor), when one exists.
  pub fn parent_id(&self) -> Option<&str> {
    self.ancestors.last().map(|a| a.id.as_str())
  }
}

/// Page body content in various formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageBody {
  /// Confluence storage-format XHTML representation.
  pub storage: Option<StorageFormat>,
}

/// Storage format (Confluence's internal format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFormat {
  /// Raw XHTML markup returned by the API.
  pub value: String,
  /// Representation name (typically `"storage"`).
  pub representation: String,
}

/// Page version metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVersion {
  /// Monotonic edit counter.
  pub number: u32,
  /// Last modification time as reported by the API.
  #[serde(rename = "when", skip_serializing_if = "Option::is_none")]
  pub modified_date: Option<String>,
}

/// One entry in a page's ancestor chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ancestor {
  pub id: String,
  #[serde(default)]
  pub title: String,
}

/// Space information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpace {
  /// Short key that uniquely identifies the space.
  pub key: String,
  /// Human-readable space name.
  #[serde(default)]
  pub name: String,
}

/// Page links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLinks {
  #[serde(rename = "webui")]
  /// Path to the page within the Confluence web UI.
  pub web_ui: Option<String>,
}

/// Attachment metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
  /// Unique attachment identifier.
  pub id: String,
  /// Original filename/title displayed in Confluence.
  pub title: String,
  #[serde(rename = "mediaType")]
  /// MIME type reported by Confluence, when known.
  pub media_type: Option<String>,
  #[serde(rename = "fileSize")]
  /// Size of the attachment in bytes.
  pub file_size: Option<u64>,
  #[serde(rename = "_links")]
  /// Download and metadata links for the file.
  pub links: Option<AttachmentLinks>,
}

impl Attachment {
  pub fn download_url(&self) -> Option<&str> {
    self.links.as_ref().and_then(|l| l.download.as_deref())
  }
}

/// Attachment links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentLinks {
  /// Direct download URL for the attachment bytes.
  pub download: Option<String>,
}

/// A batch of child pages plus the cursor for the next batch.
#[derive(Debug, Clone, Default)]
pub struct PageBatch {
  pub results: Vec<Page>,
  /// Opaque cursor; `None` means the listing is exhausted.
  pub next_cursor: Option<String>,
}

/// A batch of attachments plus the cursor for the next batch.
#[derive(Debug, Clone, Default)]
pub struct AttachmentBatch {
  pub results: Vec<Attachment>,
  pub next_cursor: Option<String>,
}

/// Paged REST response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct PagedResponse<T> {
  pub results: Vec<T>,
  #[serde(default)]
  pub start: Option<usize>,
  #[serde(default)]
  pub limit: Option<usize>,
  #[serde(default)]
  pub size: Option<usize>,
}

impl<T> PagedResponse<T> {
  /// Cursor (start offset) for the next page, or `None` when exhausted.
  pub fn next_cursor(&self) -> Option<String> {
    let start = self.start.unwrap_or(0);
    let limit = self.limit?;
    let size = self.size.unwrap_or(self.results.len());
    if size >= limit {
      Some((start + limit).to_string())
    } else {
      None
    }
  }
}

/// User record from the user lookup endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceUser {
  /// Stable user key used by `ri:user` references.
  #[serde(rename = "userKey", alias = "accountId")]
  pub user_key: String,
  /// Login name, when the deployment exposes one.
  pub username: Option<String>,
  #[serde(rename = "displayName")]
  /// Full display name configured in the profile.
  pub display_name: String,
}
