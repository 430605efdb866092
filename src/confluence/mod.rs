//! Confluence REST API adapter: trait contract, HTTP client, DTOs, and URL
//! parsing helpers.

mod api;
mod client;
mod models;
mod url;

pub use api::{ApiResult, ConfluenceApi};
pub use client::ConfluenceClient;
pub use models::{
  Ancestor, Attachment, AttachmentBatch, AttachmentLinks, ConfluenceUser, Page, PageBatch, PageBody, PageLinks,
  PageSpace, PageVersion, PagedResponse, StorageFormat,
};
pub use url::{UrlInfo, extract_page_id, parse_confluence_url};
