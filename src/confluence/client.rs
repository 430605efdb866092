//! HTTP client implementation for talking to the Confluence REST API.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::api::{ApiResult, ConfluenceApi};
use super::models::{Attachment, AttachmentBatch, ConfluenceUser, Page, PageBatch, PagedResponse};
use crate::error::{ErrorKind, ExportError};

/// Fields expanded on every page fetch.
const PAGE_EXPAND: &str = "body.storage,version,ancestors,space";

/// Batch size used for child and attachment listings.
const LIST_LIMIT: usize = 50;

/// Confluence API client.
#[derive(Clone)]
pub struct ConfluenceClient {
  base_url: String,
  username: String,
  password: String,
  client: reqwest::Client,
  rate_limiter: Arc<RequestRateLimiter>,
}

/// Simple fixed-window rate limiter to cap the number of requests per interval.
#[derive(Debug)]
struct RequestRateLimiter {
  max_requests: usize,
  window: Duration,
  timestamps: Mutex<VecDeque<Instant>>,
}

impl RequestRateLimiter {
  fn new(max_requests: usize, window: Duration) -> Self {
    Self {
      max_requests,
      window,
      timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
    }
  }

  /// Wait until the caller can perform another request without exceeding the
  /// rate limit.
  async fn acquire(&self) {
    loop {
      let mut timestamps = self.timestamps.lock().await;
      let now = Instant::now();

      while let Some(earliest) = timestamps.front()
        && now.duration_since(*earliest) >= self.window
      {
        timestamps.pop_front();
      }

      if timestamps.len() < self.max_requests {
        timestamps.push_back(now);
        return;
      }

      let earliest = *timestamps.front().expect("rate limiter queue should never be empty");
      let elapsed = now.duration_since(earliest);
      let wait_duration = if elapsed >= self.window {
        Duration::from_secs(0)
      } else {
        self.window - elapsed
      };

      drop(timestamps);

      if wait_duration > Duration::from_secs(0) {
        sleep(wait_duration).await;
      }
    }
  }
}

impl ConfluenceClient {
  /// Create a new Confluence client.
  ///
  /// # Arguments
  /// * `base_url` - Base URL of the Confluence instance (e.g., https://example.atlassian.net)
  /// * `username` - The user's email address
  /// * `password` - The API token or password
  /// * `timeout_secs` - Request timeout in seconds
  /// * `rate_limit` - Maximum requests per second
  ///
  /// # Errors
  /// Returns an error if the rate limit is zero or if the underlying
  /// `reqwest::Client` cannot be built.
  pub fn new(
    base_url: impl Into<String>,
    username: impl Into<String>,
    password: impl Into<String>,
    timeout_secs: u64,
    rate_limit: usize,
  ) -> Result<Self> {
    let base_url = base_url.into();
    let username = username.into();
    let password = password.into();

    if rate_limit == 0 {
      return Err(anyhow!("Rate limit must be at least 1 request per second"));
    }

    let base_url = base_url.trim_end_matches('/').to_string();

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(timeout_secs))
      .user_agent(format!(
        "confluence-export/{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("TARGET")
      ))
      .build()
      .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))?;

    Ok(Self {
      base_url,
      username,
      password,
      client,
      rate_limiter: Arc::new(RequestRateLimiter::new(rate_limit, Duration::from_secs(1))),
    })
  }

  /// Get the authorization header value (Basic auth).
  fn auth_header(&self) -> String {
    let credentials = format!("{}:{}", self.username, self.password);
    format!("Basic {}", BASE64.encode(credentials.as_bytes()))
  }

  /// Issue a GET and surface non-2xx responses as classified errors.
  ///
  /// A 429 carries the server's `Retry-After` (seconds, converted to
  /// milliseconds) so the orchestrator's backoff can honor it.
  async fn get(&self, url: &str) -> ApiResult<reqwest::Response> {
    self.rate_limiter.acquire().await;

    let response = self
      .client
      .get(url)
      .header("Authorization", self.auth_header())
      .header("Accept", "application/json")
      .send()
      .await?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let retry_after_ms = response
      .headers()
      .get("Retry-After")
      .and_then(|value| value.to_str().ok())
      .and_then(|value| value.trim().parse::<u64>().ok())
      .map(|secs| secs * 1000);

    let body = response
      .text()
      .await
      .unwrap_or_else(|_| String::from("(no error details)"));

    let mut error = ExportError::from_status(status.as_u16(), format!("Confluence API returned {status}: {body}"));
    if let Some(millis) = retry_after_ms {
      error = error.with_retry_after_ms(millis);
    }
    Err(error)
  }

  async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
    let response = self.get(url).await?;
    response
      .json()
      .await
      .map_err(|e| ExportError::new(ErrorKind::Content, format!("Failed to parse API response: {e}")))
  }

  fn resolve_url(&self, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
      return url.to_string();
    }

    if url.starts_with("/wiki/") {
      return format!("{}{}", self.base_url, url);
    }

    if url.starts_with("/download/") {
      return format!("{}/wiki{}", self.base_url, url);
    }

    format!("{}{}", self.base_url, url)
  }
}

#[async_trait]
impl ConfluenceApi for ConfluenceClient {
  async fn get_page_with_body(&self, page_id: &str) -> ApiResult<Page> {
    let url = format!(
      "{}/wiki/rest/api/content/{page_id}?expand={PAGE_EXPAND}",
      self.base_url
    );
    self.get_json(&url).await
  }

  async fn get_child_pages(&self, page_id: &str, cursor: Option<&str>) -> ApiResult<PageBatch> {
    let start = cursor.unwrap_or("0");
    let url = format!(
      "{}/wiki/rest/api/content/{page_id}/child/page?limit={LIST_LIMIT}&start={start}",
      self.base_url
    );

    let response: PagedResponse<Page> = self.get_json(&url).await?;
    let next_cursor = response.next_cursor();
    Ok(PageBatch {
      results: response.results,
      next_cursor,
    })
  }

  async fn list_attachments(&self, page_id: &str, cursor: Option<&str>) -> ApiResult<AttachmentBatch> {
    let start = cursor.unwrap_or("0");
    let url = format!(
      "{}/wiki/rest/api/content/{page_id}/child/attachment?limit={LIST_LIMIT}&start={start}",
      self.base_url
    );

    let response: PagedResponse<Attachment> = self.get_json(&url).await?;
    let next_cursor = response.next_cursor();
    Ok(AttachmentBatch {
      results: response.results,
      next_cursor,
    })
  }

  async fn download_attachment(&self, url: &str) -> ApiResult<Vec<u8>> {
    let full_url = self.resolve_url(url);
    let response = self.get(&full_url).await?;
    let bytes = response
      .bytes()
      .await
      .map_err(|e| ExportError::new(ErrorKind::Network, format!("Failed to read attachment bytes: {e}")))?;
    Ok(bytes.to_vec())
  }

  async fn get_user(&self, user_key: &str) -> ApiResult<ConfluenceUser> {
    let url = format!("{}/wiki/rest/api/user?key={user_key}", self.base_url);
    self.get_json(&url).await
  }

  async fn get_user_by_username(&self, username: &str) -> ApiResult<ConfluenceUser> {
    let url = format!("{}/wiki/rest/api/user?username={username}", self.base_url);
    self.get_json(&url).await
  }

  async fn search_pages(&self, cql: &str, page_size: usize) -> ApiResult<Vec<Page>> {
    let encoded: String = url::form_urlencoded::byte_serialize(cql.as_bytes()).collect();
    let url = format!(
      "{}/wiki/rest/api/content/search?cql={encoded}&limit={page_size}&expand={PAGE_EXPAND}",
      self.base_url
    );

    let response: PagedResponse<Page> = self.get_json(&url).await?;
    Ok(response.results)
  }
}

#[cfg(test)]
mod tests {
  use base64::Engine as _;

  use super::*;

  fn client() -> ConfluenceClient {
    ConfluenceClient::new("https://example.atlassian.net", "user@example.com", "test-token", 30, 5).unwrap()
  }

  #[test]
  fn test_new_removes_trailing_slash() {
    let client = ConfluenceClient::new(
      "https://example.atlassian.net/",
      "user@example.com",
      "test-token",
      30,
      2,
    )
    .unwrap();
    assert_eq!(client.base_url, "https://example.atlassian.net");
  }

  #[test]
  fn test_auth_header_format() {
    let auth_header = client().auth_header();
    assert!(auth_header.starts_with("Basic "));

    let encoded = auth_header.strip_prefix("Basic ").unwrap();
    let decoded = BASE64.decode(encoded.as_bytes()).unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), "user@example.com:test-token");
  }

  #[test]
  fn test_rejects_zero_rate_limit() {
    let result = ConfluenceClient::new("https://example.atlassian.net", "user@example.com", "test-token", 30, 0);
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_rate_limiter_throttles_requests() {
    let limiter = RequestRateLimiter::new(2, Duration::from_secs(1));
    let start = Instant::now();

    limiter.acquire().await;
    limiter.acquire().await;
    limiter.acquire().await;

    assert!(
      start.elapsed() >= Duration::from_millis(900),
      "expected at least 900ms elapsed, got {:?}",
      start.elapsed()
    );
  }

  #[test]
  fn test_resolve_url_handles_absolute_urls() {
    let absolute = "https://cdn.example.com/files/image.png";
    assert_eq!(client().resolve_url(absolute), absolute);
  }

  #[test]
  fn test_resolve_url_prefixes_wiki_when_missing() {
    assert_eq!(
      client().resolve_url("/download/attachments/12345/image.png"),
      "https://example.atlassian.net/wiki/download/attachments/12345/image.png"
    );
  }

  #[test]
  fn test_resolve_url_keeps_existing_wiki_prefix() {
    assert_eq!(
      client().resolve_url("/wiki/download/attachments/12345/image.png"),
      "https://example.atlassian.net/wiki/download/attachments/12345/image.png"
    );
  }
}
