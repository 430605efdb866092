//! Parsing Confluence URLs into page identifiers.
//!
//! The link rewriter and the CLI both need to turn the URL shapes Confluence
//! emits into numeric page ids. Recognized forms:
//!
//! - `<base>/pages/<id>` and `<base>/pages/<id>/<title>`
//! - `/pages/<id>` and `/pages/<id>/<title>`
//! - `...?pageId=<id>`
//! - `/display/<spaceKey>/<title>?...pageId=<id>`

use anyhow::{Context, Result, anyhow};
use url::Url;

/// Information extracted from a full Confluence page URL.
#[derive(Debug, Clone)]
pub struct UrlInfo {
  /// Scheme and host of the Confluence instance.
  pub base_url: String,
  /// Numeric identifier of the page derived from the URL.
  pub page_id: String,
  /// Space key when the URL encodes one.
  pub space_key: Option<String>,
}

/// Parse an absolute Confluence URL supplied by the user.
///
/// # Errors
/// Returns an error when the URL is malformed or no page id can be derived.
pub fn parse_confluence_url(input: &str) -> Result<UrlInfo> {
  let parsed = Url::parse(input).context("Invalid URL format")?;

  let base_url = format!(
    "{}://{}",
    parsed.scheme(),
    parsed.host_str().context("URL missing host")?
  );

  let page_id = extract_page_id(input).ok_or_else(|| anyhow!("URL does not identify a Confluence page: {input}"))?;

  let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
  let space_key = segments
    .iter()
    .position(|&s| s == "spaces" || s == "display")
    .and_then(|pos| segments.get(pos + 1))
    .map(|s| s.to_string());

  Ok(UrlInfo {
    base_url,
    page_id,
    space_key,
  })
}

/// Extract a numeric page id from any recognized Confluence URL form.
///
/// Works on absolute URLs, host-relative paths, and bare query strings. The
/// id is matched exactly against a full path segment or the complete
/// `pageId` parameter value, never by substring.
///
/// # Returns
/// `Some(id)` when a numeric id is present, otherwise `None`.
pub fn extract_page_id(input: &str) -> Option<String> {
  if let Some(id) = page_id_from_query(input) {
    return Some(id);
  }
  page_id_from_path(input)
}

fn page_id_from_query(input: &str) -> Option<String> {
  let query = input.split_once('?').map(|(_, q)| q)?;
  let query = query.split('#').next().unwrap_or(query);

  for pair in query.split('&') {
    if let Some((key, value)) = pair.split_once('=')
      && key == "pageId"
      && is_numeric_id(value)
    {
      return Some(value.to_string());
    }
  }
  None
}

fn page_id_from_path(input: &str) -> Option<String> {
  let path = input.split(['?', '#']).next().unwrap_or(input);
  let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

  let pages_pos = segments.iter().position(|&s| s == "pages")?;
  let candidate = segments.get(pages_pos + 1)?;

  if is_numeric_id(candidate) {
    Some((*candidate).to_string())
  } else {
    None
  }
}

fn is_numeric_id(value: &str) -> bool {
  !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_confluence_url_with_space() {
    let url = "https://example.atlassian.net/wiki/spaces/DOCS/pages/229483/Getting+Started";
    let info = parse_confluence_url(url).unwrap();

    assert_eq!(info.base_url, "https://example.atlassian.net");
    assert_eq!(info.page_id, "229483");
    assert_eq!(info.space_key, Some("DOCS".to_string()));
  }

  #[test]
  fn test_parse_confluence_url_without_space() {
    let info = parse_confluence_url("https://example.atlassian.net/wiki/pages/123456").unwrap();
    assert_eq!(info.page_id, "123456");
    assert_eq!(info.space_key, None);
  }

  #[test]
  fn test_parse_confluence_url_rejects_non_numeric() {
    assert!(parse_confluence_url("https://example.atlassian.net/wiki/pages/notanumber").is_err());
    assert!(parse_confluence_url("https://example.com/not-a-confluence-url").is_err());
  }

  #[test]
  fn test_extract_page_id_path_forms() {
    assert_eq!(
      extract_page_id("https://example.atlassian.net/wiki/pages/300"),
      Some("300".to_string())
    );
    assert_eq!(
      extract_page_id("https://example.atlassian.net/wiki/pages/300/Other+Page"),
      Some("300".to_string())
    );
    assert_eq!(extract_page_id("/pages/300"), Some("300".to_string()));
    assert_eq!(extract_page_id("/pages/300/Other"), Some("300".to_string()));
  }

  #[test]
  fn test_extract_page_id_query_forms() {
    assert_eq!(
      extract_page_id("https://example.net/wiki/x?pageId=8810"),
      Some("8810".to_string())
    );
    assert_eq!(
      extract_page_id("/display/SPACE/Some+Title?foo=1&pageId=42"),
      Some("42".to_string())
    );
  }

  #[test]
  fn test_extract_page_id_exact_segment_match_only() {
    // `/pages/12` must not be derived from `/pages/123`.
    assert_eq!(extract_page_id("/pages/123"), Some("123".to_string()));
    assert_eq!(extract_page_id("/pages/12x"), None);
    assert_eq!(extract_page_id("/pages/"), None);
  }

  #[test]
  fn test_extract_page_id_ignores_fragments() {
    assert_eq!(extract_page_id("/pages/55/Title#anchor"), Some("55".to_string()));
    assert_eq!(extract_page_id("?pageId=9#frag"), Some("9".to_string()));
  }

  #[test]
  fn test_extract_page_id_unrelated_urls() {
    assert_eq!(extract_page_id("https://example.com/blog/post"), None);
    assert_eq!(extract_page_id("#anchor"), None);
    assert_eq!(extract_page_id("mailto:user@example.com"), None);
  }
}
