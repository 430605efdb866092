//! Storage format to Markdown transformation.
//!
//! [`transform`] is pure and deterministic given a page and a context: it
//! parses the storage-format body, emits Markdown with YAML front matter,
//! and reports everything it saw along the way - inter-page links, user
//! mentions, attachments, macro expansions, and candidate page ids for
//! discovery. It never decides what gets fetched; that is the
//! orchestrator's call.

mod elements;
mod entities;
mod front_matter;
mod macros;
mod tables;
mod xml;

use std::collections::BTreeMap;

use roxmltree::Document;

pub use front_matter::FrontMatter;

use crate::cleanup;
use crate::confluence::{Page, extract_page_id};
use crate::error::{ErrorKind, ExportError};

/// Context shared by every transformation in a run.
#[derive(Debug, Clone)]
pub struct TransformContext {
  /// Base URL of the Confluence instance, no trailing slash.
  pub base_url: String,
  /// Space being exported.
  pub space_key: String,
}

impl TransformContext {
  pub fn new(base_url: impl Into<String>, space_key: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      space_key: space_key.into(),
    }
  }
}

/// A link to another Confluence page found in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
  /// Target page title for title-based (`ri:page`) links.
  pub title: Option<String>,
  /// Space key for title-based links.
  pub space_key: Option<String>,
  /// Numeric page id when derivable from the URL.
  pub page_id: Option<String>,
  /// The href as emitted into the Markdown.
  pub href: String,
}

/// A user mention found in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReference {
  pub user_key: Option<String>,
  pub username: Option<String>,
  /// The placeholder token emitted into the Markdown (`@user:<key>`).
  pub placeholder: String,
}

/// An attachment referenced by a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentReference {
  pub filename: String,
  /// Page the attachment belongs to.
  pub page_id: String,
  /// Download URL once the orchestrator matched it against the listing.
  pub download_url: Option<String>,
}

/// What happened to one structured macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroDisposition {
  /// Natively converted (supported macro).
  Expanded,
  /// Unsupported; text content kept.
  Passthrough,
  /// Unsupported and empty; dropped entirely.
  Removed,
}

/// Record of a macro encountered during transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroExpansion {
  pub name: String,
  pub disposition: MacroDisposition,
  pub params: BTreeMap<String, String>,
}

/// Accumulator for everything discovered while converting one page.
#[derive(Debug, Default)]
pub struct Discovery {
  pub links: Vec<LinkReference>,
  pub users: Vec<UserReference>,
  /// Attachment filenames (page id attached by [`transform`]).
  pub attachments: Vec<String>,
  pub macro_expansions: Vec<MacroExpansion>,
  pub discovered_page_ids: Vec<String>,
}

impl Discovery {
  /// Record an `<a href>` link; Confluence page URLs also yield a
  /// discovered page id.
  fn record_url_link(&mut self, href: &str, _text: &str) {
    if href.is_empty() || href.starts_with('#') {
      return;
    }

    if let Some(page_id) = extract_page_id(href) {
      self.links.push(LinkReference {
        title: None,
        space_key: None,
        page_id: Some(page_id.clone()),
        href: href.to_string(),
      });
      self.record_discovered(page_id);
    }
  }

  /// Record a title-based `ri:page` link.
  fn record_page_link(&mut self, title: &str, space_key: &str, href: &str) {
    self.links.push(LinkReference {
      title: Some(title.to_string()),
      space_key: Some(space_key.to_string()),
      page_id: None,
      href: href.to_string(),
    });
  }

  fn record_user(&mut self, user_key: Option<&str>, username: Option<&str>, placeholder: &str) {
    self.users.push(UserReference {
      user_key: user_key.map(str::to_string),
      username: username.map(str::to_string),
      placeholder: placeholder.to_string(),
    });
  }

  fn record_attachment(&mut self, filename: &str) {
    if !self.attachments.iter().any(|f| f == filename) {
      self.attachments.push(filename.to_string());
    }
  }

  fn record_macro(&mut self, name: &str, disposition: MacroDisposition, params: BTreeMap<String, String>) {
    self.macro_expansions.push(MacroExpansion {
      name: name.to_string(),
      disposition,
      params,
    });
  }

  fn record_discovered(&mut self, page_id: String) {
    if !self.discovered_page_ids.contains(&page_id) {
      self.discovered_page_ids.push(page_id);
    }
  }
}

/// Result of transforming one page.
#[derive(Debug)]
pub struct TransformOutput {
  /// Front matter plus converted body, ready for the atomic writer.
  pub content: String,
  pub front_matter: FrontMatter,
  pub links: Vec<LinkReference>,
  pub users: Vec<UserReference>,
  pub attachments: Vec<AttachmentReference>,
  pub macro_expansions: Vec<MacroExpansion>,
  /// Candidate ids for the download queue, deduplicated, in discovery order.
  pub discovered_page_ids: Vec<String>,
}

/// Convert a page's storage-format body to Markdown.
///
/// # Errors
/// Returns a `content`-kind error when the page has no storage body or the
/// body cannot be parsed.
pub fn transform(page: &Page, cx: &TransformContext) -> Result<TransformOutput, ExportError> {
  let storage = page.storage_content().ok_or_else(|| {
    ExportError::new(
      ErrorKind::Content,
      format!("Page '{}' has no storage content", page.title),
    )
  })?;

  let preprocessed = entities::preprocess_html_entities(storage);
  let wrapped = xml::wrap_with_namespaces(&preprocessed);

  let document = Document::parse(&wrapped).map_err(|e| {
    ExportError::new(
      ErrorKind::Content,
      format!("Failed to parse storage content of page '{}': {e}", page.title),
    )
  })?;

  let mut out = Discovery::default();
  let body = elements::convert_node(document.root_element(), cx, &mut out);
  let body = cleanup::normalize_whitespace(&body);

  let front_matter = FrontMatter::from_page(page);
  let content = format!("{}\n{body}", front_matter.render());

  let attachments = out
    .attachments
    .into_iter()
    .map(|filename| AttachmentReference {
      filename,
      page_id: page.id.clone(),
      download_url: None,
    })
    .collect();

  Ok(TransformOutput {
    content,
    front_matter,
    links: out.links,
    users: out.users,
    attachments,
    macro_expansions: out.macro_expansions,
    discovered_page_ids: out.discovered_page_ids,
  })
}

/// Second pass over transformed content: replace user placeholders with
/// resolved display names by exact-string replacement.
///
/// # Arguments
/// * `content` - Markdown produced by [`transform`].
/// * `resolutions` - Placeholder token to display name map.
pub fn resolve_user_placeholders(content: &str, resolutions: &BTreeMap<String, String>) -> String {
  let mut resolved = content.to_string();
  for (placeholder, display_name) in resolutions {
    resolved = resolved.replace(placeholder.as_str(), display_name.as_str());
  }
  resolved
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::confluence::PageBody;

  fn page(id: &str, title: &str, storage: &str) -> Page {
    serde_json::from_value(serde_json::json!({
      "id": id,
      "title": title,
      "status": "current",
      "body": {"storage": {"value": storage, "representation": "storage"}},
      "version": {"number": 3},
      "ancestors": [{"id": "1", "title": "Root"}]
    }))
    .unwrap()
  }

  fn cx() -> TransformContext {
    TransformContext::new("https://example.atlassian.net", "TEST")
  }

  #[test]
  fn test_transform_simple_page() {
    let output = transform(&page("100", "Hello", "<p>Hi</p>"), &cx()).unwrap();

    assert!(output.content.starts_with("---\n"));
    assert!(output.content.contains("title: \"Hello\""));
    assert!(output.content.contains("id: \"100\""));
    assert!(output.content.contains("version: 3"));
    assert!(output.content.contains("parentId: \"1\""));
    assert!(output.content.contains("\nHi\n"));
  }

  #[test]
  fn test_transform_without_body_is_content_error() {
    let bare = Page {
      id: "1".to_string(),
      title: "Bare".to_string(),
      status: String::new(),
      body: None,
      version: None,
      ancestors: Vec::new(),
      space: None,
      links: None,
    };
    let err = transform(&bare, &cx()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Content);
  }

  #[test]
  fn test_transform_body_variant_without_storage() {
    let mut page = page("1", "X", "<p>x</p>");
    page.body = Some(PageBody { storage: None });
    assert!(transform(&page, &cx()).is_err());
  }

  #[test]
  fn test_transform_is_deterministic() {
    let source = page(
      "9",
      "Det",
      r#"<p><a href="/pages/300/Other">Other</a></p><ac:structured-macro ac:name="children"/>"#,
    );
    let first = transform(&source, &cx()).unwrap();
    let second = transform(&source, &cx()).unwrap();
    assert_eq!(first.content, second.content);
    assert_eq!(first.discovered_page_ids, second.discovered_page_ids);
  }

  #[test]
  fn test_transform_collects_discovery() {
    let source = page(
      "9",
      "Links",
      r#"
        <p><a href="/pages/300/Other">Other</a> and <a href="/pages/300/Other">again</a></p>
        <ac:link><ri:page ri:content-title="Guide" ri:space-key="TEST"/></ac:link>
        <ac:link><ri:user ri:userkey="u1"/></ac:link>
        <ac:image><ri:attachment ri:filename="a.png"/></ac:image>
      "#,
    );
    let output = transform(&source, &cx()).unwrap();

    // Discovered ids are deduplicated.
    assert_eq!(output.discovered_page_ids, vec!["300"]);
    assert_eq!(output.links.len(), 3);
    assert_eq!(output.users.len(), 1);
    assert_eq!(output.attachments.len(), 1);
    assert_eq!(output.attachments[0].page_id, "9");
    assert_eq!(output.attachments[0].filename, "a.png");
  }

  #[test]
  fn test_resolve_user_placeholders() {
    let mut resolutions = BTreeMap::new();
    resolutions.insert("@user:u1".to_string(), "Ada Lovelace".to_string());

    let content = "Reviewed by @user:u1 and @user:u2";
    let resolved = resolve_user_placeholders(content, &resolutions);
    assert_eq!(resolved, "Reviewed by Ada Lovelace and @user:u2");
  }
}
