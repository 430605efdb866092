//! Final link-rewriting pass.
//!
//! After every page is emitted, Confluence URLs inside the Markdown are
//! resolved to POSIX-relative paths using the manifest. Resolution order:
//! exact URL match, extracted page id, then a normalized title match.
//! Candidates that cannot be resolved are counted as broken and left
//! unchanged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cleanup::{extract_code_fences, restore_code_fences};
use crate::confluence::extract_page_id;
use crate::fsutil;
use crate::manifest::Manifest;
use crate::slug;

/// Outcome counters for the rewriting pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
  pub files_scanned: usize,
  pub links_rewritten: usize,
  /// Confluence-shaped links whose target is not in the manifest.
  pub broken_links: usize,
}

/// Resolution decision for one link URL.
enum Resolution {
  /// Replace the URL with this relative path.
  Rewrite(String),
  /// Confluence-shaped but unresolvable; count and leave unchanged.
  Broken,
  /// Not a rewriting candidate; leave unchanged silently.
  Skip,
}

/// Lookup tables built once per pass from the manifest.
struct LinkIndex {
  /// Page id to file path (relative to the space directory).
  by_id: HashMap<String, String>,
  /// Exact URL forms to file path.
  by_url: HashMap<String, String>,
  /// Normalized (slugified) title to file path.
  by_title: HashMap<String, String>,
  base_url: String,
}

impl LinkIndex {
  fn build(manifest: &Manifest, base_url: &str) -> Self {
    let base_url = base_url.trim_end_matches('/').to_string();
    let mut by_id = HashMap::new();
    let mut by_url = HashMap::new();
    let mut by_title = HashMap::new();

    for entry in manifest.entries.iter().filter(|e| e.status.has_file()) {
      by_id.insert(entry.id.clone(), entry.path.clone());

      for form in [
        format!("{base_url}/pages/{}", entry.id),
        format!("{base_url}/wiki/pages/{}", entry.id),
        format!("/pages/{}", entry.id),
        format!(
          "{base_url}/wiki/display/{}/{}",
          manifest.space_key,
          entry.title.replace(' ', "+")
        ),
      ] {
        by_url.insert(form, entry.path.clone());
      }

      let normalized = slug::slugify(&entry.title, slug::DEFAULT_MAX_LENGTH);
      if !normalized.is_empty() {
        // First title wins; colliding titles fall back to id resolution.
        by_title.entry(normalized).or_insert_with(|| entry.path.clone());
      }
    }

    Self {
      by_id,
      by_url,
      by_title,
      base_url,
    }
  }

  /// Resolve one URL according to the documented precedence.
  fn resolve(&self, url: &str, from_path: &str) -> Resolution {
    if url.is_empty() || url.starts_with('#') {
      return Resolution::Skip;
    }

    // Non-web schemes are never candidates.
    if let Some((scheme, _)) = url.split_once(':')
      && !scheme.contains('/')
      && !matches!(scheme, "http" | "https" | "file")
    {
      return Resolution::Skip;
    }

    let is_absolute = url.starts_with("http://") || url.starts_with("https://");
    let is_site_relative = url.starts_with('/');

    if !is_absolute && !is_site_relative {
      // Already-relative links are left alone.
      return Resolution::Skip;
    }

    if is_absolute && !url.starts_with(&self.base_url) {
      // Some other site entirely.
      return Resolution::Skip;
    }

    let without_fragment = url.split('#').next().unwrap_or(url);

    // 1. Exact URL match.
    if let Some(target) = self.by_url.get(without_fragment) {
      return self.rewrite_to(target, from_path);
    }

    // 2. Extracted page id, matched exactly.
    if let Some(page_id) = extract_page_id(without_fragment) {
      return match self.by_id.get(&page_id) {
        Some(target) => self.rewrite_to(target, from_path),
        None => Resolution::Broken,
      };
    }

    // 3. Normalized title match for /display/ style URLs.
    if let Some(title_segment) = display_title_segment(without_fragment) {
      let normalized = slug::slugify(&title_segment, slug::DEFAULT_MAX_LENGTH);
      return match self.by_title.get(&normalized) {
        Some(target) => self.rewrite_to(target, from_path),
        None => Resolution::Broken,
      };
    }

    // Same-instance URL that is not page-shaped (e.g. a space overview).
    Resolution::Skip
  }

  fn rewrite_to(&self, target: &str, from_path: &str) -> Resolution {
    Resolution::Rewrite(fsutil::relative_path(Path::new(from_path), Path::new(target)))
  }
}

/// The decoded title segment of a `/display/<space>/<title>` URL.
fn display_title_segment(url: &str) -> Option<String> {
  let path = url.split('?').next().unwrap_or(url);
  let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
  let display_pos = segments.iter().position(|&s| s == "display")?;
  let title = segments.get(display_pos + 2)?;
  Some(title.replace('+', " ").replace("%20", " "))
}

/// Rewrite all Markdown links in every emitted file.
///
/// # Arguments
/// * `space_dir` - Directory the manifest's paths are relative to.
/// * `manifest` - Completed manifest of the run.
/// * `base_url` - Base URL of the Confluence instance.
///
/// # Returns
/// Counters for scanned files, rewritten links, and broken links.
pub fn rewrite_links(space_dir: &Path, manifest: &Manifest, base_url: &str) -> Result<RewriteStats> {
  let index = LinkIndex::build(manifest, base_url);
  let mut stats = RewriteStats::default();

  for entry in manifest.entries.iter().filter(|e| e.status.has_file()) {
    let file_path: PathBuf = space_dir.join(&entry.path);
    let content = std::fs::read_to_string(&file_path)
      .with_context(|| format!("Failed to read {} for link rewriting", file_path.display()))?;

    let (rewritten, rewrites, broken) = rewrite_document(&content, &entry.path, &index);
    stats.files_scanned += 1;
    stats.links_rewritten += rewrites;
    stats.broken_links += broken;

    if rewritten != content {
      fsutil::write_atomic_string(&file_path, &rewritten)?;
      debug!(path = %entry.path, rewrites, "rewrote links");
    }
  }

  info!(
    files = stats.files_scanned,
    rewritten = stats.links_rewritten,
    broken = stats.broken_links,
    "link rewriting complete"
  );
  Ok(stats)
}

/// Rewrite `[text](url)` links in one document, shielding code fences.
fn rewrite_document(content: &str, from_path: &str, index: &LinkIndex) -> (String, usize, usize) {
  let (shielded, fences) = extract_code_fences(content);

  let mut result = String::with_capacity(shielded.len());
  let mut rewrites = 0;
  let mut broken = 0;
  let mut cursor = 0;

  while let Some(marker) = shielded[cursor..].find("](") {
    let url_start = cursor + marker + 2;
    let Some(close_offset) = shielded[url_start..].find(')') else {
      break;
    };
    let url_end = url_start + close_offset;
    let url = &shielded[url_start..url_end];

    result.push_str(&shielded[cursor..url_start]);

    match index.resolve(url, from_path) {
      Resolution::Rewrite(path) => {
        result.push_str(&path);
        rewrites += 1;
      }
      Resolution::Broken => {
        result.push_str(url);
        broken += 1;
      }
      Resolution::Skip => result.push_str(url),
    }

    cursor = url_end;
  }

  result.push_str(&shielded[cursor..]);
  (restore_code_fences(&result, &fences), rewrites, broken)
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;
  use crate::manifest::ManifestEntry;

  const BASE: &str = "https://example.atlassian.net";

  fn manifest() -> Manifest {
    let mut manifest = Manifest::new("TEST");
    manifest.upsert(ManifestEntry::exported("100", "Hello", "100-hello.md", "h1"));
    manifest.upsert(ManifestEntry::exported("300", "Other", "other.md", "h2"));
    manifest.upsert(ManifestEntry::exported("400", "Deep Page", "guide/deep.md", "h3"));
    manifest.upsert(ManifestEntry::without_file(
      "500",
      "Denied",
      crate::manifest::EntryStatus::Denied,
    ));
    manifest
  }

  fn index() -> LinkIndex {
    LinkIndex::build(&manifest(), BASE)
  }

  #[test]
  fn test_rewrite_by_page_id_path() {
    let (output, rewrites, broken) = rewrite_document("See [Other](/pages/300/Other).", "100-hello.md", &index());
    assert_eq!(output, "See [Other](other.md).");
    assert_eq!(rewrites, 1);
    assert_eq!(broken, 0);
  }

  #[test]
  fn test_rewrite_by_query_page_id() {
    let (output, rewrites, _) = rewrite_document(
      &format!("[x]({BASE}/wiki/something?pageId=400)"),
      "100-hello.md",
      &index(),
    );
    assert_eq!(output, "[x](guide/deep.md)");
    assert_eq!(rewrites, 1);
  }

  #[test]
  fn test_rewrite_display_url_by_title() {
    let (output, rewrites, _) = rewrite_document(
      &format!("[Deep]({BASE}/wiki/display/TEST/Deep+Page)"),
      "100-hello.md",
      &index(),
    );
    assert_eq!(output, "[Deep](guide/deep.md)");
    assert_eq!(rewrites, 1);
  }

  #[test]
  fn test_relative_path_crosses_directories() {
    let (output, _, _) = rewrite_document("[Home](/pages/100)", "guide/deep.md", &index());
    assert_eq!(output, "[Home](../100-hello.md)");
  }

  #[test]
  fn test_unknown_page_id_is_broken() {
    let (output, rewrites, broken) = rewrite_document("[gone](/pages/999)", "100-hello.md", &index());
    assert_eq!(output, "[gone](/pages/999)");
    assert_eq!(rewrites, 0);
    assert_eq!(broken, 1);
  }

  #[test]
  fn test_denied_page_does_not_resolve() {
    // Page 500 is in the manifest but has no file.
    let (_, rewrites, broken) = rewrite_document("[denied](/pages/500)", "100-hello.md", &index());
    assert_eq!(rewrites, 0);
    assert_eq!(broken, 1);
  }

  #[test]
  fn test_exact_id_match_never_prefix_matches() {
    // `/pages/10` must not resolve via page 100.
    let (output, rewrites, broken) = rewrite_document("[x](/pages/10)", "100-hello.md", &index());
    assert_eq!(output, "[x](/pages/10)");
    assert_eq!(rewrites, 0);
    assert_eq!(broken, 1);
  }

  #[test]
  fn test_skips_external_fragment_relative_and_mailto() {
    let content = "[a](https://unrelated.example.com/x) [b](#anchor) [c](already/local.md) [d](mailto:x@y.z)";
    let (output, rewrites, broken) = rewrite_document(content, "100-hello.md", &index());
    assert_eq!(output, content);
    assert_eq!(rewrites, 0);
    assert_eq!(broken, 0);
  }

  #[test]
  fn test_links_inside_code_fences_are_untouched() {
    let content = "```\n[x](/pages/300)\n```\n[y](/pages/300)\n";
    let (output, rewrites, _) = rewrite_document(content, "100-hello.md", &index());
    assert!(output.contains("```\n[x](/pages/300)\n```"));
    assert!(output.contains("[y](other.md)"));
    assert_eq!(rewrites, 1);
  }

  #[test]
  fn test_fragment_is_dropped_from_rewritten_target() {
    let (output, rewrites, _) = rewrite_document("[x](/pages/300/Other#section)", "100-hello.md", &index());
    assert_eq!(output, "[x](other.md)");
    assert_eq!(rewrites, 1);
  }

  #[test]
  fn test_rewrite_links_over_files() {
    let dir = tempdir().unwrap();
    let manifest = manifest();

    std::fs::create_dir_all(dir.path().join("guide")).unwrap();
    std::fs::write(dir.path().join("100-hello.md"), "See [Other](/pages/300/Other).\n").unwrap();
    std::fs::write(dir.path().join("other.md"), "Nothing to do here.\n").unwrap();
    std::fs::write(dir.path().join("guide/deep.md"), "[up](/pages/100) [gone](/pages/999)\n").unwrap();

    let stats = rewrite_links(dir.path(), &manifest, BASE).unwrap();

    assert_eq!(stats.files_scanned, 3);
    assert_eq!(stats.links_rewritten, 2);
    assert_eq!(stats.broken_links, 1);

    let hello = std::fs::read_to_string(dir.path().join("100-hello.md")).unwrap();
    assert_eq!(hello, "See [Other](other.md).\n");

    let deep = std::fs::read_to_string(dir.path().join("guide/deep.md")).unwrap();
    assert_eq!(deep, "[up](../100-hello.md) [gone](/pages/999)\n");
  }
}
