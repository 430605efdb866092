//! Filesystem-safe slugs for page titles.
//!
//! Slugs are derived deterministically from titles: Unicode compatibility
//! decomposition, lowercasing, whitespace to hyphens, a fixed punctuation
//! strip, hyphen-run collapsing, and truncation at a soft word boundary.
//! Collisions within one directory are resolved with `-N` suffixes so that a
//! fixed input order always produces the same paths.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Longest slug emitted before truncation kicks in.
pub const DEFAULT_MAX_LENGTH: usize = 80;

/// Normalize a page title into a slug.
///
/// # Arguments
/// * `title` - Raw Confluence page title.
/// * `max_length` - Soft cap; truncation backs up to the previous hyphen when
///   one exists within the cap.
///
/// # Returns
/// A lowercase hyphen-separated slug. May be empty when the title carries no
/// usable characters; callers are expected to substitute an id-based name.
pub fn slugify(title: &str, max_length: usize) -> String {
  let mut slug = String::with_capacity(title.len());
  let mut last_was_hyphen = true;

  for ch in title.nfkd() {
    if ch.is_whitespace() || ch == '-' || ch == '_' || ch == '/' {
      if !last_was_hyphen {
        slug.push('-');
        last_was_hyphen = true;
      }
      continue;
    }

    if ch.is_alphanumeric() {
      for lower in ch.to_lowercase() {
        slug.push(lower);
      }
      last_was_hyphen = false;
    }
    // Everything else (punctuation, combining marks, symbols) is dropped.
  }

  while slug.ends_with('-') {
    slug.pop();
  }

  truncate_at_word_boundary(&slug, max_length)
}

/// Truncate a slug below `max_length`, preferring the last hyphen so words
/// are not cut mid-way.
fn truncate_at_word_boundary(slug: &str, max_length: usize) -> String {
  if slug.len() <= max_length {
    return slug.to_string();
  }

  let mut cut = max_length;
  while cut > 0 && !slug.is_char_boundary(cut) {
    cut -= 1;
  }

  let head = &slug[..cut];
  let truncated = match head.rfind('-') {
    Some(pos) if pos > 0 => &head[..pos],
    _ => head,
  };

  truncated.trim_end_matches('-').to_string()
}

/// Resolves slug collisions within a single output directory.
///
/// The first occurrence keeps the base slug; later occurrences get `-1`,
/// `-2`, ... appended. Titles that normalize to nothing fall back to
/// `page-<id>`.
#[derive(Debug, Default)]
pub struct SlugAllocator {
  used: HashSet<String>,
}

impl SlugAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark a slug as taken without allocating it (used when resuming over an
  /// existing export tree).
  pub fn reserve(&mut self, slug: &str) {
    self.used.insert(slug.to_string());
  }

  /// Allocate a unique slug for a page within this directory.
  ///
  /// # Arguments
  /// * `title` - Page title to slugify.
  /// * `page_id` - Used only when the title normalizes to an empty slug.
  ///
  /// # Returns
  /// A slug unique among all previous allocations from this allocator.
  pub fn allocate(&mut self, title: &str, page_id: &str) -> String {
    let base = slugify(title, DEFAULT_MAX_LENGTH);
    let base = if base.is_empty() {
      format!("page-{page_id}")
    } else {
      base
    };

    if self.used.insert(base.clone()) {
      return base;
    }

    let mut counter = 1;
    loop {
      let candidate = format!("{base}-{counter}");
      if self.used.insert(candidate.clone()) {
        return candidate;
      }
      counter += 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_slugify_basic() {
    assert_eq!(slugify("Getting Started", 80), "getting-started");
    assert_eq!(slugify("Hello, World!", 80), "hello-world");
  }

  #[test]
  fn test_slugify_collapses_separator_runs() {
    assert_eq!(slugify("a  -  b___c", 80), "a-b-c");
    assert_eq!(slugify("--lead and trail--", 80), "lead-and-trail");
  }

  #[test]
  fn test_slugify_decomposes_unicode() {
    assert_eq!(slugify("Café Menü", 80), "cafe-menu");
  }

  #[test]
  fn test_slugify_drops_punctuation() {
    assert_eq!(slugify("Q4 (Draft): Plan / Review", 80), "q4-draft-plan-review");
  }

  #[test]
  fn test_slugify_empty_title() {
    assert_eq!(slugify("!!!", 80), "");
    assert_eq!(slugify("", 80), "");
  }

  #[test]
  fn test_truncation_prefers_word_boundary() {
    let slug = slugify("alpha beta gamma delta", 12);
    assert_eq!(slug, "alpha-beta");
    assert!(slug.len() <= 12);
  }

  #[test]
  fn test_truncation_without_boundary() {
    let slug = slugify("abcdefghijklmnop", 8);
    assert_eq!(slug, "abcdefgh");
  }

  #[test]
  fn test_allocator_resolves_collisions_in_order() {
    let mut alloc = SlugAllocator::new();
    assert_eq!(alloc.allocate("Getting Started", "A"), "getting-started");
    assert_eq!(alloc.allocate("Getting Started", "B"), "getting-started-1");
    assert_eq!(alloc.allocate("Getting Started", "C"), "getting-started-2");
  }

  #[test]
  fn test_allocator_reserve_blocks_slug() {
    let mut alloc = SlugAllocator::new();
    alloc.reserve("roadmap");
    assert_eq!(alloc.allocate("Roadmap", "X"), "roadmap-1");
  }

  #[test]
  fn test_allocator_empty_title_uses_page_id() {
    let mut alloc = SlugAllocator::new();
    assert_eq!(alloc.allocate("???", "200"), "page-200");
  }

  #[test]
  fn test_allocator_is_deterministic_for_fixed_order() {
    let titles = ["Roadmap", "roadmap", "Road map"];
    let run = |titles: &[&str]| {
      let mut alloc = SlugAllocator::new();
      titles
        .iter()
        .enumerate()
        .map(|(i, t)| alloc.allocate(t, &i.to_string()))
        .collect::<Vec<_>>()
    };
    assert_eq!(run(&titles), run(&titles));
    assert_eq!(run(&titles), vec!["roadmap", "roadmap-1", "road-map"]);
  }
}
