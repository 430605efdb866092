//! Versioned manifest of exported pages.
//!
//! The manifest is the authoritative end-of-run listing keyed by page id. It
//! drives the final link-rewriting pass and lets two runs be diffed into
//! added / modified / deleted / unchanged sets.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsutil;

/// Current on-disk manifest format version.
pub const MANIFEST_VERSION: u32 = 2;

/// Filename of the manifest inside the output directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Disposition of a page in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  /// Markdown was written this run.
  Exported,
  /// Content hash matched the previous run; file left untouched.
  Unchanged,
  /// Access denied (401/403/restricted space); no file exists.
  Denied,
  /// Page was deleted, archived, or missing; no file exists.
  Removed,
  /// Deliberately not exported (e.g. over a configured limit).
  Skipped,
}

impl EntryStatus {
  /// Whether this status corresponds to an on-disk Markdown file.
  pub fn has_file(self) -> bool {
    matches!(self, EntryStatus::Exported | EntryStatus::Unchanged)
  }
}

/// One page in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  /// Confluence page id.
  pub id: String,
  /// Page title at export time.
  pub title: String,
  /// Relative forward-slash path of the emitted Markdown, or empty for
  /// entries without a file.
  pub path: String,
  /// Content hash of the emitted Markdown, or empty for entries without a
  /// file.
  pub hash: String,
  /// Disposition of the page.
  pub status: EntryStatus,
  /// Confluence version number when known.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<u32>,
  /// Parent page id when the page is not a space root.
  #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
}

impl ManifestEntry {
  /// An entry for a page that was exported to `path` with content `hash`.
  pub fn exported(
    id: impl Into<String>,
    title: impl Into<String>,
    path: impl Into<String>,
    hash: impl Into<String>,
  ) -> Self {
    Self {
      id: id.into(),
      title: title.into(),
      path: path.into(),
      hash: hash.into(),
      status: EntryStatus::Exported,
      version: None,
      parent_id: None,
    }
  }

  /// An entry for a page that produced no file.
  ///
  /// # Arguments
  /// * `status` - Must be one of the file-less statuses.
  pub fn without_file(id: impl Into<String>, title: impl Into<String>, status: EntryStatus) -> Self {
    debug_assert!(!status.has_file());
    Self {
      id: id.into(),
      title: title.into(),
      path: String::new(),
      hash: String::new(),
      status,
      version: None,
      parent_id: None,
    }
  }

  /// Structural invariant check for a single entry.
  pub fn is_valid(&self) -> bool {
    if self.id.is_empty() {
      return false;
    }
    if self.status.has_file() {
      !self.path.is_empty() && !self.hash.is_empty()
    } else {
      self.path.is_empty() && self.hash.is_empty()
    }
  }
}

/// The manifest for one export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
  /// Format version of this file.
  pub version: u32,
  /// When the manifest was written.
  pub timestamp: DateTime<Utc>,
  /// Space the export covered.
  #[serde(rename = "spaceKey")]
  pub space_key: String,
  /// Entries keyed by page id, serialized in id order.
  pub entries: Vec<ManifestEntry>,
}

impl Manifest {
  /// Create an empty manifest for a space.
  pub fn new(space_key: impl Into<String>) -> Self {
    Self {
      version: MANIFEST_VERSION,
      timestamp: Utc::now(),
      space_key: space_key.into(),
      entries: Vec::new(),
    }
  }

  /// Insert or replace the entry for `entry.id`.
  pub fn upsert(&mut self, entry: ManifestEntry) {
    match self.entries.iter_mut().find(|e| e.id == entry.id) {
      Some(existing) => *existing = entry,
      None => self.entries.push(entry),
    }
  }

  pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
    self.entries.iter().find(|e| e.id == id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Validate structural invariants: unique ids and per-entry consistency.
  pub fn validate(&self) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for entry in &self.entries {
      if !entry.is_valid() {
        anyhow::bail!("Manifest entry {} violates path/hash invariants", entry.id);
      }
      if !seen.insert(entry.id.as_str()) {
        anyhow::bail!("Manifest contains duplicate entry for page {}", entry.id);
      }
    }
    Ok(())
  }

  /// Write the manifest as canonical pretty JSON via an atomic rename.
  ///
  /// Entries are sorted by id first so the output is stable across runs.
  pub fn save(&mut self, output_dir: &Path) -> Result<()> {
    self.entries.sort_by(|a, b| a.id.cmp(&b.id));
    self.timestamp = Utc::now();
    let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
    fsutil::write_atomic_string(&output_dir.join(MANIFEST_FILENAME), &json)
  }

  /// Load a manifest from the output directory, if one exists.
  pub fn load(output_dir: &Path) -> Result<Option<Self>> {
    let path = output_dir.join(MANIFEST_FILENAME);
    if !path.exists() {
      return Ok(None);
    }
    let content =
      std::fs::read_to_string(&path).with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest: Manifest =
      serde_json::from_str(&content).with_context(|| format!("Failed to parse manifest {}", path.display()))?;
    Ok(Some(manifest))
  }
}

/// Result of diffing two manifests, keyed by page id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
  /// Ids present only in the new manifest.
  pub added: Vec<String>,
  /// Ids present in both but with any field changed.
  pub modified: Vec<String>,
  /// Ids present only in the old manifest.
  pub deleted: Vec<String>,
  /// Ids present in both with identical entries.
  pub unchanged: Vec<String>,
}

/// Diff two manifests into four disjoint id sets.
///
/// # Arguments
/// * `old` - Manifest from the previous run.
/// * `new` - Manifest from the current run.
pub fn diff(old: &Manifest, new: &Manifest) -> ManifestDiff {
  let old_map: BTreeMap<&str, &ManifestEntry> = old.entries.iter().map(|e| (e.id.as_str(), e)).collect();
  let new_map: BTreeMap<&str, &ManifestEntry> = new.entries.iter().map(|e| (e.id.as_str(), e)).collect();

  let mut result = ManifestDiff::default();

  for (id, new_entry) in &new_map {
    match old_map.get(id) {
      None => result.added.push((*id).to_string()),
      Some(old_entry) if old_entry == new_entry => result.unchanged.push((*id).to_string()),
      Some(_) => result.modified.push((*id).to_string()),
    }
  }

  for id in old_map.keys() {
    if !new_map.contains_key(id) {
      result.deleted.push((*id).to_string());
    }
  }

  result
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  fn entry(id: &str, hash: &str) -> ManifestEntry {
    ManifestEntry::exported(id, format!("Page {id}"), format!("{id}.md"), hash)
  }

  #[test]
  fn test_entry_invariants() {
    assert!(entry("1", "abc").is_valid());
    assert!(ManifestEntry::without_file("2", "Denied", EntryStatus::Denied).is_valid());

    let mut bad = entry("3", "abc");
    bad.status = EntryStatus::Denied;
    assert!(!bad.is_valid());

    let mut empty_hash = entry("4", "");
    empty_hash.hash = String::new();
    assert!(!empty_hash.is_valid());
  }

  #[test]
  fn test_upsert_replaces_by_id() {
    let mut manifest = Manifest::new("TEST");
    manifest.upsert(entry("1", "aaa"));
    manifest.upsert(entry("1", "bbb"));

    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.get("1").unwrap().hash, "bbb");
  }

  #[test]
  fn test_validate_rejects_duplicates() {
    let mut manifest = Manifest::new("TEST");
    manifest.entries.push(entry("1", "aaa"));
    manifest.entries.push(entry("1", "bbb"));
    assert!(manifest.validate().is_err());
  }

  #[test]
  fn test_diff_identity() {
    let mut manifest = Manifest::new("TEST");
    manifest.upsert(entry("1", "a"));
    manifest.upsert(entry("2", "b"));

    let result = diff(&manifest, &manifest);
    assert!(result.added.is_empty());
    assert!(result.modified.is_empty());
    assert!(result.deleted.is_empty());
    assert_eq!(result.unchanged, vec!["1", "2"]);
  }

  #[test]
  fn test_diff_partitions_both_sides() {
    let mut old = Manifest::new("TEST");
    old.upsert(entry("1", "a"));
    old.upsert(entry("2", "b"));
    old.upsert(entry("3", "c"));

    let mut new = Manifest::new("TEST");
    new.upsert(entry("1", "a"));
    new.upsert(entry("2", "b-changed"));
    new.upsert(entry("4", "d"));

    let result = diff(&old, &new);
    assert_eq!(result.added, vec!["4"]);
    assert_eq!(result.modified, vec!["2"]);
    assert_eq!(result.deleted, vec!["3"]);
    assert_eq!(result.unchanged, vec!["1"]);

    // added ∪ unchanged ∪ modified covers the new manifest exactly.
    let mut new_side: Vec<_> = result
      .added
      .iter()
      .chain(&result.unchanged)
      .chain(&result.modified)
      .cloned()
      .collect();
    new_side.sort();
    assert_eq!(new_side, vec!["1", "2", "4"]);

    // deleted ∪ unchanged ∪ modified covers the old manifest exactly.
    let mut old_side: Vec<_> = result
      .deleted
      .iter()
      .chain(&result.unchanged)
      .chain(&result.modified)
      .cloned()
      .collect();
    old_side.sort();
    assert_eq!(old_side, vec!["1", "2", "3"]);
  }

  #[test]
  fn test_save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let mut manifest = Manifest::new("TEST");
    manifest.upsert(entry("2", "b"));
    manifest.upsert(entry("1", "a"));
    manifest.save(dir.path()).unwrap();

    let loaded = Manifest::load(dir.path()).unwrap().unwrap();
    assert_eq!(loaded.space_key, "TEST");
    assert_eq!(loaded.len(), 2);
    // Sorted by id on save.
    assert_eq!(loaded.entries[0].id, "1");
    assert_eq!(loaded.entries[1].id, "2");
  }

  #[test]
  fn test_load_missing_returns_none() {
    let dir = tempdir().unwrap();
    assert!(Manifest::load(dir.path()).unwrap().is_none());
  }
}
