//! Atomic filesystem primitives for the export tree.
//!
//! Every durable artifact (Markdown, manifest, journal, queue snapshot,
//! attachment) goes through [`write_atomic`]: parent directories are created,
//! content lands in a `.tmp` sibling, and a rename publishes it. The rename
//! stays on the same filesystem as the target, so readers never observe a
//! partial file.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Atomically write bytes to a path via temp-file + rename.
///
/// # Arguments
/// * `path` - Final destination of the file.
/// * `content` - Bytes to persist.
///
/// # Errors
/// Returns an error when the parent directory cannot be created or either the
/// write or the rename fails. One retry is attempted after re-ensuring the
/// parent directory exists, since a concurrent cleanup may have removed it.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
  match try_write_atomic(path, content) {
    Ok(()) => Ok(()),
    Err(_) => {
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
          .with_context(|| format!("Failed to create directory {}", parent.display()))?;
      }
      try_write_atomic(path, content)
    }
  }
}

fn try_write_atomic(path: &Path, content: &[u8]) -> Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("Failed to create directory {}", parent.display()))?;
  }

  let tmp_path = tmp_sibling(path);
  std::fs::write(&tmp_path, content).with_context(|| format!("Failed to write {}", tmp_path.display()))?;

  if let Err(err) = std::fs::rename(&tmp_path, path) {
    let _ = std::fs::remove_file(&tmp_path);
    return Err(err).with_context(|| format!("Failed to rename {} into place", tmp_path.display()));
  }

  Ok(())
}

/// Atomically write a UTF-8 string.
pub fn write_atomic_string(path: &Path, content: &str) -> Result<()> {
  write_atomic(path, content.as_bytes())
}

/// The `.tmp` sibling used as the staging name for an atomic write.
fn tmp_sibling(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

/// Render a relative path with forward slashes regardless of host OS.
pub fn to_forward_slashes(path: &Path) -> String {
  let mut parts = Vec::new();
  for component in path.components() {
    match component {
      Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
      Component::ParentDir => parts.push("..".to_string()),
      Component::CurDir => {}
      Component::RootDir | Component::Prefix(_) => {}
    }
  }
  parts.join("/")
}

/// Compute the POSIX-relative path from `from_file`'s directory to `to_file`.
///
/// Both paths must be relative to the same root (the export output
/// directory). The result uses forward slashes and `..` segments as needed.
///
/// # Arguments
/// * `from_file` - Path of the file containing the link.
/// * `to_file` - Path of the link target.
///
/// # Returns
/// A relative path string suitable for use as a Markdown link href.
pub fn relative_path(from_file: &Path, to_file: &Path) -> String {
  let from_dir: Vec<_> = from_file
    .parent()
    .map(|p| p.components().collect())
    .unwrap_or_default();
  let to_parts: Vec<_> = to_file.components().collect();

  let common = from_dir
    .iter()
    .zip(to_parts.iter())
    .take_while(|(a, b)| a == b)
    .count();

  let mut result = PathBuf::new();
  for _ in common..from_dir.len() {
    result.push("..");
  }
  for part in &to_parts[common..] {
    result.push(part);
  }

  let rendered = to_forward_slashes(&result);
  if rendered.is_empty() {
    // Same file; degenerate but keep it resolvable.
    to_file
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default()
  } else {
    rendered
  }
}
