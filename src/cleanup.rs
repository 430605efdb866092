//! Cosmetic Markdown cleanup pipeline.
//!
//! Cleanup rules are pure functions over text, ordered by declared priority.
//! Before any rule runs, fenced code regions are extracted into placeholder
//! sentinels and restored afterwards, so rules can normalize whitespace and
//! headings without ever touching code bytes.

use std::collections::BTreeMap;

/// Context handed to every rule.
#[derive(Debug, Clone, Default)]
pub struct CleanupContext {
  /// Space being exported, for rules that care.
  pub space_key: String,
  /// Relative path of the file being cleaned.
  pub path: String,
}

/// Outcome of one rule over one document.
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
  pub content: String,
  pub changed: bool,
  /// Rule-specific counters (e.g. lines touched).
  pub metrics: BTreeMap<String, u64>,
  /// Non-fatal observations worth surfacing.
  pub issues: Vec<String>,
}

/// A cleanup rule: a named, versioned, prioritized pure function.
pub struct CleanupRule {
  pub name: &'static str,
  pub version: u32,
  /// Lower runs first.
  pub priority: i32,
  pub process: fn(&str, &CleanupContext) -> CleanupResult,
}

/// The cleanup engine: sorts rules by priority once, shields code fences,
/// and runs each rule over the remaining text.
pub struct CleanupPipeline {
  rules: Vec<CleanupRule>,
}

impl CleanupPipeline {
  /// Build a pipeline; rules are sorted by `(priority, name)` on entry.
  pub fn new(mut rules: Vec<CleanupRule>) -> Self {
    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(b.name)));
    Self { rules }
  }

  /// The default cosmetic rule set.
  pub fn standard() -> Self {
    Self::new(vec![
      CleanupRule {
        name: "trailing-whitespace",
        version: 1,
        priority: 10,
        process: strip_trailing_whitespace,
      },
      CleanupRule {
        name: "blank-line-collapse",
        version: 1,
        priority: 20,
        process: collapse_blank_lines,
      },
      CleanupRule {
        name: "heading-spacing",
        version: 1,
        priority: 30,
        process: ensure_heading_spacing,
      },
    ])
  }

  /// Run every rule over `content` in priority order.
  ///
  /// # Returns
  /// The cleaned content and the per-rule results, in execution order.
  pub fn run(&self, content: &str, context: &CleanupContext) -> (String, Vec<(String, CleanupResult)>) {
    let (mut text, fences) = extract_code_fences(content);
    let mut reports = Vec::with_capacity(self.rules.len());

    for rule in &self.rules {
      let result = (rule.process)(&text, context);
      text = result.content.clone();
      reports.push((rule.name.to_string(), result));
    }

    (restore_code_fences(&text, &fences), reports)
  }
}

/// Placeholder prefix for extracted fence regions. The NUL byte keeps it
/// from colliding with real document text.
const FENCE_SENTINEL_PREFIX: &str = "\u{0}fence:";

/// Replace fenced code regions with sentinels, returning the shielded text
/// and the extracted regions in order.
pub fn extract_code_fences(content: &str) -> (String, Vec<String>) {
  let mut result = String::with_capacity(content.len());
  let mut fences = Vec::new();
  let mut current_fence: Option<String> = None;

  for line in content.split_inclusive('\n') {
    let stripped = line.trim_end();
    let is_fence_delimiter = stripped.trim_start().starts_with("```");

    if let Some(fence) = current_fence.as_mut() {
      fence.push_str(line);
      if is_fence_delimiter {
        result.push_str(&format!("{FENCE_SENTINEL_PREFIX}{}\u{0}\n", fences.len()));
        fences.push(current_fence.take().expect("fence in progress"));
      }
    } else if is_fence_delimiter {
      current_fence = Some(line.to_string());
    } else {
      result.push_str(line);
    }
  }

  // An unterminated fence is kept as-is rather than silently dropped.
  if let Some(fence) = current_fence {
    result.push_str(&fence);
  }

  (result, fences)
}

/// Re-inline extracted fence regions.
pub fn restore_code_fences(content: &str, fences: &[String]) -> String {
  let mut result = String::with_capacity(content.len());

  for line in content.split_inclusive('\n') {
    let stripped = line.strip_suffix('\n').unwrap_or(line);
    if let Some(index) = stripped
      .strip_prefix(FENCE_SENTINEL_PREFIX)
      .and_then(|rest| rest.strip_suffix('\u{0}'))
      .and_then(|index| index.parse::<usize>().ok())
      && let Some(fence) = fences.get(index)
    {
      result.push_str(fence);
    } else {
      result.push_str(line);
    }
  }

  result
}

/// Collapse runs of blank lines, trim the ends, ensure a trailing newline.
/// Fence-aware convenience used by the transformer.
pub fn normalize_whitespace(content: &str) -> String {
  let (shielded, fences) = extract_code_fences(content);

  let mut result = shielded;
  while result.contains("\n\n\n") {
    result = result.replace("\n\n\n", "\n\n");
  }
  result = result.trim().to_string();
  if !result.ends_with('\n') {
    result.push('\n');
  }

  restore_code_fences(&result, &fences)
}

fn strip_trailing_whitespace(content: &str, _context: &CleanupContext) -> CleanupResult {
  let mut touched = 0u64;
  let cleaned: String = content
    .split_inclusive('\n')
    .map(|line| {
      let (body, newline) = match line.strip_suffix('\n') {
        Some(body) => (body, "\n"),
        None => (line, ""),
      };
      let trimmed = body.trim_end();
      if trimmed.len() != body.len() {
        touched += 1;
      }
      format!("{trimmed}{newline}")
    })
    .collect();

  let mut metrics = BTreeMap::new();
  metrics.insert("lines_trimmed".to_string(), touched);
  CleanupResult {
    changed: cleaned != content,
    content: cleaned,
    metrics,
    issues: Vec::new(),
  }
}

fn collapse_blank_lines(content: &str, _context: &CleanupContext) -> CleanupResult {
  let mut cleaned = content.to_string();
  while cleaned.contains("\n\n\n") {
    cleaned = cleaned.replace("\n\n\n", "\n\n");
  }

  CleanupResult {
    changed: cleaned != content,
    content: cleaned,
    metrics: BTreeMap::new(),
    issues: Vec::new(),
  }
}

/// Ensure headings are preceded and followed by a blank line.
fn ensure_heading_spacing(content: &str, _context: &CleanupContext) -> CleanupResult {
  let lines: Vec<&str> = content.lines().collect();
  let mut out: Vec<String> = Vec::with_capacity(lines.len());

  for (index, line) in lines.iter().enumerate() {
    let is_heading = line.starts_with('#');

    if is_heading && index > 0 && !lines[index - 1].trim().is_empty() && !out.last().is_none_or(|l| l.is_empty()) {
      out.push(String::new());
    }

    out.push((*line).to_string());

    if is_heading && index + 1 < lines.len() && !lines[index + 1].trim().is_empty() {
      out.push(String::new());
    }
  }

  let mut cleaned = out.join("\n");
  if content.ends_with('\n') && !cleaned.ends_with('\n') {
    cleaned.push('\n');
  }

  CleanupResult {
    changed: cleaned != content,
    content: cleaned,
    metrics: BTreeMap::new(),
    issues: Vec::new(),
  }
}
