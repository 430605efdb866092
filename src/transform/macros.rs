//! Confluence structured macro conversion and discovery.
//!
//! Supported macros expand according to the handler table below; everything
//! else falls back to its text content and is recorded as a passthrough or
//! removal so the run summary can report what was dropped.

use roxmltree::Node;
use tracing::debug;

use super::xml::{find_child_by_tag, find_child_by_tag_and_attr, get_element_text, get_element_text_raw, matches_tag};
use super::{Discovery, MacroDisposition, TransformContext};

/// Signature shared by all macro handlers.
type MacroHandler = fn(&str, Node, &TransformContext, &mut Discovery) -> Option<String>;

struct Handler {
  names: &'static [&'static str],
  func: MacroHandler,
}

/// The declared macro table: which names are expanded natively.
const HANDLERS: &[Handler] = &[
  Handler {
    names: &["children", "children-display"],
    func: handle_children,
  },
  Handler {
    names: &["content-by-label", "contentbylabel"],
    func: handle_content_by_label,
  },
  Handler {
    names: &["code", "code-block"],
    func: handle_code,
  },
  Handler {
    names: &["note", "info", "warning", "tip"],
    func: handle_admonition,
  },
  Handler {
    names: &["panel"],
    func: handle_panel,
  },
  Handler {
    names: &["toc"],
    func: handle_toc,
  },
  Handler {
    names: &["status"],
    func: handle_status,
  },
  Handler {
    names: &["expand"],
    func: handle_expand,
  },
  Handler {
    names: &["anchor"],
    func: handle_anchor,
  },
];

/// Convert an `<ac:structured-macro>` to Markdown, recording discovery
/// side-effects on `out`.
///
/// Unknown macros keep their text content and are recorded as
/// `passthrough` (content kept) or `removed` (nothing to keep).
pub(super) fn convert_macro(element: Node, cx: &TransformContext, out: &mut Discovery) -> String {
  let macro_name = super::xml::get_attribute(element, "ac:name").unwrap_or_default();

  for handler in HANDLERS {
    if handler.names.iter().any(|name| *name == macro_name)
      && let Some(result) = (handler.func)(&macro_name, element, cx, out)
    {
      return result;
    }
  }

  debug!("unsupported macro: {macro_name}");
  let text = get_element_text(element);
  let disposition = if text.trim().is_empty() {
    MacroDisposition::Removed
  } else {
    MacroDisposition::Passthrough
  };
  out.record_macro(&macro_name, disposition, collect_parameters(element));
  text
}

/// `children` / `children-display`: the child pages are exported as their own
/// files, so the body gets a marker and the orchestrator is told to enqueue
/// the children.
fn handle_children(macro_name: &str, element: Node, _cx: &TransformContext, out: &mut Discovery) -> Option<String> {
  out.record_macro(macro_name, MacroDisposition::Expanded, collect_parameters(element));
  Some("\n_Child pages are exported alongside this page._\n\n".to_string())
}

/// `content-by-label`: recorded with its label/CQL parameters so the
/// orchestrator can run the matching search and enqueue the results.
fn handle_content_by_label(
  macro_name: &str,
  element: Node,
  _cx: &TransformContext,
  out: &mut Discovery,
) -> Option<String> {
  let params = collect_parameters(element);
  let label = params.get("label").cloned().or_else(|| params.get("labels").cloned());
  out.record_macro(macro_name, MacroDisposition::Expanded, params);

  match label {
    Some(label) => Some(format!("\n_Pages labeled `{label}` are exported alongside this page._\n\n")),
    None => Some("\n_Matching pages are exported alongside this page._\n\n".to_string()),
  }
}

/// `code`: fenced block with the language parameter, body kept byte-exact.
fn handle_code(_macro_name: &str, element: Node, _cx: &TransformContext, _out: &mut Discovery) -> Option<String> {
  let language = find_child_by_tag_and_attr(element, "ac:parameter", "ac:name", "language")
    .map(get_element_text)
    .unwrap_or_default();

  let body = find_child_by_tag(element, "ac:plain-text-body")
    .map(get_element_text_raw)
    .or_else(|| find_child_by_tag(element, "ac:rich-text-body").map(get_element_text_raw))
    .unwrap_or_else(|| get_element_text_raw(element));

  let mut result = String::new();
  result.push('\n');
  result.push_str("```");
  let trimmed_language = language.trim();
  if !trimmed_language.is_empty() {
    result.push_str(trimmed_language);
  }
  result.push('\n');

  let trimmed_body = body.trim_matches(|c| matches!(c, '\n' | '\r'));
  result.push_str(trimmed_body);
  if !trimmed_body.ends_with('\n') && !trimmed_body.is_empty() {
    result.push('\n');
  }

  result.push_str("```\n\n");
  Some(result)
}

/// `note` / `info` / `warning` / `tip`: Markdown blockquote with an
/// emphasized heading.
fn handle_admonition(macro_name: &str, element: Node, cx: &TransformContext, out: &mut Discovery) -> Option<String> {
  let title = find_child_by_tag_and_attr(element, "ac:parameter", "ac:name", "title")
    .map(get_element_text)
    .unwrap_or_default();

  let body = find_child_by_tag(element, "ac:rich-text-body")
    .map(|body| super::elements::convert_node(body, cx, out))
    .unwrap_or_else(|| get_element_text(element));

  let default_title = match macro_name {
    "info" => "Info",
    "warning" => "Warning",
    "tip" => "Tip",
    _ => "Note",
  };
  let heading = if title.trim().is_empty() {
    default_title
  } else {
    title.trim()
  };

  Some(render_admonition_block(heading, body.trim()))
}

/// Format a blockquote admonition with a bold heading on the first line.
pub(super) fn render_admonition_block(heading: &str, body: &str) -> String {
  if body.is_empty() {
    return format!("\n> **{heading}:**\n\n");
  }

  let mut result = String::new();
  let mut lines = body.lines();

  if let Some(first_line) = lines.next() {
    result.push_str(&format!("\n> **{heading}:** {}", first_line.trim()));
  }

  for line in lines {
    if line.trim().is_empty() {
      result.push_str("\n>");
    } else {
      result.push_str(&format!("\n> {}", line.trim()));
    }
  }

  result.push_str("\n\n");
  result
}

fn handle_panel(_macro_name: &str, element: Node, cx: &TransformContext, out: &mut Discovery) -> Option<String> {
  let body = find_child_by_tag(element, "ac:rich-text-body")
    .map(|body| super::elements::convert_node(body, cx, out))
    .unwrap_or_else(|| get_element_text(element));
  Some(format!("\n> {}\n\n", body.trim()))
}

fn handle_toc(_macro_name: &str, _element: Node, _cx: &TransformContext, _out: &mut Discovery) -> Option<String> {
  Some("\n**Table of Contents**\n\n".to_string())
}

fn handle_status(_macro_name: &str, element: Node, _cx: &TransformContext, _out: &mut Discovery) -> Option<String> {
  let title = find_child_by_tag_and_attr(element, "ac:parameter", "ac:name", "title")
    .map(get_element_text)
    .unwrap_or_default();
  Some(format!("`[{}]`", title.trim()))
}

/// `expand`: collapsible section rendered as an HTML `<details>` block.
fn handle_expand(_macro_name: &str, element: Node, cx: &TransformContext, out: &mut Discovery) -> Option<String> {
  let title = find_child_by_tag_and_attr(element, "ac:parameter", "ac:name", "title")
    .map(get_element_text)
    .unwrap_or_else(|| "Details".to_string());

  let body = find_child_by_tag(element, "ac:rich-text-body")
    .map(|body| super::elements::convert_node(body, cx, out))
    .unwrap_or_else(|| get_element_text(element));

  Some(format!(
    "\n<details>\n<summary>{}</summary>\n\n{}\n</details>\n\n",
    title.trim(),
    body.trim()
  ))
}

/// `anchor`: kept as an HTML anchor tag so intra-page fragments survive.
fn handle_anchor(_macro_name: &str, element: Node, _cx: &TransformContext, _out: &mut Discovery) -> Option<String> {
  let anchor_id = find_child_by_tag_and_attr(element, "ac:parameter", "ac:name", "anchor")
    .map(get_element_text)
    .map(|value| value.trim().to_string())
    .unwrap_or_default();

  Some(if anchor_id.is_empty() {
    String::new()
  } else {
    format!("<a id=\"{anchor_id}\"></a>")
  })
}

/// Collect `<ac:parameter ac:name="...">value</ac:parameter>` children.
fn collect_parameters(element: Node) -> std::collections::BTreeMap<String, String> {
  element
    .children()
    .filter(|child| matches_tag(*child, "ac:parameter"))
    .filter_map(|param| {
      let name = super::xml::get_attribute(param, "ac:name")?;
      Some((name, get_element_text(param)))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use roxmltree::Document;

  use super::*;
  use crate::transform::xml::wrap_with_namespaces;

  fn convert(input: &str) -> (String, Discovery) {
    let cx = TransformContext::new("https://example.atlassian.net", "TEST");
    let mut out = Discovery::default();
    let wrapped = wrap_with_namespaces(input);
    let document = Document::parse(&wrapped).unwrap();
    let node = document
      .descendants()
      .find(|n| matches_tag(*n, "ac:structured-macro"))
      .unwrap();
    let markdown = convert_macro(node, &cx, &mut out);
    (markdown, out)
  }

  #[test]
  fn test_note_macro() {
    let (output, _) = convert(
      r#"
      <ac:structured-macro ac:name="note">
        <ac:rich-text-body><p>This is a note block.</p></ac:rich-text-body>
      </ac:structured-macro>
    "#,
    );
    assert!(output.contains("> **Note:** This is a note block."));
  }

  #[test]
  fn test_admonition_custom_title() {
    let (output, _) = convert(
      r#"
      <ac:structured-macro ac:name="warning">
        <ac:parameter ac:name="title">Watch out</ac:parameter>
        <ac:rich-text-body><p>Danger ahead.</p></ac:rich-text-body>
      </ac:structured-macro>
    "#,
    );
    assert!(output.contains("> **Watch out:** Danger ahead."));
  }

  #[test]
  fn test_code_macro_with_language() {
    let (output, _) = convert(
      r#"
      <ac:structured-macro ac:name="code">
        <ac:parameter ac:name="language">python</ac:parameter>
        <ac:plain-text-body><![CDATA[import requests
print("hi")]]></ac:plain-text-body>
      </ac:structured-macro>
    "#,
    );
    assert!(output.contains("```python\n"));
    assert!(output.contains("import requests\nprint(\"hi\")\n"));
  }

  #[test]
  fn test_code_macro_body_is_byte_exact() {
    let (output, _) = convert(
      r#"<ac:structured-macro ac:name="code"><ac:plain-text-body>a &amp;nbsp; b</ac:plain-text-body></ac:structured-macro>"#,
    );
    // The HTML entity spelled out in the code body must not be decoded.
    assert!(output.contains("a &nbsp; b"));
  }

  #[test]
  fn test_children_macro_records_expansion() {
    let (output, out) = convert(r#"<ac:structured-macro ac:name="children"/>"#);
    assert!(output.contains("exported alongside"));
    assert_eq!(out.macro_expansions.len(), 1);
    assert_eq!(out.macro_expansions[0].name, "children");
    assert_eq!(out.macro_expansions[0].disposition, MacroDisposition::Expanded);
  }

  #[test]
  fn test_content_by_label_records_parameters() {
    let (output, out) = convert(
      r#"
      <ac:structured-macro ac:name="content-by-label">
        <ac:parameter ac:name="label">howto</ac:parameter>
      </ac:structured-macro>
    "#,
    );
    assert!(output.contains("`howto`"));
    assert_eq!(out.macro_expansions[0].params.get("label").unwrap(), "howto");
  }

  #[test]
  fn test_toc_macro() {
    let (output, _) = convert(r#"<ac:structured-macro ac:name="toc"/>"#);
    assert!(output.contains("**Table of Contents**"));
  }

  #[test]
  fn test_status_macro() {
    let (output, _) = convert(
      r#"
      <ac:structured-macro ac:name="status">
        <ac:parameter ac:name="title">In Progress</ac:parameter>
      </ac:structured-macro>
    "#,
    );
    assert_eq!(output, "`[In Progress]`");
  }

  #[test]
  fn test_expand_macro_renders_details_block() {
    let (output, _) = convert(
      r#"
      <ac:structured-macro ac:name="expand">
        <ac:parameter ac:name="title">More info</ac:parameter>
        <ac:rich-text-body><p>Hidden content.</p></ac:rich-text-body>
      </ac:structured-macro>
    "#,
    );
    assert!(output.contains("<summary>More info</summary>"));
    assert!(output.contains("Hidden content."));
  }

  #[test]
  fn test_anchor_macro() {
    let (output, _) = convert(
      r#"
      <ac:structured-macro ac:name="anchor">
        <ac:parameter ac:name="anchor">section-2</ac:parameter>
      </ac:structured-macro>
    "#,
    );
    assert_eq!(output, r#"<a id="section-2"></a>"#);

    let (empty, _) = convert(r#"<ac:structured-macro ac:name="anchor"/>"#);
    assert!(empty.is_empty());
  }

  #[test]
  fn test_unknown_macro_with_content_is_passthrough() {
    let (output, out) = convert(
      r#"<ac:structured-macro ac:name="mystery"><ac:rich-text-body>kept text</ac:rich-text-body></ac:structured-macro>"#,
    );
    assert!(output.contains("kept text"));
    assert_eq!(out.macro_expansions[0].disposition, MacroDisposition::Passthrough);
  }

  #[test]
  fn test_unknown_empty_macro_is_removed() {
    let (output, out) = convert(r#"<ac:structured-macro ac:name="mystery"/>"#);
    assert!(output.trim().is_empty());
    assert_eq!(out.macro_expansions[0].disposition, MacroDisposition::Removed);
  }
}
