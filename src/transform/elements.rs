//! HTML element to Markdown converters.
//!
//! Walks the parsed storage-format tree and emits Markdown, collecting
//! discovered links, users, and attachments on the shared [`Discovery`]
//! accumulator along the way.

use roxmltree::Node;
use tracing::debug;

use super::entities::decode_html_entities;
use super::macros::convert_macro;
use super::tables::convert_table_to_markdown;
use super::xml::{find_child_by_tag, get_attribute, get_element_text, get_element_text_raw, matches_tag};
use super::{Discovery, TransformContext};

/// Whether a line already starts with a Markdown list marker.
fn looks_like_list_marker(line: &str) -> bool {
  let trimmed = line.trim_start();

  if trimmed.starts_with(['-', '*', '+']) {
    return trimmed.len() > 1 && trimmed.as_bytes()[1] == b' ';
  }

  let mut chars = trimmed.chars();
  let mut saw_digit = false;

  while let Some(ch) = chars.next() {
    if ch.is_ascii_digit() {
      saw_digit = true;
      continue;
    }

    if ch == '.' {
      return saw_digit && matches!(chars.next(), Some(' '));
    }

    break;
  }

  false
}

/// Format a converted list item, preserving nested list structure.
fn format_list_item(item: &str, prefix: &str) -> String {
  let mut formatted = String::new();
  let lines = item.trim_end().lines();
  let indentation = " ".repeat(prefix.chars().count());
  let mut wrote_first_line = false;

  for line in lines {
    if !wrote_first_line {
      if line.trim().is_empty() {
        continue;
      }

      let line_content = line.trim_start();

      if looks_like_list_marker(line_content) {
        formatted.push_str(prefix.trim_end());
        formatted.push('\n');
        formatted.push_str(&indentation);
        formatted.push_str(line_content);
        formatted.push('\n');
      } else {
        formatted.push_str(prefix);
        formatted.push_str(line_content);
        formatted.push('\n');
      }

      wrote_first_line = true;
    } else if line.trim().is_empty() {
      formatted.push('\n');
    } else {
      formatted.push_str(&indentation);
      formatted.push_str(line);
      formatted.push('\n');
    }
  }

  if !wrote_first_line {
    formatted.push_str(prefix.trim_end());
    formatted.push('\n');
  }

  formatted
}

/// Convert an element and its children to Markdown recursively.
///
/// # Arguments
/// * `node` - Root node whose descendants should be rendered.
/// * `cx` - Transform context (base URL, space key).
/// * `out` - Discovery accumulator receiving links, users, and attachments.
pub(super) fn convert_node(node: Node, cx: &TransformContext, out: &mut Discovery) -> String {
  let mut result = String::new();

  for child in node.children() {
    match child.node_type() {
      roxmltree::NodeType::Element => {
        let tag = child.tag_name();
        let local_name = tag.name();

        match local_name {
          // Headings
          "h1" => result.push_str(&format!("\n# {}\n\n", convert_node(child, cx, out).trim())),
          "h2" => result.push_str(&format!("\n## {}\n\n", convert_node(child, cx, out).trim())),
          "h3" => result.push_str(&format!("\n### {}\n\n", convert_node(child, cx, out).trim())),
          "h4" => result.push_str(&format!("\n#### {}\n\n", convert_node(child, cx, out).trim())),
          "h5" => result.push_str(&format!("\n##### {}\n\n", convert_node(child, cx, out).trim())),
          "h6" => result.push_str(&format!("\n###### {}\n\n", convert_node(child, cx, out).trim())),

          // Paragraphs
          "p" => {
            let content = convert_node(child, cx, out);
            let trimmed = content.trim();
            if !trimmed.is_empty() {
              result.push_str(&format!("{trimmed}\n\n"));
            }
          }

          // Text formatting
          "strong" | "b" => result.push_str(&format!("**{}**", convert_node(child, cx, out))),
          "em" | "i" => result.push_str(&format!("_{}_", convert_node(child, cx, out))),
          "u" => result.push_str(&format!("_{}_", convert_node(child, cx, out))),
          "s" | "del" => result.push_str(&format!("~~{}~~", convert_node(child, cx, out))),
          "code" => result.push_str(&format!("`{}`", get_element_text_raw(child))),

          // Lists
          "ul" => {
            result.push('\n');
            for li in child.children().filter(|n| matches_tag(*n, "li")) {
              let item = convert_node(li, cx, out);
              result.push_str(&format_list_item(&item, "- "));
            }
            result.push('\n');
          }
          "ol" => {
            result.push('\n');
            for (index, li) in child.children().filter(|n| matches_tag(*n, "li")).enumerate() {
              let item = convert_node(li, cx, out);
              let prefix = format!("{}. ", index + 1);
              result.push_str(&format_list_item(&item, &prefix));
            }
            result.push('\n');
          }

          // Anchor links; Confluence page URLs are recorded for rewriting.
          "a" => {
            let text = convert_node(child, cx, out);
            let href = get_attribute(child, "href").unwrap_or_default();
            out.record_url_link(&href, text.trim());
            result.push_str(&format!("[{}]({})", text.trim(), href));
          }

          // Blockquotes
          "blockquote" => {
            let content = convert_node(child, cx, out);
            for line in content.trim().lines() {
              if line.trim().is_empty() {
                result.push_str(">\n");
              } else {
                result.push_str(&format!("> {}\n", line.trim()));
              }
            }
            result.push('\n');
          }

          // Line breaks and horizontal rules
          "br" => result.push('\n'),
          "hr" => result.push_str("\n---\n\n"),

          // Code blocks
          "pre" => {
            let code = get_element_text_raw(child);
            result.push_str(&format!("\n```\n{}\n```\n\n", code.trim_matches('\n')));
          }

          // Tables
          "table" => result.push_str(&convert_table_to_markdown(child)),

          // Confluence-specific elements
          "link" if matches_tag(child, "ac:link") => {
            result.push_str(&convert_confluence_link(child, cx, out));
          }
          "structured-macro" if matches_tag(child, "ac:structured-macro") => {
            result.push_str(&convert_macro(child, cx, out));
          }
          "task-list" if matches_tag(child, "ac:task-list") => {
            result.push_str(&convert_task_list(child));
          }
          "image" if matches_tag(child, "ac:image") => {
            result.push_str(&convert_image(child, out));
          }
          "rich-text-body" if matches_tag(child, "ac:rich-text-body") => {
            result.push_str(&convert_node(child, cx, out));
          }

          // Layout containers flatten into their cell contents.
          "layout" | "layout-section" | "layout-cell"
            if matches_tag(child, "ac:layout")
              || matches_tag(child, "ac:layout-section")
              || matches_tag(child, "ac:layout-cell") =>
          {
            result.push_str(&convert_node(child, cx, out));
          }

          // Skip these internal elements
          "parameter" if matches_tag(child, "ac:parameter") => {}
          "placeholder" if matches_tag(child, "ac:placeholder") => {}
          "url" if matches_tag(child, "ri:url") => {}

          // Time elements prefer visible text, fall back to the attribute.
          "time" => {
            let text = get_element_text(child);
            if !text.trim().is_empty() {
              result.push_str(&text);
            } else if let Some(datetime) = get_attribute(child, "datetime") {
              result.push_str(&datetime);
            }
          }

          "span" => result.push_str(&convert_node(child, cx, out)),

          // Unknown elements - extract content
          _ => {
            let debug_name = super::xml::qualified_tag_name(child);
            debug!("unknown tag: {debug_name}");
            result.push_str(&convert_node(child, cx, out));
          }
        }
      }
      roxmltree::NodeType::Text => {
        if let Some(text) = child.text() {
          result.push_str(&decode_html_entities(text));
        }
      }
      _ => {}
    }
  }

  result
}

/// Convert `<ac:link>` elements: page links, user mentions, and attachment
/// links.
fn convert_confluence_link(element: Node, cx: &TransformContext, out: &mut Discovery) -> String {
  // Page reference by title. The href is the canonical Confluence URL; the
  // final rewriting pass replaces it with a relative path once the target's
  // local file is known.
  if let Some(page_node) = find_child_by_tag(element, "ri:page") {
    let title = get_attribute(page_node, "ri:content-title").unwrap_or_default();
    let space_key = get_attribute(page_node, "ri:space-key").unwrap_or_else(|| cx.space_key.clone());

    let link_text = link_body_text(element).unwrap_or_else(|| title.clone());
    let href = format!(
      "{}/wiki/display/{}/{}",
      cx.base_url,
      space_key,
      title.replace(' ', "+")
    );

    out.record_page_link(&title, &space_key, &href);
    return format!("[{}]({href})", link_text.trim());
  }

  // User mention: emit a placeholder token that a later resolution pass can
  // replace with a display name.
  if let Some(user_node) = find_child_by_tag(element, "ri:user") {
    let user_key = get_attribute(user_node, "ri:userkey").or_else(|| get_attribute(user_node, "ri:account-id"));
    let username = get_attribute(user_node, "ri:username");

    let placeholder = match (&user_key, &username) {
      (Some(key), _) => format!("@user:{key}"),
      (None, Some(name)) => format!("@user:{name}"),
      (None, None) => "@user:unknown".to_string(),
    };

    out.record_user(user_key.as_deref(), username.as_deref(), &placeholder);
    return placeholder;
  }

  // Attachment link.
  if let Some(attachment_node) = find_child_by_tag(element, "ri:attachment") {
    let filename = get_attribute(attachment_node, "ri:filename").unwrap_or_default();

    if !filename.is_empty() {
      let link_text = link_body_text(element).unwrap_or_else(|| filename.clone());
      out.record_attachment(&filename);
      return format!("[{}](attachments/{filename})", link_text.trim());
    }
  }

  // Fall back to regular link handling if it has an href.
  let text = get_element_text(element);
  if let Some(href) = get_attribute(element, "href") {
    out.record_url_link(&href, &text);
    return format!("[{text}]({href})");
  }

  text
}

fn link_body_text(element: Node) -> Option<String> {
  find_child_by_tag(element, "ac:plain-text-link-body")
    .or_else(|| find_child_by_tag(element, "ac:link-body"))
    .map(get_element_text)
    .filter(|text| !text.trim().is_empty())
}

/// Convert `<ac:task-list>` into Markdown checkboxes.
fn convert_task_list(element: Node) -> String {
  let mut result = String::new();

  for task in element.children().filter(|child| matches_tag(*child, "ac:task")) {
    let status = find_child_by_tag(task, "ac:task-status")
      .map(get_element_text)
      .unwrap_or_else(|| "incomplete".to_string());

    let body = find_child_by_tag(task, "ac:task-body")
      .map(get_element_text)
      .unwrap_or_default();

    let checkbox = if status.trim() == "complete" { "[x]" } else { "[ ]" };
    result.push_str(&format!("- {} {}\n", checkbox, body.trim()));
  }

  result.push('\n');
  result
}

/// Convert `<ac:image>`; attachment-backed images are recorded and pointed
/// at the co-located attachments directory.
fn convert_image(element: Node, out: &mut Discovery) -> String {
  let alt = get_attribute(element, "ac:alt").unwrap_or_else(|| "image".to_string());

  if let Some(url) = find_child_by_tag(element, "ri:url").and_then(|e| get_attribute(e, "ri:value"))
    && !url.is_empty()
  {
    return format!("\n![{alt}]({url})\n\n");
  }

  if let Some(filename) = find_child_by_tag(element, "ri:attachment").and_then(|e| get_attribute(e, "ri:filename"))
    && !filename.is_empty()
  {
    out.record_attachment(&filename);
    return format!("\n![{alt}](attachments/{filename})\n\n");
  }

  format!("\n![{alt}]()\n\n")
}
