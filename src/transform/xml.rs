//! XML helpers for Confluence storage format.
//!
//! Storage format references `ac:` and `ri:` namespace prefixes without
//! declaring them, so the parser input is wrapped in a synthetic root that
//! declares every prefix found in the markup.

use std::collections::BTreeSet;

use roxmltree::Node;

/// Synthetic namespace base URL for Confluence namespaces.
pub const SYNTHETIC_NS_BASE: &str = "https://confluence.invalid/";

/// Wrap storage format markup with synthetic namespace declarations.
///
/// # Arguments
/// * `storage_content` - Raw storage format XML/HTML snippet from Confluence.
///
/// # Returns
/// The original content nested inside a synthetic root element that declares
/// every namespace prefix used by elements or attributes.
pub fn wrap_with_namespaces(storage_content: &str) -> String {
  let mut prefixes = BTreeSet::new();

  for segment in storage_content.split('<').skip(1) {
    let mut segment = segment;
    if let Some(idx) = segment.find('>') {
      segment = &segment[..idx];
    }

    let segment = segment.trim_start_matches('/');

    if let Some((prefix, _)) = segment.split_once(':')
      && is_valid_prefix(prefix)
    {
      prefixes.insert(prefix.to_string());
    }

    for attr in segment.split_whitespace() {
      if let Some((name, _)) = attr.split_once('=')
        && let Some((prefix, _)) = name.split_once(':')
        && is_valid_prefix(prefix)
      {
        prefixes.insert(prefix.to_string());
      }
    }
  }

  let mut result = String::from("<cx-root");
  for prefix in prefixes {
    result.push_str(" xmlns:");
    result.push_str(&prefix);
    result.push_str("=\"");
    result.push_str(SYNTHETIC_NS_BASE);
    result.push_str(&prefix);
    result.push('"');
  }
  result.push('>');
  result.push_str(storage_content);
  result.push_str("</cx-root>");
  result
}

fn is_valid_prefix(prefix: &str) -> bool {
  !prefix.is_empty()
    && prefix
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn split_qualified_name(name: &str) -> (Option<&str>, &str) {
  if let Some((prefix, local)) = name.split_once(':') {
    (Some(prefix), local)
  } else {
    (None, name)
  }
}

/// The fully qualified tag name of a node, including a namespace prefix when
/// one was synthesized.
pub fn qualified_tag_name(node: Node) -> String {
  let tag = node.tag_name();
  let name = tag.name();
  match tag.namespace().and_then(|ns| ns.strip_prefix(SYNTHETIC_NS_BASE)) {
    Some(prefix) => format!("{prefix}:{name}"),
    None => name.to_string(),
  }
}

/// Whether a node matches an expected tag name with optional namespace
/// prefix (e.g. `ac:structured-macro`).
pub fn matches_tag(node: Node, name: &str) -> bool {
  if !node.is_element() {
    return false;
  }

  let (expected_prefix, expected_name) = split_qualified_name(name);
  let tag = node.tag_name();
  if tag.name() != expected_name {
    return false;
  }

  let expected_namespace = expected_prefix.map(|prefix| format!("{SYNTHETIC_NS_BASE}{prefix}"));

  match (expected_namespace.as_deref(), tag.namespace()) {
    (Some(expected), Some(actual)) => actual == expected,
    (None, None) => true,
    (Some(_), None) | (None, Some(_)) => false,
  }
}

/// Retrieve an attribute value, handling namespaced attribute names.
pub fn get_attribute(node: Node, attr_name: &str) -> Option<String> {
  if !node.is_element() {
    return None;
  }

  let (expected_prefix, expected_name) = split_qualified_name(attr_name);
  let expected_namespace = expected_prefix.map(|prefix| format!("{SYNTHETIC_NS_BASE}{prefix}"));

  for attr in node.attributes() {
    if attr.name() != expected_name {
      continue;
    }

    let namespace_matches = match (expected_namespace.as_deref(), attr.namespace()) {
      (Some(expected), Some(actual)) => actual == expected,
      (None, None) => true,
      (Some(_), None) | (None, Some(_)) => false,
    };

    if namespace_matches {
      return Some(attr.value().to_string());
    }
  }
  None
}

/// First child element matching a (possibly namespaced) tag name.
pub fn find_child_by_tag<'a, 'input>(node: Node<'a, 'input>, tag_name: &str) -> Option<Node<'a, 'input>> {
  node.children().find(|child| matches_tag(*child, tag_name))
}

/// First child element matching a tag name and an attribute value, e.g. an
/// `<ac:parameter ac:name="language">` child.
pub fn find_child_by_tag_and_attr<'a, 'input>(
  node: Node<'a, 'input>,
  tag_name: &str,
  attr_name: &str,
  attr_value: &str,
) -> Option<Node<'a, 'input>> {
  node
    .children()
    .find(|child| matches_tag(*child, tag_name) && get_attribute(*child, attr_name).as_deref() == Some(attr_value))
}

/// Collect all text content from an element and its descendants, decoding
/// HTML entities.
pub fn get_element_text(node: Node) -> String {
  let mut text = String::new();
  collect_text(node, &mut text, true);
  text
}

/// Collect text byte-exact: no HTML entity decoding. Used for code bodies.
pub fn get_element_text_raw(node: Node) -> String {
  let mut text = String::new();
  collect_text(node, &mut text, false);
  text
}

fn collect_text(node: Node, into: &mut String, decode: bool) {
  for child in node.children() {
    match child.node_type() {
      roxmltree::NodeType::Text => {
        if let Some(value) = child.text() {
          if decode {
            into.push_str(&super::entities::decode_html_entities(value));
          } else {
            into.push_str(value);
          }
        }
      }
      roxmltree::NodeType::Element => collect_text(child, into, decode),
      _ => {}
    }
  }
}
