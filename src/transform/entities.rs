//! HTML entity handling.
//!
//! `roxmltree` only recognizes XML's five predefined entities, so common HTML
//! entities are rewritten to literal characters before parsing, and decoded
//! again in text nodes on the way out. Code regions bypass the decode path so
//! their bytes survive untouched.

/// Replace common HTML entities with literal characters before XML parsing.
pub fn preprocess_html_entities(text: &str) -> String {
  text
    .replace("&nbsp;", "\u{00A0}")
    .replace("&ndash;", "\u{2013}")
    .replace("&mdash;", "\u{2014}")
    .replace("&ldquo;", "\u{201C}")
    .replace("&rdquo;", "\u{201D}")
    .replace("&lsquo;", "\u{2018}")
    .replace("&rsquo;", "\u{2019}")
    .replace("&hellip;", "\u{2026}")
    .replace("&bull;", "\u{2022}")
    .replace("&middot;", "\u{00B7}")
    .replace("&deg;", "\u{00B0}")
    .replace("&copy;", "\u{00A9}")
    .replace("&reg;", "\u{00AE}")
    .replace("&trade;", "\u{2122}")
    .replace("&times;", "\u{00D7}")
    .replace("&plusmn;", "\u{00B1}")
    .replace("&larr;", "\u{2190}")
    .replace("&rarr;", "\u{2192}")
}

/// Decode HTML entities remaining in a text node.
///
/// Handles the named entities Confluence commonly emits plus numeric decimal
/// and hexadecimal references.
pub fn decode_html_entities(text: &str) -> String {
  let replaced = text
    .replace("&nbsp;", " ")
    .replace("&rsquo;", "'")
    .replace("&lsquo;", "'")
    .replace("&rdquo;", "\"")
    .replace("&ldquo;", "\"")
    .replace("&mdash;", "\u{2014}")
    .replace("&ndash;", "\u{2013}")
    .replace("&amp;", "&")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&#39;", "'");

  decode_numeric_entities(&replaced)
}

fn decode_numeric_entities(text: &str) -> String {
  let mut result = String::with_capacity(text.len());
  let mut index = 0;
  let bytes = text.as_bytes();

  while index < text.len() {
    if bytes[index] == b'&'
      && let Some(semi_offset) = text[index..].find(';')
    {
      let end = index + semi_offset;
      if let Some(decoded) = decode_numeric_entity(&text[index + 1..end]) {
        result.push(decoded);
        index = end + 1;
        continue;
      }
    }

    let ch = text[index..].chars().next().expect("index is on a char boundary");
    result.push(ch);
    index += ch.len_utf8();
  }

  result
}

/// Decode one numeric entity body (`#128075` or `#x1F44B`).
fn decode_numeric_entity(entity: &str) -> Option<char> {
  let body = entity.strip_prefix('#')?;

  let (radix, digits) = if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
    (16, hex)
  } else {
    (10, body)
  };

  if digits.is_empty() {
    return None;
  }

  let valid = digits.chars().all(|c| {
    if radix == 16 {
      c.is_ascii_hexdigit()
    } else {
      c.is_ascii_digit()
    }
  });
  if !valid {
    return None;
  }

  let value = u32::from_str_radix(digits, radix).ok()?;
  char::from_u32(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_named_entities() {
    let input = "There&rsquo;s this &amp; that &lt;tag&gt; &quot;quoted&quot;";
    assert_eq!(decode_html_entities(input), "There's this & that <tag> \"quoted\"");
  }

  #[test]
  fn test_decode_numeric_entities() {
    assert_eq!(decode_html_entities("&#x1F642; &#128075;"), "\u{1F642} \u{1F44B}");
  }

  #[test]
  fn test_invalid_numeric_entities_pass_through() {
    assert_eq!(decode_html_entities("&#xZZ; &#; AT&T;"), "&#xZZ; &#; AT&T;");
  }

  #[test]
  fn test_preprocess_replaces_nbsp() {
    assert_eq!(preprocess_html_entities("a&nbsp;b"), "a\u{00A0}b");
  }

  #[test]
  fn test_preprocess_leaves_xml_entities_alone() {
    // The five XML entities must survive for the parser to handle.
    let input = "&amp; &lt; &gt; &quot; &apos;";
    assert_eq!(preprocess_html_entities(input), input);
  }
}
