//! HTML table to Markdown pipe-table conversion.

use roxmltree::Node;
use unicode_width::UnicodeWidthStr;

use super::xml::{get_element_text, matches_tag};

/// Convert a `<table>` element into a Markdown pipe table.
///
/// Rows inside `thead`, `tbody`, and `tfoot` sections are flattened in
/// document order; the first row becomes the header. Cell text is collapsed
/// to single-line form.
///
/// # Returns
/// A Markdown fragment surrounded by newlines, or an empty string for a
/// table with no usable rows.
pub fn convert_table_to_markdown(element: Node) -> String {
  let mut tr_elements = Vec::new();

  for child in element.children() {
    if matches_tag(child, "tr") {
      tr_elements.push(child);
    } else if matches_tag(child, "tbody") || matches_tag(child, "thead") || matches_tag(child, "tfoot") {
      for tr in child.children().filter(|n| matches_tag(*n, "tr")) {
        tr_elements.push(tr);
      }
    }
  }

  let mut rows: Vec<Vec<String>> = Vec::new();
  for tr in tr_elements {
    let cells: Vec<String> = tr
      .children()
      .filter(|child| matches_tag(*child, "th") || matches_tag(*child, "td"))
      .map(|cell| {
        get_element_text(cell)
          .split_whitespace()
          .collect::<Vec<_>>()
          .join(" ")
          .replace('|', "\\|")
      })
      .collect();

    if !cells.is_empty() {
      rows.push(cells);
    }
  }

  render_markdown_table(rows).unwrap_or_default()
}

/// Pretty-print rows as a Markdown table with display-width-aligned columns.
///
/// The first row is treated as the header.
pub fn render_markdown_table(mut rows: Vec<Vec<String>>) -> Option<String> {
  if rows.is_empty() {
    return None;
  }

  let column_count = rows.iter().map(|row| row.len()).max()?;
  if column_count == 0 {
    return None;
  }

  for row in &mut rows {
    row.resize(column_count, String::new());
  }

  let mut column_widths = vec![0; column_count];
  for row in &rows {
    for (index, cell) in row.iter().enumerate() {
      column_widths[index] = column_widths[index].max(cell.width());
    }
  }

  let mut result = String::new();
  result.push('\n');

  if let Some(first_row) = rows.first() {
    result.push_str(&format_row(first_row, &column_widths));

    result.push('|');
    for width in &column_widths {
      let dash_count = (*width).max(3);
      result.push(' ');
      result.push_str(&"-".repeat(dash_count));
      result.push(' ');
      result.push('|');
    }
    result.push('\n');
  }

  for row in rows.iter().skip(1) {
    result.push_str(&format_row(row, &column_widths));
  }

  result.push('\n');
  Some(result)
}

fn format_row(row: &[String], column_widths: &[usize]) -> String {
  let mut line = String::new();
  line.push('|');

  for (cell, width) in row.iter().zip(column_widths) {
    line.push(' ');
    line.push_str(cell);
    let cell_width = cell.width();
    if *width > cell_width {
      line.push_str(&" ".repeat(width - cell_width));
    }
    line.push(' ');
    line.push('|');
  }

  line.push('\n');
  line
}

#[cfg(test)]
mod tests {
  use roxmltree::Document;

  use super::*;
  use crate::transform::xml::wrap_with_namespaces;

  fn convert(input: &str) -> String {
    let wrapped = wrap_with_namespaces(input);
    let document = Document::parse(&wrapped).unwrap();
    let table = document.descendants().find(|node| matches_tag(*node, "table")).unwrap();
    convert_table_to_markdown(table)
  }

  #[test]
  fn test_convert_table() {
    let output = convert(
      r#"
      <table>
        <tr><th>Header 1</th><th>Header 2</th></tr>
        <tr><td>Row 1 Col 1</td><td>Row 1 Col 2</td></tr>
        <tr><td>Row 2 Col 1</td><td>Row 2 Col 2</td></tr>
      </table>
    "#,
    );
    insta::assert_snapshot!(output, @r###"
    | Header 1    | Header 2    |
    | ----------- | ----------- |
    | Row 1 Col 1 | Row 1 Col 2 |
    | Row 2 Col 1 | Row 2 Col 2 |
    "###);
  }

  #[test]
  fn test_convert_table_with_tbody() {
    let output = convert(
      r#"
      <table>
        <thead><tr><th>Name</th></tr></thead>
        <tbody><tr><td>Value</td></tr></tbody>
      </table>
    "#,
    );
    assert!(output.contains("| Name"));
    assert!(output.contains("| Value"));
  }

  #[test]
  fn test_convert_table_escapes_pipes() {
    let output = convert("<table><tr><td>a | b</td></tr></table>");
    assert!(output.contains("a \\| b"));
  }

  #[test]
  fn test_convert_table_empty() {
    let output = convert("<table></table>");
    assert!(!output.contains('|'));
  }

  #[test]
  fn test_ragged_rows_are_padded() {
    let output = convert(
      r#"
      <table>
        <tr><th>A</th><th>B</th></tr>
        <tr><td>only-one</td></tr>
      </table>
    "#,
    );
    let data_row = output.lines().find(|l| l.contains("only-one")).unwrap();
    assert_eq!(data_row.matches('|').count(), 3);
  }
}
