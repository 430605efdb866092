//! YAML front matter for emitted Markdown.

use crate::confluence::Page;

/// Stable front matter keys: `title`, `id`, `version`, `parentId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
  pub title: String,
  pub id: String,
  pub version: Option<u32>,
  pub parent_id: Option<String>,
}

impl FrontMatter {
  /// Build front matter from a fetched page.
  pub fn from_page(page: &Page) -> Self {
    Self {
      title: page.title.clone(),
      id: page.id.clone(),
      version: page.version_number(),
      parent_id: page.parent_id().map(str::to_string),
    }
  }

  /// Render as a YAML block fenced by `---` lines, ending with a newline.
  pub fn render(&self) -> String {
    let mut result = String::from("---\n");
    result.push_str(&format!("title: \"{}\"\n", escape_yaml(&self.title)));
    result.push_str(&format!("id: \"{}\"\n", escape_yaml(&self.id)));
    if let Some(version) = self.version {
      result.push_str(&format!("version: {version}\n"));
    }
    if let Some(ref parent_id) = self.parent_id {
      result.push_str(&format!("parentId: \"{}\"\n", escape_yaml(parent_id)));
    }
    result.push_str("---\n");
    result
  }
}

fn escape_yaml(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}
