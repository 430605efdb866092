//! Page fixtures for the integration suite.

use confluence_export::confluence::Page;

/// Build a page from raw parts. `ancestors` are `(id, title)` pairs from the
/// space root down to the direct parent.
pub fn page(id: &str, title: &str, body: &str, ancestors: &[(&str, &str)]) -> Page {
  let ancestors: Vec<serde_json::Value> = ancestors
    .iter()
    .map(|(id, title)| serde_json::json!({"id": id, "title": title}))
    .collect();

  serde_json::from_value(serde_json::json!({
    "id": id,
    "title": title,
    "status": "current",
    "body": {"storage": {"value": body, "representation": "storage"}},
    "version": {"number": 1},
    "ancestors": ancestors,
    "space": {"key": "TEST", "name": "Test Space"}
  }))
  .expect("fixture page must deserialize")
}

/// A page already archived on the server.
pub fn archived_page(id: &str, title: &str) -> Page {
  let mut page = page(id, title, "<p>old</p>", &[]);
  page.status = "archived".to_string();
  page
}

/// Storage body with an internal link to another page by id.
pub fn body_with_link(target_id: &str, target_title: &str) -> String {
  format!(r#"<p>See <a href="/pages/{target_id}/{target_title}">{target_title}</a> for details.</p>"#)
}

/// Storage body with an attachment image.
pub fn body_with_image(filename: &str) -> String {
  format!(r#"<p>Diagram:</p><ac:image ac:alt="diagram"><ri:attachment ri:filename="{filename}"/></ac:image>"#)
}

/// Storage body with a user mention.
pub fn body_with_mention(user_key: &str) -> String {
  format!(r#"<p>Owner: <ac:link><ri:user ri:userkey="{user_key}"/></ac:link></p>"#)
}
