//! Shape raw extraction output into an [`ExtractionRecord`].
//!
//! Completion replies and sandbox programs return loosely typed JSON. The
//! accepted shapes are:
//!
//! - an object: read as a record, `type` defaulting to `unknown`
//! - an array: read as the items of a `list` record
//! - a string: kept as the summary of an `unknown` record
//!
//! Anything else becomes an empty `unknown` record. Null entries are dropped
//! and bare strings in `images` / `links` are read as URLs.

use pagesift_core::{ExtractionRecord, RecordMeta};
use serde_json::{Map, Value};

/// Convert raw output into a record. Never fails; unusable output is `unknown`.
pub fn normalize(raw: Value) -> ExtractionRecord {
    let object = match raw {
        Value::Object(object) => object,
        Value::Array(items) => {
            let mut object = Map::new();
            object.insert("type".into(), Value::String("list".into()));
            object.insert("items".into(), Value::Array(items));
            object
        }
        Value::String(text) if !text.trim().is_empty() => {
            return ExtractionRecord::Unknown { meta: RecordMeta { summary: Some(text), ..Default::default() } };
        }
        other => {
            tracing::debug!(kind = json_kind(&other), "extraction output is not a record");
            return ExtractionRecord::empty();
        }
    };

    let title = object.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
    match ExtractionRecord::from_value(Value::Object(tidy(object))) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "extraction output did not match the record shape");
            ExtractionRecord::Unknown { meta: RecordMeta { title, ..Default::default() } }
        }
    }
}

fn tidy(mut object: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Array(items)) = object.get_mut("items") {
        items.retain(Value::is_object);
        for item in items.iter_mut() {
            if let Value::Object(fields) = item {
                fields.retain(|_, v| !v.is_null());
                for key in ["title", "url", "snippet"] {
                    stringify(fields, key);
                }
            }
        }
    }

    for key in ["images", "links"] {
        if let Some(Value::Array(entries)) = object.get_mut(key) {
            entries.retain_mut(|entry| match entry {
                Value::String(url) if !url.is_empty() => {
                    let url = std::mem::take(url);
                    *entry = serde_json::json!({ "url": url });
                    true
                }
                Value::Object(fields) => {
                    fields.retain(|_, v| !v.is_null());
                    fields.get("url").or_else(|| fields.get("href")).is_some_and(Value::is_string)
                }
                _ => false,
            });
        }
    }

    for key in ["title", "summary", "full_text", "published_date"] {
        stringify(&mut object, key);
    }
    object
}

/// Render a scalar field as text so a stray number does not sink the record.
fn stringify(fields: &mut Map<String, Value>, key: &str) {
    if let Some(value) = fields.get_mut(key) {
        match value {
            Value::Number(n) => *value = Value::String(n.to_string()),
            Value::Bool(b) => *value = Value::String(b.to_string()),
            _ => {}
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesift_core::RecordKind;
    use serde_json::json;

    #[test]
    fn test_object_without_type_is_unknown() {
        let record = normalize(json!({"title": "Hello"}));
        assert_eq!(record.kind(), RecordKind::Unknown);
        assert_eq!(record.title(), "Hello");
    }

    #[test]
    fn test_array_becomes_list() {
        let record = normalize(json!([
            {"title": "One", "url": "https://example.com/1", "snippet": null},
            "stray",
            {"title": null, "url": "https://example.com/2"}
        ]));
        assert_eq!(record.kind(), RecordKind::List);
        assert_eq!(record.items().len(), 2);
        assert_eq!(record.items()[1].title, "");
        assert_eq!(record.items()[1].url.as_deref(), Some("https://example.com/2"));
    }

    #[test]
    fn test_string_becomes_summary() {
        let record = normalize(json!("A page about crabs"));
        assert_eq!(record.kind(), RecordKind::Unknown);
        assert_eq!(record.meta().summary.as_deref(), Some("A page about crabs"));
    }

    #[test]
    fn test_scalars_are_empty_unknown() {
        assert_eq!(normalize(json!(42)), ExtractionRecord::empty());
        assert_eq!(normalize(Value::Null), ExtractionRecord::empty());
    }

    #[test]
    fn test_image_and_link_strings_become_objects() {
        let record = normalize(json!({
            "type": "detail",
            "title": "Crabs",
            "full_text": "text",
            "images": ["https://example.com/a.png", {"url": "https://example.com/b.png", "alt": null}, 7],
            "links": [{"href": "https://example.com/more", "text": "more"}, {"text": "no url"}]
        }));
        let meta = record.meta();
        assert_eq!(meta.images.len(), 2);
        assert_eq!(meta.images[0].url, "https://example.com/a.png");
        assert_eq!(meta.links.len(), 1);
        assert_eq!(meta.links[0].url, "https://example.com/more");
    }

    #[test]
    fn test_numeric_fields_become_text() {
        let record = normalize(json!({"type": "detail", "title": 2024, "full_text": "x", "published_date": 2024}));
        assert_eq!(record.title(), "2024");
        assert_eq!(record.meta().published_date.as_deref(), Some("2024"));
    }

    #[test]
    fn test_mismatched_shape_keeps_title() {
        let record = normalize(json!({"type": "list", "title": "Latest", "items": "not a list"}));
        assert_eq!(record.kind(), RecordKind::Unknown);
        assert_eq!(record.title(), "Latest");
    }
}
