//! Canonical extraction record model.
//!
//! A record is one of three variants. Fields that only make sense for one
//! variant live on that variant, so a `list` record can never carry body text
//! and a `detail` record can never carry items.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An image referenced by the extracted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A video or in-body link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RecordLink {
    #[serde(alias = "href")]
    pub url: String,
    #[serde(default)]
    pub text: String,
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ListItem {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Caller-requested fields beyond the standard three.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields shared by every record variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RecordMeta {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<Image>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: Vec<RecordLink>,
}

/// The structured result of extracting one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractionRecord {
    /// A single article or item page.
    Detail {
        #[serde(flatten)]
        meta: RecordMeta,
        full_text: String,
    },
    /// A listing of several items.
    List {
        #[serde(flatten)]
        meta: RecordMeta,
        #[serde(default)]
        items: Vec<ListItem>,
    },
    /// The page could not be classified.
    Unknown {
        #[serde(flatten)]
        meta: RecordMeta,
    },
}

/// Discriminant of [`ExtractionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Detail,
    List,
    Unknown,
}

impl ExtractionRecord {
    /// An `unknown` record with no content.
    pub fn empty() -> Self {
        ExtractionRecord::Unknown { meta: RecordMeta::default() }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            ExtractionRecord::Detail { .. } => RecordKind::Detail,
            ExtractionRecord::List { .. } => RecordKind::List,
            ExtractionRecord::Unknown { .. } => RecordKind::Unknown,
        }
    }

    pub fn meta(&self) -> &RecordMeta {
        match self {
            ExtractionRecord::Detail { meta, .. }
            | ExtractionRecord::List { meta, .. }
            | ExtractionRecord::Unknown { meta } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut RecordMeta {
        match self {
            ExtractionRecord::Detail { meta, .. }
            | ExtractionRecord::List { meta, .. }
            | ExtractionRecord::Unknown { meta } => meta,
        }
    }

    pub fn title(&self) -> &str {
        &self.meta().title
    }

    /// Body text; only `detail` records have one.
    pub fn full_text(&self) -> Option<&str> {
        match self {
            ExtractionRecord::Detail { full_text, .. } => Some(full_text),
            _ => None,
        }
    }

    /// Listing entries; only `list` records have them.
    pub fn items(&self) -> &[ListItem] {
        match self {
            ExtractionRecord::List { items, .. } => items,
            _ => &[],
        }
    }

    /// Parse a record from a loosely shaped JSON value.
    ///
    /// A missing or unrecognized `type` becomes `unknown`, and `null` fields
    /// are treated as absent.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut object = match value {
            Value::Object(map) => map,
            other => {
                return Err(serde::de::Error::custom(format!("expected an object, found {}", type_name(&other))));
            }
        };

        let tag = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .filter(|t| matches!(t.as_str(), "detail" | "list" | "unknown"))
            .unwrap_or_else(|| "unknown".to_string());

        if tag == "detail" && !object.get("full_text").is_some_and(Value::is_string) {
            object.insert("full_text".into(), Value::String(String::new()));
        }
        object.insert("type".into(), Value::String(tag));
        object.retain(|_, v| !v.is_null());

        serde_json::from_value(Value::Object(object))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detail_serializes_with_type_tag() {
        let record = ExtractionRecord::Detail {
            meta: RecordMeta { title: "Hello".into(), ..Default::default() },
            full_text: "Body".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "detail");
        assert_eq!(value["title"], "Hello");
        assert_eq!(value["full_text"], "Body");
        assert!(value.get("items").is_none());
    }

    #[test]
    fn test_list_has_no_full_text() {
        let record = ExtractionRecord::from_value(json!({
            "type": "list",
            "title": "Latest",
            "items": [{"title": "One", "url": "https://example.com/1", "snippet": "first"}]
        }))
        .unwrap();
        assert_eq!(record.kind(), RecordKind::List);
        assert_eq!(record.items().len(), 1);
        assert!(record.full_text().is_none());
    }

    #[test]
    fn test_from_value_defaults_missing_type() {
        let record = ExtractionRecord::from_value(json!({"title": "Mystery"})).unwrap();
        assert_eq!(record.kind(), RecordKind::Unknown);
        assert_eq!(record.title(), "Mystery");
    }

    #[test]
    fn test_from_value_tolerates_nulls() {
        let record = ExtractionRecord::from_value(json!({
            "type": "detail",
            "title": null,
            "full_text": "text",
            "images": null,
            "published_date": null
        }))
        .unwrap();
        assert_eq!(record.title(), "");
        assert!(record.meta().images.is_empty());
        assert_eq!(record.full_text(), Some("text"));
    }

    #[test]
    fn test_from_value_detail_without_text() {
        let record = ExtractionRecord::from_value(json!({"type": "Detail", "title": "t"})).unwrap();
        assert_eq!(record.full_text(), Some(""));
    }

    #[test]
    fn test_from_value_rejects_scalar() {
        assert!(ExtractionRecord::from_value(json!("just text")).is_err());
    }

    #[test]
    fn test_list_item_keeps_extra_fields() {
        let item: ListItem = serde_json::from_value(json!({"title": "A", "price": "$5"})).unwrap();
        assert_eq!(item.extra.get("price"), Some(&json!("$5")));
    }

    #[test]
    fn test_link_accepts_href_alias() {
        let link: RecordLink = serde_json::from_value(json!({"href": "https://x.test/", "text": "x"})).unwrap();
        assert_eq!(link.url, "https://x.test/");
    }
}
