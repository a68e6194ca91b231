//! The validity predicate applied to every payload on read and write.
//!
//! Upstream failures (bot walls, 404 pages, interstitial challenges) produce
//! records that look structurally fine. They must never be cached, or an
//! identical request would replay the failure for the full TTL.

use serde_json::Value;

/// Case-insensitive title fragments that mark an error or block page.
pub const ERROR_MARKERS: &[&str] = &[
    "error",
    "failed",
    "forbidden",
    "403",
    "404",
    "500",
    "502",
    "503",
    "access denied",
    "security challenge",
    "bot detection",
    "captcha",
    "just a moment",
    "checking your browser",
    "enable javascript",
    "attention required",
    "not available",
];

/// Whether a title contains any error marker.
pub fn title_has_error_marker(title: &str) -> bool {
    let lowered = title.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Whether a payload may be stored in or served from the cache.
///
/// Accepts either a bare record or a response envelope whose record sits
/// under `data`.
pub fn is_valid_payload(payload: &Value) -> bool {
    let record = match payload {
        Value::Object(map) if map.contains_key("data") => &map["data"],
        other => other,
    };

    let Value::Object(record) = record else {
        return false;
    };
    if record.is_empty() {
        return false;
    }

    let is_unknown = record.get("type").and_then(Value::as_str) == Some("unknown");
    if is_unknown {
        let has_text = record.get("full_text").and_then(Value::as_str).is_some_and(|t| !t.is_empty());
        let has_items = record.get("items").and_then(Value::as_array).is_some_and(|i| !i.is_empty());
        if !has_text && !has_items {
            return false;
        }
    }

    let title = record.get("title").and_then(Value::as_str).unwrap_or_default();
    !title_has_error_marker(title)
}
