//! Parse request and response envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::record::ExtractionRecord;

/// Page interpretation hint supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    List,
    Detail,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::List => "list",
            PageType::Detail => "detail",
        }
    }
}

/// A request to parse one URL.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ParseRequest {
    /// The page to render and extract.
    pub url: String,

    /// Force list or detail interpretation.
    #[serde(default)]
    pub page_type: Option<PageType>,

    /// Field name to description map the extraction must produce.
    #[serde(default)]
    pub schema: Option<BTreeMap<String, String>>,

    /// Skip the cache read (the result is still cached).
    #[serde(default)]
    pub force_refresh: bool,
}

impl ParseRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), page_type: None, schema: None, force_refresh: false }
    }

    /// Stable rendering of the request options that change the result.
    ///
    /// Used as the variant part of URL-mode cache keys.
    pub fn variant(&self) -> String {
        let mut variant = self.page_type.map(|p| p.as_str()).unwrap_or("auto").to_string();
        if let Some(schema) = &self.schema {
            for (field, description) in schema {
                variant.push('|');
                variant.push_str(field);
                variant.push('=');
                variant.push_str(description);
            }
        }
        variant
    }
}

/// Outcome of a parse request. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ParseResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ParseResponse {
    pub fn success(record: ExtractionRecord) -> Self {
        Self { ok: true, data: Some(record), error: None, error_kind: None }
    }

    pub fn failure(err: &Error) -> Self {
        Self { ok: false, data: None, error: Some(err.to_string()), error_kind: Some(err.kind()) }
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }
}
