//! Chat request types and prompt assembly.

use std::collections::BTreeMap;

use pagesift_core::{PageType, ParseRequest};
use serde::Serialize;
use url::Url;

use crate::sandbox::OUTPUT_VARIABLE;

/// Request options that steer extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionHints {
    /// Forced list/detail interpretation.
    pub page_type: Option<PageType>,
    /// Field name to description map the output must use.
    pub schema: Option<BTreeMap<String, String>>,
}

impl ExtractionHints {
    pub fn from_request(request: &ParseRequest) -> Self {
        Self { page_type: request.page_type, schema: request.schema.clone().filter(|s| !s.is_empty()) }
    }
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: String) -> Self {
        Self { role: "system", content }
    }

    pub fn user(content: String) -> Self {
        Self { role: "user", content }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self { format_type: "json_object" }
    }
}

const RECORD_SHAPES: &str = r#"Classify the page as a list page (many items) or a detail page (one article or item).
Ignore navigation, headers, footers and sidebars. Resolve every relative URL against the base URL.

List page shape:
{"type": "list", "title": str, "items": [{"title": str, "url": str, "snippet": str}, ...]}

Detail page shape:
{"type": "detail", "title": str, "summary": str, "full_text": str, "published_date": str or null,
 "images": [{"url": str, "alt": str}, ...up to 3 content images, no logos or icons],
 "links": [{"url": str, "text": str}, ...links inside the article body]}

If the page is neither, use {"type": "unknown", "title": str, "summary": str}."#;

const DIRECT_RULES: &str = "You are an expert web scraper. You will be given the cleaned HTML of one web page.
Reply with a single JSON object and nothing else.";

const PROGRAM_RULES: &str = r#"You are an expert web scraper. You will be given the cleaned HTML of one web page.
Write a short extraction program that turns it into structured data. Reply with the program only, no prose and no code fences.

The program language is a small subset of Python:
- statements: assignment (including `+=` and tuple unpacking), if/elif/else, for, try/except/finally, raise, pass, break, continue
- literals: numbers, strings, True, False, None, lists, dicts, list and dict comprehensions
- no imports, no function or class definitions, no while loops, no lambdas, no f-strings
- builtins: len str int float bool list dict range min max sum abs round sorted reversed any all enumerate zip isinstance
  ValueError KeyError IndexError TypeError Exception
- documents: `parse(html)` returns a node; nodes have `.select(css)`, `.select_one(css)`, `.find(tag, class_=..., id=...)`,
  `.find_all(...)`, `.get(attr)`, `.text`, `.get_text()`; `urljoin(base, href)` resolves a URL
- inputs: `html_content` (the HTML below) and `base_url` (the page URL)

Always check that an element exists before reading from it:
    title_node = doc.select_one("h1")
    title = title_node.text if title_node else ""

The program must assign its result to the variable `parsed`. Every loop is charged against a small step budget,
so keep the program direct."#;

fn hint_instructions(hints: &ExtractionHints, out: &mut String) {
    match hints.page_type {
        Some(PageType::List) => out.push_str(
            "\n\nCRITICAL: This is a LIST PAGE. Extract a list of items with title, url and snippet. \
             Do NOT treat it as a detail page.",
        ),
        Some(PageType::Detail) => out.push_str(
            "\n\nCRITICAL: This is a DETAIL PAGE. Extract title, summary, full_text, images and links. \
             Do NOT treat it as a list page.",
        ),
        None => {}
    }

    if let Some(schema) = &hints.schema {
        out.push_str("\n\nCRITICAL: The output MUST use exactly these keys (per item for list pages):\n");
        for (field, description) in schema {
            out.push_str(&format!("- {field}: {description}\n"));
        }
        out.push_str("Do NOT add other fields. Use an empty string or null for a missing field.");
    }
}

/// System prompt for direct record extraction.
pub fn direct_system_prompt(hints: &ExtractionHints) -> String {
    let mut prompt = format!("{DIRECT_RULES}\n\n{RECORD_SHAPES}");
    hint_instructions(hints, &mut prompt);
    prompt
}

/// System prompt for extraction program synthesis.
pub fn program_system_prompt(hints: &ExtractionHints) -> String {
    let mut prompt = format!(
        "{PROGRAM_RULES}\n\nThe value bound to `{OUTPUT_VARIABLE}` must follow one of these shapes:\n\n{RECORD_SHAPES}"
    );
    hint_instructions(hints, &mut prompt);
    prompt
}

/// User message carrying the page.
pub fn page_prompt(cleaned: &str, base_url: &Url, ask: &str) -> String {
    format!("Base URL: {base_url}\n\nHere is the HTML content:\n\n{cleaned}\n\n{ask}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_missing_format() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage::system("rules".into()), ChatMessage::user("page".into())],
            temperature: 0.0,
            response_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][1]["role"], "user");
        assert!(value.get("response_format").is_none());

        let request = ChatRequest { response_format: Some(ResponseFormat::json_object()), ..request };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_page_type_hint_in_prompt() {
        let hints = ExtractionHints { page_type: Some(PageType::List), schema: None };
        let prompt = program_system_prompt(&hints);
        assert!(prompt.contains("LIST PAGE"));
        assert!(prompt.contains("`parsed`"));
        assert!(!direct_system_prompt(&ExtractionHints::default()).contains("CRITICAL"));
    }

    #[test]
    fn test_schema_fields_listed_in_prompt() {
        let mut schema = BTreeMap::new();
        schema.insert("price".to_string(), "price with currency".to_string());
        let hints = ExtractionHints { page_type: None, schema: Some(schema) };
        assert!(direct_system_prompt(&hints).contains("- price: price with currency"));
    }

    #[test]
    fn test_empty_schema_is_dropped() {
        let request = ParseRequest { schema: Some(BTreeMap::new()), ..ParseRequest::new("https://example.com") };
        assert!(ExtractionHints::from_request(&request).schema.is_none());
    }
}
