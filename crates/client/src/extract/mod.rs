//! Readability fallback extraction using Lectito.
//!
//! Used when the primary extraction produced nothing usable. The result is
//! always a record: a `detail` with the article text when Lectito finds an
//! article, an `unknown` titled "Extraction failed" when it does not.

pub mod links;

pub use links::{extract_images, extract_links, resolve_http};

use lectito_core::parse_with_url;
use pagesift_core::{ExtractionRecord, RecordMeta};
use url::Url;

/// Images kept per fallback record.
pub const MAX_FALLBACK_IMAGES: usize = 5;

/// Characters of body text used for the summary.
pub const SUMMARY_CHARS: usize = 200;

/// Stable extractor trait for the fallback path.
///
/// This allows swapping the extraction engine without touching the pipeline.
pub trait Extractor: Send + Sync {
    /// Extract a readable record from rendered HTML.
    fn extract(&self, html: &str, base_url: &Url) -> ExtractionRecord;
}

/// Lectito-based extractor implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LectitoExtractor;

impl LectitoExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for LectitoExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> ExtractionRecord {
        if html.trim().is_empty() {
            return failed_record("empty document".to_string());
        }

        let article = match parse_with_url(html, base_url.as_str()) {
            Ok(article) => article,
            Err(e) => {
                tracing::warn!(url = %base_url, error = %e, "readability extraction failed");
                return failed_record(e.to_string());
            }
        };

        let full_text = normalize_text(&article.to_text());
        let title = article
            .metadata
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        ExtractionRecord::Detail {
            meta: RecordMeta {
                title,
                summary: Some(summarize(&full_text)),
                published_date: None,
                images: extract_images(&article.content, base_url, MAX_FALLBACK_IMAGES),
                links: extract_links(&article.content, base_url),
            },
            full_text,
        }
    }
}

/// The record returned when no article could be extracted.
pub fn failed_record(reason: String) -> ExtractionRecord {
    ExtractionRecord::Unknown {
        meta: RecordMeta { title: "Extraction failed".to_string(), summary: Some(reason), ..Default::default() },
    }
}

/// First [`SUMMARY_CHARS`] characters, with `...` when cut.
pub fn summarize(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Trim each line and drop blank ones.
fn normalize_text(text: &str) -> String {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesift_core::RecordKind;

    const ARTICLE: &str = r#"
        <!DOCTYPE html>
        <html>
        <head><title>Ferris Learns to Swim</title></head>
        <body>
            <article>
                <h1>Ferris Learns to Swim</h1>
                <p>This is a substantial paragraph with plenty of content to ensure we meet
                the character threshold for extraction. We need multiple paragraphs with
                meaningful content to pass the extraction algorithm's requirements.</p>
                <p>Here is another paragraph with even more content to ensure that the
                extraction will succeed. This paragraph adds more text and increases the
                overall character count significantly.</p>
                <p>A third paragraph providing additional content that helps ensure the
                document is substantial enough for successful extraction. The readability
                algorithm requires a minimum amount of content to identify the main article.</p>
                <img src="/ferris.png" alt="Ferris">
                <a href="/more">More crab news</a>
            </article>
        </body>
        </html>
    "#;

    #[test]
    fn test_extract_article_to_detail() {
        let base = Url::parse("https://example.com/news/").unwrap();
        let record = LectitoExtractor::new().extract(ARTICLE, &base);

        assert_eq!(record.kind(), RecordKind::Detail);
        assert_eq!(record.title(), "Ferris Learns to Swim");
        assert!(record.full_text().unwrap().contains("substantial paragraph"));

        let summary = record.meta().summary.as_deref().unwrap();
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_extract_empty_html_fails_softly() {
        let base = Url::parse("https://example.com").unwrap();
        let record = LectitoExtractor::new().extract("", &base);
        assert_eq!(record.kind(), RecordKind::Unknown);
        assert_eq!(record.title(), "Extraction failed");
    }

    #[test]
    fn test_summarize_short_text_unchanged() {
        assert_eq!(summarize("short body"), "short body");
    }

    #[test]
    fn test_summarize_cuts_on_char_boundary() {
        let text = "é".repeat(SUMMARY_CHARS + 10);
        let summary = summarize(&text);
        assert_eq!(summary, format!("{}...", "é".repeat(SUMMARY_CHARS)));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  a \n\n   \n b  "), "a\nb");
    }
}
