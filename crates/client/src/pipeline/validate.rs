//! Record validation and the fallback merge policy.
//!
//! A record that fails [`validate`] is not an error for the caller: it sends
//! the pipeline to the fallback extractor.

use std::collections::HashSet;

use pagesift_core::{Error, ExtractionRecord};

/// Whole titles produced by failed extractions or block pages, lowercased.
///
/// Matched exactly: a real article may well mention "error" or "500". The
/// looser substring markers only keep records out of the cache.
pub const PLACEHOLDER_TITLES: &[&str] = &[
    "error extracting content",
    "extraction failed",
    "untitled",
    "nytimes.com",
    "403 - forbidden",
    "403 forbidden",
    "forbidden",
    "404 not found",
    "404 - not found",
    "page not found",
    "not found",
    "500 internal server error",
    "internal server error",
    "502 bad gateway",
    "503 service unavailable",
    "service unavailable",
    "access denied",
    "just a moment...",
    "just a moment",
    "attention required! | cloudflare",
    "security check",
    "are you a robot?",
];

/// Detail bodies shorter than this (in characters) are judged unusable.
pub const MIN_BODY_CHARS: usize = 80;

/// Bodies with at least this many words are checked for repetition.
const REPETITION_MIN_WORDS: usize = 40;

/// Distinct-to-total word ratio below which a body counts as repetitive.
const REPETITION_RATIO: f64 = 0.2;

/// Whether `title` is empty or exactly a known placeholder, ignoring case.
pub fn is_placeholder_title(title: &str) -> bool {
    let title = title.trim();
    if title.is_empty() {
        return true;
    }
    let lowered = title.to_lowercase();
    PLACEHOLDER_TITLES.contains(&lowered.as_str())
}

/// Judge whether a primary extraction result can be returned as-is.
///
/// # Errors
///
/// `Error::Validation` naming the first problem found.
pub fn validate(record: &ExtractionRecord) -> Result<(), Error> {
    if is_placeholder_title(record.title()) {
        return Err(Error::Validation(format!("unusable title {:?}", record.title())));
    }

    match record {
        ExtractionRecord::Unknown { .. } => Err(Error::Validation("page was not classified".into())),
        ExtractionRecord::List { items, .. } if items.is_empty() => {
            Err(Error::Validation("list page without items".into()))
        }
        ExtractionRecord::Detail { full_text, .. } => {
            let chars = full_text.trim().chars().count();
            if chars < MIN_BODY_CHARS {
                return Err(Error::Validation(format!("body text too short ({chars} chars)")));
            }
            if is_repetitive(full_text) {
                return Err(Error::Validation("body text too repetitive".into()));
            }
            Ok(())
        }
        ExtractionRecord::List { .. } => Ok(()),
    }
}

/// Whether a body is dominated by a few repeated words.
pub fn is_repetitive(text: &str) -> bool {
    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if words.len() < REPETITION_MIN_WORDS {
        return false;
    }
    let distinct = words.iter().collect::<HashSet<_>>().len();
    (distinct as f64) / (words.len() as f64) < REPETITION_RATIO
}

/// Combine a rejected primary record with the fallback extractor's result.
///
/// The fallback wins only when it found body text. It then keeps its own
/// text and title, and takes from the primary whatever metadata it lacks:
/// images, published date and summary. Otherwise the primary is returned
/// unchanged.
pub fn merge(primary: ExtractionRecord, fallback: ExtractionRecord) -> ExtractionRecord {
    let has_text = fallback.full_text().is_some_and(|t| !t.trim().is_empty());
    if !has_text {
        return primary;
    }

    let mut merged = fallback;
    let from = primary.meta();
    let into = merged.meta_mut();
    if into.images.is_empty() {
        into.images = from.images.clone();
    }
    if into.published_date.is_none() {
        into.published_date = from.published_date.clone();
    }
    if into.summary.as_deref().is_none_or(str::is_empty) {
        into.summary = from.summary.clone();
    }
    merged
}
