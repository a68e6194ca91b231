//! Link and image harvesting from HTML fragments.

use std::collections::HashSet;
use std::sync::LazyLock;

use pagesift_core::{Image, RecordLink};
use scraper::{Html, Selector};
use url::Url;

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").expect("invalid selector"));
static IMAGES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("invalid selector"));

/// Resolve `reference` against `base`, keeping only http(s) results.
///
/// Protocol-relative references (`//cdn...`) take the base's scheme.
pub fn resolve_http(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let resolved = base.join(reference).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Collect `<a href>` links, resolved and deduplicated by URL.
///
/// Same-page fragment links and non-http(s) targets (`mailto:`,
/// `javascript:`) are skipped.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<RecordLink> {
    let fragment = Html::parse_fragment(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in fragment.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.trim_start().starts_with('#') {
            continue;
        }
        let Some(resolved) = resolve_http(base_url, href) else {
            continue;
        };

        let url = resolved.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let text = anchor.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        links.push(RecordLink { url, text });
    }

    links
}

/// Collect up to `limit` images with absolute http(s) sources.
///
/// Inline `data:` images are skipped; lazy-loaded `data-src` is used when
/// `src` is absent.
pub fn extract_images(html: &str, base_url: &Url, limit: usize) -> Vec<Image> {
    let fragment = Html::parse_fragment(html);
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for img in fragment.select(&IMAGES) {
        if images.len() >= limit {
            break;
        }
        let element = img.value();
        let Some(src) = element.attr("src").or_else(|| element.attr("data-src")) else {
            continue;
        };
        if src.trim_start().starts_with("data:") {
            continue;
        }
        let Some(resolved) = resolve_http(base_url, src) else {
            continue;
        };
        if !seen.insert(resolved.to_string()) {
            continue;
        }

        let alt = element.attr("alt").unwrap_or_default().trim().to_string();
        let description = element
            .attr("title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| (!alt.is_empty()).then(|| alt.clone()));
        images.push(Image { url: resolved.to_string(), alt, description });
    }

    images
}
