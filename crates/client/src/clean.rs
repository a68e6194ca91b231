//! Rendered-document cleaning.
//!
//! Reduces a rendered page to compact HTML that still carries enough
//! structure (tags, `class`, `id`, links) for a model or an extraction
//! program to find its way around, while dropping everything that only
//! costs tokens: scripts, styles, embedded media, comments, site chrome and
//! known clutter containers.

use std::sync::LazyLock;

use regex::Regex;
use scraper::node::{Element, Node};
use scraper::{ElementRef, Html};

/// Appended when output is cut at the length limit.
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Elements dropped with their whole subtree.
const REMOVED_TAGS: &[&str] = &[
    "script", "style", "svg", "noscript", "iframe", "object", "embed", "meta", "link", "template", "canvas", "nav",
    "aside",
];

/// Site chrome, dropped only outside `<article>` / `<main>`.
const CHROME_TAGS: &[&str] = &["header", "footer"];

const KEPT_ATTRS: &[&str] = &["href", "src", "data-src", "alt", "title", "datetime", "class", "id"];

const VOID_TAGS: &[&str] =
    &["area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr"];

/// Deeper subtrees are dropped.
const MAX_DEPTH: usize = 256;

static CLUTTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(cookie|consent|gdpr|advert|sponsor|newsletter|popup|subscribe|social-share|share-buttons)")
        .expect("invalid clutter pattern")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));

/// Clean `html` and truncate the result to `max_chars` characters.
pub fn clean_html(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len().min(max_chars.saturating_mul(2)));

    for child in document.tree.root().children() {
        if let Some(element) = ElementRef::wrap(child) {
            write_element(element, &mut out, 0, false);
        }
    }

    truncate_chars(out, max_chars)
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

fn is_removed(element: &Element, in_content: bool) -> bool {
    let name = element.name();
    if REMOVED_TAGS.contains(&name) || (!in_content && CHROME_TAGS.contains(&name)) {
        return true;
    }
    if element.attr("hidden").is_some() || element.attr("aria-hidden") == Some("true") {
        return true;
    }
    if name == "body" || name == "html" || name == "main" || name == "article" {
        return false;
    }
    [element.attr("class"), element.attr("id")]
        .into_iter()
        .flatten()
        .any(|value| CLUTTER.is_match(value))
}

fn write_element(element: ElementRef<'_>, out: &mut String, depth: usize, in_content: bool) {
    let el = element.value();
    if depth > MAX_DEPTH || is_removed(el, in_content) {
        return;
    }

    let name = el.name();
    out.push('<');
    out.push_str(name);
    for attr in KEPT_ATTRS {
        let Some(value) = el.attr(attr) else {
            continue;
        };
        if !value.trim().is_empty() {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            push_escaped(out, value.trim(), true);
            out.push('"');
        }
    }
    out.push('>');

    if VOID_TAGS.contains(&name) {
        return;
    }

    let in_content = in_content || name == "article" || name == "main";
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let collapsed = WHITESPACE.replace_all(text, " ");
                if !collapsed.trim().is_empty() {
                    push_escaped(out, &collapsed, false);
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out, depth + 1, in_content);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_escaped(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <!DOCTYPE html>
        <html>
        <head>
            <title>Rust 2024 Released</title>
            <meta name="description" content="edition">
            <link rel="stylesheet" href="/site.css">
            <style>body { color: red }</style>
            <script>window.tracking = true;</script>
        </head>
        <body>
            <header class="site-header"><a href="/">Home</a></header>
            <nav><a href="/news">News</a></nav>
            <!-- build 1234 -->
            <div class="cookie-banner">We use cookies</div>
            <article data-track="x" onclick="evil()">
                <header><h1 class="headline">Rust 2024 Released</h1></header>
                <p>The   new
                   edition is <b>out</b> &amp; stable.</p>
                <img src="/hero.png" alt="Ferris">
                <svg><circle r="4"></circle></svg>
            </article>
            <aside>Related</aside>
            <footer>Copyright</footer>
        </body>
        </html>
    "#;

    #[test]
    fn test_removes_non_content_markup() {
        let cleaned = clean_html(PAGE, 100_000);
        for gone in ["tracking", "color: red", "build 1234", "We use cookies", "Related", "Copyright", "<nav", "<svg"]
        {
            assert!(!cleaned.contains(gone), "{gone} should be removed: {cleaned}");
        }
    }

    #[test]
    fn test_keeps_content_and_structure() {
        let cleaned = clean_html(PAGE, 100_000);
        assert!(cleaned.contains("<title>Rust 2024 Released</title>"));
        assert!(cleaned.contains(r#"<h1 class="headline">Rust 2024 Released</h1>"#));
        assert!(cleaned.contains("<p>The new edition is <b>out</b> &amp; stable.</p>"));
        assert!(cleaned.contains(r#"<img src="/hero.png" alt="Ferris">"#));
    }

    #[test]
    fn test_drops_unlisted_attributes() {
        let cleaned = clean_html(PAGE, 100_000);
        assert!(!cleaned.contains("onclick"));
        assert!(!cleaned.contains("data-track"));
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let truncated = truncate_chars("héllo wörld".to_string(), 7);
        assert_eq!(truncated, format!("héllo w{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_no_marker_when_short() {
        assert_eq!(truncate_chars("short".to_string(), 5), "short");
    }

    #[test]
    fn test_clean_truncates_output() {
        let cleaned = clean_html(PAGE, 40);
        assert!(cleaned.ends_with(TRUNCATION_MARKER));
        assert_eq!(cleaned.chars().count(), 40 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_empty_document() {
        let cleaned = clean_html("", 1000);
        assert!(cleaned.starts_with("<html>"));
        assert!(!cleaned.contains("truncated"));
    }
}
