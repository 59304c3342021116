//! Webmention endpoint advertisement parsing.
//!
//! A target advertises its endpoint in one of three places, checked in order:
//! - an HTTP `Link` header: `<https://example.com/wm>; rel="webmention"`
//! - a `<link rel="webmention" href="...">` element
//! - an `<a rel="webmention" href="...">` element
//!
//! The `rel` value is a space-separated token list compared case-insensitively;
//! quotes around it are optional in headers.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

// ---------------------------------------------------------------------------
// Patterns (compiled once)
// ---------------------------------------------------------------------------

/// One `<uri>; params` member of a Link header; params run until the next `<`.
static LINK_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]*)>([^<]*)").expect("link value regex"));

/// The `rel` parameter, quoted or bare.
static REL_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i);\s*rel\s*=\s*(?:"([^"]*)"|([^\s;,"]+))"#).expect("rel param regex")
});

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel][href]").expect("link selector"));

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[rel][href]").expect("anchor selector"));

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Whether a `rel` token list names the webmention relation.
fn rel_is_webmention(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case("webmention"))
}

/// Extract the webmention target from a single `Link` header value.
///
/// Returns the raw (possibly relative) URI of the first matching member.
pub(crate) fn endpoint_from_link_header(value: &str) -> Option<String> {
    LINK_VALUE_RE.captures_iter(value).find_map(|caps| {
        let uri = caps.get(1)?.as_str().trim();
        let params = caps.get(2)?.as_str();

        let matches = REL_PARAM_RE.captures_iter(params).any(|rel| {
            rel.get(1)
                .or_else(|| rel.get(2))
                .is_some_and(|m| rel_is_webmention(m.as_str()))
        });

        matches.then(|| uri.to_string())
    })
}

/// Scan an HTML document for a webmention `<link>`, then an `<a>`.
///
/// Returns the raw `href` of the first match; `<link>` elements anywhere in
/// the document win over anchors.
pub(crate) fn endpoint_from_html(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    first_webmention_href(&doc, &LINK_SEL).or_else(|| first_webmention_href(&doc, &ANCHOR_SEL))
}

fn first_webmention_href(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .find(|el| has_webmention_rel(el))
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
}

fn has_webmention_rel(el: &ElementRef<'_>) -> bool {
    el.value().attr("rel").is_some_and(rel_is_webmention)
}
