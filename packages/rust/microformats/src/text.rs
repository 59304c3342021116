//! Plain-text flattening and date parsing for h-entry properties.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::ElementRef;
use scraper::node::Node;

/// Elements whose text never counts as content.
const SKIPPED: &[&str] = &["script", "style", "template", "noscript"];

/// Elements that start a new run of text.
const BLOCKS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre",
    "section", "table", "td", "th", "tr", "ul",
];

/// Strip all markup below `el`, returning whitespace-collapsed text.
///
/// Block elements separate words so `<p>a</p><p>b</p>` reads `a b`.
pub(crate) fn plain_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();

    for node in el.descendants() {
        match node.value() {
            Node::Element(e) if BLOCKS.contains(&e.name()) => raw.push(' '),
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| SKIPPED.contains(&e.name()))
                });
                if !hidden {
                    raw.push_str(text);
                }
            }
            _ => {}
        }
    }

    collapse_whitespace(&raw)
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a `dt-published` value.
///
/// Accepts RFC 3339, a zoneless `YYYY-MM-DDTHH:MM[:SS]` (read as UTC) and a
/// bare `YYYY-MM-DD` (midnight UTC).
pub(crate) fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
