//! h-entry extraction for inbound webmentions.
//!
//! Walks a parsed document and reads the handful of microformats2 properties
//! needed to describe a mention: author card, plain-text content, publication
//! date and the reply/like/repost links that decide the mention type.
//!
//! Only the first `h-entry` in the document is considered. Anything missing or
//! malformed is simply left out of the result.

mod text;

use std::sync::LazyLock;

use backfeed_shared::{Author, MentionPayload, MentionType};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

// ---------------------------------------------------------------------------
// Selectors (compiled once)
// ---------------------------------------------------------------------------

macro_rules! selector {
    ($name:ident, $css:literal) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect(concat!("selector ", $css)));
    };
}

selector!(H_ENTRY, ".h-entry");
selector!(P_AUTHOR, ".p-author");
selector!(P_NAME, ".p-name");
selector!(E_CONTENT, ".e-content");
selector!(DT_PUBLISHED, ".dt-published");
selector!(U_IN_REPLY_TO, ".u-in-reply-to");
selector!(U_LIKE_OF, ".u-like-of");
selector!(U_REPOST_OF, ".u-repost-of");
selector!(ANCHOR, "a[href]");
selector!(IMG, "img[src]");

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The properties of one h-entry that matter for a webmention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HEntry {
    pub mention_type: MentionType,
    pub author: Option<Author>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Absolute URLs from `u-in-reply-to`.
    pub in_reply_to: Vec<String>,
    /// Absolute URLs from `u-like-of`.
    pub like_of: Vec<String>,
    /// Absolute URLs from `u-repost-of`.
    pub repost_of: Vec<String>,
}

impl HEntry {
    /// The part stored with the mention record.
    pub fn into_payload(self) -> MentionPayload {
        MentionPayload {
            author: self.author,
            content: self.content,
            published_at: self.published_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract the first h-entry of `html`.
///
/// Relative author URLs, photos and classification links are resolved
/// against `source_url`. Returns `None` when the page has no h-entry.
#[instrument(skip(html), fields(source = %source_url))]
pub fn extract(html: &str, source_url: &Url) -> Option<HEntry> {
    let doc = Html::parse_document(html);
    let Some(entry) = doc.select(&H_ENTRY).next() else {
        debug!("no h-entry found");
        return None;
    };

    let in_reply_to = links(entry, &U_IN_REPLY_TO, source_url);
    let like_of = links(entry, &U_LIKE_OF, source_url);
    let repost_of = links(entry, &U_REPOST_OF, source_url);

    let mention_type = classify(&in_reply_to, &like_of, &repost_of);

    let parsed = HEntry {
        mention_type,
        author: author(entry, source_url),
        content: content(entry),
        published_at: published(entry),
        in_reply_to,
        like_of,
        repost_of,
    };

    debug!(
        mention_type = %parsed.mention_type,
        has_author = parsed.author.is_some(),
        has_content = parsed.content.is_some(),
        "h-entry extracted"
    );
    Some(parsed)
}

/// Reply wins over like, like over repost; everything else is a mention.
fn classify(in_reply_to: &[String], like_of: &[String], repost_of: &[String]) -> MentionType {
    if !in_reply_to.is_empty() {
        MentionType::Reply
    } else if !like_of.is_empty() {
        MentionType::Like
    } else if !repost_of.is_empty() {
        MentionType::Repost
    } else {
        MentionType::Mention
    }
}

fn author(entry: ElementRef<'_>, base: &Url) -> Option<Author> {
    let card = entry.select(&P_AUTHOR).next()?;

    // `<a class="p-author p-name" href="...">Jane</a>` is a common shorthand.
    let name_el = if has_class(card, "p-name") {
        Some(card)
    } else {
        card.select(&P_NAME).next()
    };
    let name = name_el
        .map(text::plain_text)
        .filter(|name| !name.is_empty());

    let href = if card.value().name() == "a" {
        card.value().attr("href")
    } else {
        card.select(&ANCHOR).next().and_then(|a| a.value().attr("href"))
    };
    let url = href.and_then(|href| resolve(base, href));

    let photo = card
        .select(&IMG)
        .next()
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| resolve(base, src));

    let author = Author { name, url, photo };
    (!author.is_empty()).then_some(author)
}

fn content(entry: ElementRef<'_>) -> Option<String> {
    let el = entry.select(&E_CONTENT).next()?;
    let text = text::plain_text(el);
    (!text.is_empty()).then_some(text)
}

fn published(entry: ElementRef<'_>) -> Option<DateTime<Utc>> {
    let el = entry.select(&DT_PUBLISHED).next()?;
    match el.value().attr("datetime") {
        Some(value) => text::parse_published(value),
        None => text::parse_published(&text::plain_text(el)),
    }
}

/// Every link carried by elements matching `selector`, in document order.
///
/// The link is the element's own `href`, or else its first descendant anchor
/// (the nested `h-cite` form).
fn links(entry: ElementRef<'_>, selector: &Selector, base: &Url) -> Vec<String> {
    entry
        .select(selector)
        .filter_map(|el| {
            el.value()
                .attr("href")
                .or_else(|| el.select(&ANCHOR).next().and_then(|a| a.value().attr("href")))
        })
        .filter_map(|href| resolve(base, href))
        .collect()
}

fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(String::from)
}
