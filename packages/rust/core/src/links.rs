//! Outbound link candidates from rendered post HTML.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Absolute http(s) URLs, stopping at whitespace, quotes and angle brackets.
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("url regex"));

/// Characters that end a sentence rather than a URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']'];

/// Raw `http(s)://` URLs in `html`, de-duplicated in encounter order and capped
/// at `max` entries.
pub(crate) fn extract_candidates(html: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();

    URL_RE
        .find_iter(html)
        .map(|m| clean(m.as_str()))
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .take(max)
        .collect()
}

/// A candidate link as written in the post, with its parsed form.
///
/// `raw` is what receivers look for in the source page; `url` is only used
/// for the origin check and endpoint discovery.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub raw: String,
    pub url: Url,
}

/// Candidates that parse and point away from `local`.
pub(crate) fn external_targets(candidates: Vec<String>, local: &Url) -> Vec<Target> {
    let local = local.origin();
    candidates
        .into_iter()
        .filter_map(|raw| Url::parse(&raw).ok().map(|url| Target { raw, url }))
        .filter(|target| target.url.origin() != local)
        .collect()
}

fn clean(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .trim_end_matches(TRAILING_PUNCTUATION)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_links_in_attributes_and_text() {
        let html = r#"<p>See <a href="https://a.example/one">one</a> and https://b.example/two.</p>"#;
        assert_eq!(
            extract_candidates(html, 25),
            vec!["https://a.example/one", "https://b.example/two"]
        );
    }

    #[test]
    fn dedupes_in_encounter_order() {
        let html = r#"<a href="https://a.example/">x</a> <a href="https://b.example/">y</a>
                      <a href="https://a.example/">z</a>"#;
        assert_eq!(
            extract_candidates(html, 25),
            vec!["https://a.example/", "https://b.example/"]
        );
    }

    #[test]
    fn caps_candidate_count() {
        let html: String = (0..40)
            .map(|i| format!(r#"<a href="https://site{i}.example/">{i}</a>"#))
            .collect();
        let candidates = extract_candidates(&html, 25);
        assert_eq!(candidates.len(), 25);
        assert_eq!(candidates[0], "https://site0.example/");
        assert_eq!(candidates[24], "https://site24.example/");
    }

    #[test]
    fn decodes_ampersands_and_trims_punctuation() {
        let html = r#"<a href="https://a.example/?x=1&amp;y=2">q</a> (https://b.example/page)."#;
        assert_eq!(
            extract_candidates(html, 25),
            vec!["https://a.example/?x=1&y=2", "https://b.example/page"]
        );
    }

    #[test]
    fn same_origin_skipped() {
        let local = Url::parse("https://mysite.test").unwrap();
        let candidates = vec![
            "https://mysite.test/posts/other".to_string(),
            "http://mysite.test/insecure".to_string(),
            "https://friend.example/post".to_string(),
        ];
        let targets = external_targets(candidates, &local);
        let targets: Vec<&str> = targets.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(
            targets,
            vec!["http://mysite.test/insecure", "https://friend.example/post"]
        );
    }

    #[test]
    fn target_keeps_text_as_written() {
        let local = Url::parse("https://mysite.test").unwrap();
        let targets = external_targets(vec!["https://Friend.EXAMPLE".to_string()], &local);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].raw, "https://Friend.EXAMPLE");
        assert_eq!(targets[0].url.as_str(), "https://friend.example/");
    }
}
