//! Source verification for inbound webmentions.
//!
//! Checks the claimed `(source, target)` pair before anything is stored:
//! the target must be a post on this site, and the source page must be
//! fetchable and mention the target URL verbatim.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use backfeed_shared::{HttpConfig, Post, PostResolver, Result, SiteConfig};
use regex::Regex;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::debug;
use url::Url;

/// `/post/<slug>` or `/posts/<slug>` anywhere in the target path.
static POST_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/posts?/([^/?#]+)").expect("post path regex"));

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an inbound mention was refused. `Display` is the reason reported to senders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("Missing source or target URL")]
    MissingUrl,

    #[error("Invalid URL format")]
    InvalidUrl,

    #[error("Target URL does not belong to this site")]
    ForeignTarget,

    #[error("Target URL does not point to a post")]
    NotAPost,

    #[error("Target post not found")]
    PostNotFound,

    /// Transport error, non-2xx status or oversized body.
    #[error("Failed to fetch source: {0}")]
    FetchFailed(String),

    #[error("Source does not link to target")]
    NoBacklink,
}

/// A source page that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedSource {
    /// The source URL as submitted.
    pub source_url: String,
    /// The target URL as submitted.
    pub target_url: String,
    /// URL the body was finally served from, after redirects.
    pub fetched_url: Url,
    /// The local post the target resolves to.
    pub post: Post,
    pub body: String,
}

#[derive(Debug)]
pub enum Verification {
    Verified(Box<VerifiedSource>),
    Rejected(RejectReason),
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Validates inbound pairs and fetches source pages.
#[derive(Clone)]
pub struct SourceVerifier {
    site: SiteConfig,
    posts: Arc<dyn PostResolver>,
    client: Client,
    timeout: Duration,
    max_body_bytes: u64,
}

impl SourceVerifier {
    pub fn new(
        site: SiteConfig,
        http: &HttpConfig,
        client: Client,
        posts: Arc<dyn PostResolver>,
    ) -> Self {
        Self {
            site,
            posts,
            client,
            timeout: http.request_timeout(),
            max_body_bytes: http.max_body_bytes,
        }
    }

    /// Run every check up to and including the backlink test.
    ///
    /// Only a failing post lookup is an `Err`; everything else the sender got
    /// wrong is a [`Verification::Rejected`].
    pub async fn verify(&self, source: &str, target: &str) -> Result<Verification> {
        let source = source.trim();
        let target = target.trim();

        if source.is_empty() || target.is_empty() {
            return Ok(Verification::Rejected(RejectReason::MissingUrl));
        }

        let (Some(source_url), Some(target_url)) = (parse_http_url(source), parse_http_url(target))
        else {
            return Ok(Verification::Rejected(RejectReason::InvalidUrl));
        };

        if !self.site.owns(target) {
            return Ok(Verification::Rejected(RejectReason::ForeignTarget));
        }

        let Some(slug) = post_slug(&target_url) else {
            return Ok(Verification::Rejected(RejectReason::NotAPost));
        };

        let Some(post) = self.posts.find_by_slug(&slug).await? else {
            debug!(%slug, "target post not found");
            return Ok(Verification::Rejected(RejectReason::PostNotFound));
        };

        let (fetched_url, body) = match self.fetch_source(&source_url).await {
            Ok(fetched) => fetched,
            Err(reason) => return Ok(Verification::Rejected(reason)),
        };

        // Literal containment: no anchor parsing, no URL normalization.
        if !body.contains(target) {
            return Ok(Verification::Rejected(RejectReason::NoBacklink));
        }

        Ok(Verification::Verified(Box::new(VerifiedSource {
            source_url: source.to_string(),
            target_url: target.to_string(),
            fetched_url,
            post,
            body,
        })))
    }

    async fn fetch_source(&self, url: &Url) -> std::result::Result<(Url, String), RejectReason> {
        let response = self
            .client
            .get(url.as_str())
            .header(ACCEPT, "text/html")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RejectReason::FetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "source fetch returned non-success status");
            return Err(RejectReason::FetchFailed(status.as_u16().to_string()));
        }

        let fetched_url = response.url().clone();
        let body = backfeed_discovery::read_body(response, self.max_body_bytes)
            .await
            .map_err(|e| RejectReason::FetchFailed(e.to_string()))?;

        Ok((fetched_url, body))
    }
}

fn parse_http_url(raw: &str) -> Option<Url> {
    Url::parse(raw)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

/// The slug named by a `/post(s)/<slug>` target path.
pub(crate) fn post_slug(target: &Url) -> Option<String> {
    POST_PATH_RE
        .captures(target.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
