//! Webmention endpoint discovery.
//!
//! Before a mention can be sent, the target site's receiving endpoint has to be
//! found. We probe with a cheap `HEAD` first (a `Link` header is enough), and
//! only fetch the page body when the headers don't advertise an endpoint.
//!
//! Discovery never fails: network errors, bad status codes and unparseable
//! pages all mean "no endpoint".

mod parser;

use std::time::Duration;

use backfeed_shared::{BackfeedError, HttpConfig, Result};
use reqwest::header::{ACCEPT, LINK};
use reqwest::{Client, Response};
use tracing::{debug, info, instrument};
use url::Url;

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Per-request budgets for the discovery probes.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for the initial `HEAD` request.
    pub head_timeout: Duration,
    /// Timeout for the fallback `GET` request.
    pub get_timeout: Duration,
    /// Pages announcing a larger body are not scanned.
    pub max_body_bytes: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for DiscoveryOptions {
    fn from(http: &HttpConfig) -> Self {
        Self {
            head_timeout: http.head_timeout(),
            get_timeout: http.request_timeout(),
            max_body_bytes: http.max_body_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Build the reqwest client used for all webmention traffic.
///
/// No client-wide timeout is set; every call applies its own budget.
pub fn build_client(http: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(http.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(http.max_redirects))
        .build()
        .map_err(|e| BackfeedError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Discoverer
// ---------------------------------------------------------------------------

/// Finds the webmention endpoint advertised by a target URL.
#[derive(Debug, Clone)]
pub struct EndpointDiscoverer {
    client: Client,
    opts: DiscoveryOptions,
}

impl EndpointDiscoverer {
    pub fn new(client: Client, opts: DiscoveryOptions) -> Self {
        Self { client, opts }
    }

    /// Discover the webmention endpoint for `url`.
    ///
    /// 1. `HEAD` the URL and look for a `Link: <...>; rel="webmention"` header
    /// 2. `GET` the URL (non-2xx ends discovery) and re-check the `Link` header
    /// 3. Scan the body for `<link rel="webmention">`, then `<a rel="webmention">`
    ///
    /// The endpoint is resolved against the URL of the response it came from.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn discover(&self, url: &Url) -> Option<Url> {
        if let Some(endpoint) = self.probe_head(url).await {
            info!(%endpoint, via = "head", "webmention endpoint discovered");
            return Some(endpoint);
        }

        let endpoint = self.probe_get(url).await;
        match &endpoint {
            Some(endpoint) => info!(%endpoint, via = "get", "webmention endpoint discovered"),
            None => debug!("no webmention endpoint advertised"),
        }
        endpoint
    }

    async fn probe_head(&self, url: &Url) -> Option<Url> {
        let response = self
            .client
            .head(url.as_str())
            .timeout(self.opts.head_timeout)
            .send()
            .await
            .inspect_err(|e| debug!(error = %e, "HEAD probe failed"))
            .ok()?;

        endpoint_from_headers(&response)
    }

    async fn probe_get(&self, url: &Url) -> Option<Url> {
        let response = self
            .client
            .get(url.as_str())
            .header(ACCEPT, "text/html")
            .timeout(self.opts.get_timeout)
            .send()
            .await
            .inspect_err(|e| debug!(error = %e, "GET probe failed"))
            .ok()?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "GET probe returned non-success status");
            return None;
        }

        if let Some(endpoint) = endpoint_from_headers(&response) {
            return Some(endpoint);
        }

        let base = response.url().clone();
        let body = read_body(response, self.opts.max_body_bytes)
            .await
            .inspect_err(|e| debug!(error = %e, "page not scanned"))
            .ok()?;

        let href = parser::endpoint_from_html(&body)?;
        resolve(&base, &href)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Failure to read a response body within the size cap.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("response too large ({0} bytes)")]
    TooLarge(u64),

    #[error(transparent)]
    Read(#[from] reqwest::Error),
}

/// Read a response body as text, giving up once it passes `max_bytes`.
///
/// The cap applies to the bytes actually received, so a chunked response
/// without `Content-Length` is cut off as well.
pub async fn read_body(
    mut response: Response,
    max_bytes: u64,
) -> std::result::Result<String, BodyError> {
    if let Some(len) = response.content_length().filter(|len| *len > max_bytes) {
        return Err(BodyError::TooLarge(len));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let received = (body.len() + chunk.len()) as u64;
        if received > max_bytes {
            return Err(BodyError::TooLarge(received));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Look through every `Link` header on a response.
fn endpoint_from_headers(response: &Response) -> Option<Url> {
    let href = response
        .headers()
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(parser::endpoint_from_link_header)?;

    resolve(response.url(), &href)
}

/// Resolve a possibly-relative href against `base`.
fn resolve(base: &Url, href: &str) -> Option<Url> {
    base.join(href)
        .inspect_err(|e| debug!(%href, error = %e, "unresolvable endpoint href"))
        .ok()
}
