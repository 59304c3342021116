//! Outbound webmention delivery.
//!
//! When a post is published or updated, every external link in its rendered
//! body is a candidate target. Each candidate is handled on its own task:
//! discover the endpoint, then POST `source=<post url>&target=<candidate>`.
//! One slow or failing target never holds up the others.

use std::sync::{Arc, Weak};
use std::time::Duration;

use backfeed_discovery::EndpointDiscoverer;
use backfeed_shared::{
    BackfeedError, HttpConfig, OutboundConfig, PostResolver, Result, SiteConfig,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::events::{self, Event, EventBus};
use crate::links::{self, Target};

/// Result of one delivery attempt, also the `webmention.sent` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub post_id: String,
    pub source: String,
    pub target: String,
    pub endpoint: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sends mentions for local posts.
#[derive(Clone)]
pub struct OutboundDispatcher {
    site: SiteConfig,
    posts: Arc<dyn PostResolver>,
    events: Arc<EventBus>,
    client: Client,
    discoverer: EndpointDiscoverer,
    timeout: Duration,
    max_candidates: usize,
    concurrency: usize,
}

impl OutboundDispatcher {
    pub fn new(
        site: SiteConfig,
        http: &HttpConfig,
        outbound: &OutboundConfig,
        client: Client,
        posts: Arc<dyn PostResolver>,
        events: Arc<EventBus>,
    ) -> Self {
        let discoverer = EndpointDiscoverer::new(client.clone(), http.into());
        Self {
            site,
            posts,
            events,
            client,
            discoverer,
            timeout: http.request_timeout(),
            max_candidates: outbound.max_candidates,
            concurrency: outbound.concurrency.max(1),
        }
    }

    /// Schedule a dispatch on `tracker` whenever a post is published or updated.
    ///
    /// The handlers hold only a weak reference, so the bus does not keep the
    /// dispatcher alive.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus, tracker: &TaskTracker) {
        for name in [events::POST_PUBLISHED, events::POST_UPDATED] {
            let dispatcher = Arc::downgrade(self);
            let tracker = tracker.clone();
            bus.on(name, move |event| schedule(&dispatcher, &tracker, event));
        }
    }

    /// Deliver mentions for every external link of `post_id`.
    ///
    /// Returns one report per POST attempt; candidates without an endpoint are
    /// skipped silently.
    #[instrument(skip_all, fields(post_id = %post_id))]
    pub async fn dispatch(&self, post_id: &str) -> Result<Vec<DeliveryReport>> {
        let Some(post) = self.posts.find_by_id(post_id).await? else {
            warn!("post not found, nothing to send");
            return Ok(Vec::new());
        };

        if post.content_html.trim().is_empty() {
            debug!("post has no content");
            return Ok(Vec::new());
        }

        let candidates = links::extract_candidates(&post.content_html, self.max_candidates);
        let targets = links::external_targets(candidates, &self.site.origin_url()?);
        if targets.is_empty() {
            debug!("no external links");
            return Ok(Vec::new());
        }

        let source = self.site.post_url(&post.slug);
        info!(targets = targets.len(), %source, "sending webmentions");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for target in targets {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let source = source.clone();
            let post_id = post.id.clone();
            let span = info_span!("deliver", target = %target.raw);

            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    this.deliver(&post_id, &source, &target).await
                }
                .instrument(span),
            );
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "delivery task failed"),
            }
        }

        info!(
            attempted = reports.len(),
            succeeded = reports.iter().filter(|r| r.success).count(),
            "webmention delivery finished"
        );
        Ok(reports)
    }

    /// Discover and notify a single target. `None` when it has no endpoint.
    /// The form carries the target exactly as written in the post.
    async fn deliver(&self, post_id: &str, source: &str, target: &Target) -> Option<DeliveryReport> {
        let endpoint = self.discoverer.discover(&target.url).await?;

        let mut report = DeliveryReport {
            post_id: post_id.to_string(),
            source: source.to_string(),
            target: target.raw.clone(),
            endpoint: endpoint.to_string(),
            success: false,
            status: None,
            error: None,
        };

        let sent = self
            .client
            .post(endpoint.as_str())
            .form(&[("source", source), ("target", target.raw.as_str())])
            .timeout(self.timeout)
            .send()
            .await;

        match sent {
            Ok(response) => {
                let status = response.status();
                report.status = Some(status.as_u16());
                report.success = status.is_success();
                if report.success {
                    info!(%endpoint, %status, "webmention sent");
                } else {
                    warn!(%endpoint, %status, "endpoint refused webmention");
                }
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "webmention delivery failed");
                report.error = Some(e.to_string());
            }
        }

        self.events.emit_serialized(events::WEBMENTION_SENT, &report);
        Some(report)
    }
}

/// Event handler body: spawn a dispatch and return immediately.
fn schedule(
    dispatcher: &Weak<OutboundDispatcher>,
    tracker: &TaskTracker,
    event: &Event,
) -> Result<()> {
    let post_id = event
        .str_field("post_id")
        .ok_or_else(|| BackfeedError::Event(format!("{} event without post_id", event.name)))?
        .to_string();

    let Some(dispatcher) = dispatcher.upgrade() else {
        debug!("dispatcher dropped, ignoring event");
        return Ok(());
    };

    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| BackfeedError::Event(format!("cannot schedule delivery: {e}")))?;

    tracker.spawn_on(
        async move {
            if let Err(e) = dispatcher.dispatch(&post_id).await {
                warn!(%post_id, error = %e, "webmention dispatch failed");
            }
        },
        &runtime,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfeed_shared::Post;
    use backfeed_storage::Storage;
    use std::sync::Mutex;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SITE: &str = "https://mysite.test";

    async fn storage_with(content_html: &str) -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("backfeed_outbound_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        storage
            .upsert_post(&Post {
                id: "p1".into(),
                slug: "hello-world".into(),
                title: Some("Hello".into()),
                content_html: content_html.into(),
            })
            .await
            .unwrap();
        Arc::new(storage)
    }

    fn dispatcher(
        storage: Arc<Storage>,
        bus: Arc<EventBus>,
        http: HttpConfig,
    ) -> OutboundDispatcher {
        let site = SiteConfig {
            origin: SITE.into(),
            post_path: "/posts".into(),
        };
        let client = backfeed_discovery::build_client(&http).unwrap();
        OutboundDispatcher::new(site, &http, &OutboundConfig::default(), client, storage, bus)
    }

    async fn mount_endpoint(server: &MockServer) {
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Link", r#"</webmention>; rel="webmention""#),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webmention"))
            .respond_with(ResponseTemplate::new(202))
            .mount(server)
            .await;
    }

    async fn posts_received(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "POST")
            .count()
    }

    #[tokio::test]
    async fn sends_form_encoded_mention_and_emits_event() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Link", r#"</webmention>; rel="webmention""#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webmention"))
            .and(body_string_contains(
                "source=https%3A%2F%2Fmysite.test%2Fposts%2Fhello-world",
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let target = format!("{}/their-post", server.uri());
        let html = format!(
            r#"<p>Replying to <a href="{target}">this</a> and <a href="{SITE}/posts/older">my older post</a>.</p>"#
        );
        let bus = Arc::new(EventBus::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        {
            let sent = sent.clone();
            bus.on(events::WEBMENTION_SENT, move |event| {
                sent.lock().unwrap().push(event.payload.clone());
                Ok(())
            });
        }

        let d = dispatcher(storage_with(&html).await, bus, HttpConfig::default());
        let reports = d.dispatch("p1").await.unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.success);
        assert_eq!(report.status, Some(201));
        assert_eq!(report.target, target);
        assert_eq!(report.endpoint, format!("{}/webmention", server.uri()));
        assert_eq!(report.source, "https://mysite.test/posts/hello-world");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["success"], true);
        assert_eq!(sent[0]["status"], 201);
        assert_eq!(sent[0]["target"], target.as_str());
    }

    #[tokio::test]
    async fn target_sent_exactly_as_written() {
        let server = MockServer::start().await;
        let literal = format!("http://LOCALHOST:{}", server.address().port());
        let encoded = format!("target=http%3A%2F%2FLOCALHOST%3A{}", server.address().port());

        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Link", r#"</webmention>; rel="webmention""#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webmention"))
            .and(body_string_contains(encoded.as_str()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let html = format!(r#"<p>Thanks to <a href="{literal}">my friend</a></p>"#);
        let bus = Arc::new(EventBus::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        {
            let sent = sent.clone();
            bus.on(events::WEBMENTION_SENT, move |event| {
                sent.lock().unwrap().push(event.payload.clone());
                Ok(())
            });
        }

        let d = dispatcher(storage_with(&html).await, bus, HttpConfig::default());
        let reports = d.dispatch("p1").await.unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].success);
        assert_eq!(reports[0].target, literal);
        assert_eq!(sent.lock().unwrap()[0]["target"], literal.as_str());
    }

    #[tokio::test]
    async fn refused_delivery_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Link", r#"</webmention>; rel="webmention""#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let html = format!(r#"<a href="{}/p">p</a>"#, server.uri());
        let d = dispatcher(storage_with(&html).await, Arc::new(EventBus::new()), HttpConfig::default());
        let reports = d.dispatch("p1").await.unwrap();

        assert_eq!(reports.len(), 1);
        assert!(!reports[0].success);
        assert_eq!(reports[0].status, Some(400));
    }

    #[tokio::test]
    async fn targets_without_endpoint_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no endpoint</html>"))
            .mount(&server)
            .await;

        let html = format!(r#"<a href="{}/p">p</a>"#, server.uri());
        let bus = Arc::new(EventBus::new());
        let d = dispatcher(storage_with(&html).await, bus, HttpConfig::default());

        assert!(d.dispatch("p1").await.unwrap().is_empty());
        assert_eq!(posts_received(&server).await, 0);
    }

    #[tokio::test]
    async fn at_most_25_of_40_links_attempted() {
        let server = MockServer::start().await;
        mount_endpoint(&server).await;

        let html: String = (0..40)
            .map(|i| format!(r#"<a href="{}/post/{i}">{i}</a> "#, server.uri()))
            .collect();
        let d = dispatcher(storage_with(&html).await, Arc::new(EventBus::new()), HttpConfig::default());
        let reports = d.dispatch("p1").await.unwrap();

        assert_eq!(reports.len(), 25);
        assert_eq!(posts_received(&server).await, 25);

        let heads = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "HEAD")
            .count();
        assert_eq!(heads, 25);
    }

    #[tokio::test]
    async fn hanging_target_does_not_block_others() {
        let hanging = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&hanging)
            .await;

        let healthy = MockServer::start().await;
        mount_endpoint(&healthy).await;

        let html = format!(
            r#"<a href="{}/slow">slow</a> <a href="{}/fast">fast</a>"#,
            hanging.uri(),
            healthy.uri()
        );
        let http = HttpConfig {
            discovery_head_timeout_secs: 1,
            request_timeout_secs: 1,
            ..HttpConfig::default()
        };
        let d = dispatcher(storage_with(&html).await, Arc::new(EventBus::new()), http);

        let started = std::time::Instant::now();
        let reports = d.dispatch("p1").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(reports.len(), 1);
        assert!(reports[0].target.starts_with(&healthy.uri()));
        assert_eq!(posts_received(&healthy).await, 1);
    }

    #[tokio::test]
    async fn empty_or_missing_post_is_noop() {
        let d = dispatcher(storage_with("   ").await, Arc::new(EventBus::new()), HttpConfig::default());
        assert!(d.dispatch("p1").await.unwrap().is_empty());
        assert!(d.dispatch("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_event_schedules_background_dispatch() {
        let server = MockServer::start().await;
        mount_endpoint(&server).await;

        let html = format!(r#"<a href="{}/p">p</a>"#, server.uri());
        let bus = Arc::new(EventBus::new());
        let tracker = TaskTracker::new();
        let d = Arc::new(dispatcher(storage_with(&html).await, bus.clone(), HttpConfig::default()));
        d.subscribe(&bus, &tracker);

        let delivered = bus.emit(events::POST_PUBLISHED, serde_json::json!({"post_id": "p1"}));
        assert_eq!(delivered, 1);

        tracker.close();
        tracker.wait().await;
        assert_eq!(posts_received(&server).await, 1);
    }

    #[tokio::test]
    async fn event_without_post_id_is_a_handler_error() {
        let bus = Arc::new(EventBus::new());
        let tracker = TaskTracker::new();
        let d = Arc::new(dispatcher(storage_with("").await, bus.clone(), HttpConfig::default()));
        d.subscribe(&bus, &tracker);

        assert_eq!(bus.emit(events::POST_UPDATED, serde_json::json!({})), 0);
        assert!(tracker.is_empty());
    }
}
