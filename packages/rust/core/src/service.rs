//! The `Webmentions` facade wiring verification, storage, events and delivery.

use std::sync::Arc;

use backfeed_shared::{
    AppConfig, Mention, MentionId, MentionStore, PostResolver, Result, SiteConfig,
};
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};

use crate::events::{self, EventBus};
use crate::inbound::{RejectReason, SourceVerifier, Verification};
use crate::outbound::{DeliveryReport, OutboundDispatcher};
use crate::query::{self, MentionStats};
use crate::upsert::{UpsertAction, upsert_mention};

/// Result of processing one inbound webmention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Accepted { id: MentionId, action: UpsertAction },
    Rejected(RejectReason),
}

impl InboundOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// `webmention.received` payload.
#[derive(Serialize)]
struct Received<'a> {
    action: UpsertAction,
    mention: &'a Mention,
}

/// Entry point for everything the webmention pipeline does.
pub struct Webmentions {
    site: SiteConfig,
    store: Arc<dyn MentionStore>,
    events: Arc<EventBus>,
    verifier: SourceVerifier,
    outbound: Arc<OutboundDispatcher>,
    tracker: TaskTracker,
}

impl Webmentions {
    /// Build the pipeline and, when outbound delivery is enabled, subscribe it
    /// to post publish/update events on `events`.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn MentionStore>,
        posts: Arc<dyn PostResolver>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        let client = backfeed_discovery::build_client(&config.http)?;

        let verifier =
            SourceVerifier::new(config.site.clone(), &config.http, client.clone(), posts.clone());
        let outbound = Arc::new(OutboundDispatcher::new(
            config.site.clone(),
            &config.http,
            &config.outbound,
            client,
            posts,
            events.clone(),
        ));

        let tracker = TaskTracker::new();
        if config.outbound.enabled {
            outbound.subscribe(&events, &tracker);
        }

        Ok(Self {
            site: config.site.clone(),
            store,
            events,
            verifier,
            outbound,
            tracker,
        })
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Verify, classify and store an inbound webmention.
    ///
    /// Sender mistakes come back as [`InboundOutcome::Rejected`]; only storage
    /// failures are errors.
    #[instrument(skip_all, fields(source = %source, target = %target))]
    pub async fn process_inbound(&self, source: &str, target: &str) -> Result<InboundOutcome> {
        let verified = match self.verifier.verify(source, target).await? {
            Verification::Verified(verified) => verified,
            Verification::Rejected(reason) => {
                info!(%reason, "webmention rejected");
                return Ok(InboundOutcome::Rejected(reason));
            }
        };

        let (mention_type, payload) =
            backfeed_microformats::extract(&verified.body, &verified.fetched_url)
                .map(|entry| (entry.mention_type, entry.into_payload()))
                .unwrap_or_default();

        let (mention, action) = upsert_mention(
            self.store.as_ref(),
            &verified.source_url,
            &verified.target_url,
            &verified.post.id,
            mention_type,
            payload,
        )
        .await?;

        info!(id = %mention.id, %mention_type, %action, "webmention accepted");
        self.events.emit_serialized(
            events::WEBMENTION_RECEIVED,
            &Received {
                action,
                mention: &mention,
            },
        );

        Ok(InboundOutcome::Accepted {
            id: mention.id,
            action,
        })
    }

    /// Verified mentions of one post.
    pub async fn mentions_for_post(&self, post_id: &str) -> Result<Vec<Mention>> {
        query::mentions_for_post(self.store.as_ref(), post_id).await
    }

    pub async fn stats(&self) -> Result<MentionStats> {
        query::stats(self.store.as_ref()).await
    }

    /// Announce a published (or, with `updated`, edited) post.
    ///
    /// Outbound delivery runs in the background; see [`Webmentions::drain`].
    pub fn announce(&self, post_id: &str, updated: bool) -> usize {
        let name = if updated {
            events::POST_UPDATED
        } else {
            events::POST_PUBLISHED
        };
        self.events
            .emit(name, serde_json::json!({ "post_id": post_id }))
    }

    /// Deliver mentions for a post on the current task, bypassing the bus.
    pub async fn dispatch_now(&self, post_id: &str) -> Result<Vec<DeliveryReport>> {
        self.outbound.dispatch(post_id).await
    }

    /// Number of background deliveries still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every background delivery scheduled so far.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
