//! Idempotent persistence of verified mentions.

use backfeed_shared::{
    Mention, MentionId, MentionPayload, MentionStore, MentionType, MentionUpdate, NewMention,
    Result,
};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

/// Whether an upsert inserted a new record or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

impl std::fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store or refresh the mention for `(source_url, target_url)`.
///
/// An existing record keeps its `id`, `post_id` and `created_at`; its type,
/// payload and `verified_at` are replaced. Storage errors propagate.
pub async fn upsert_mention(
    store: &dyn MentionStore,
    source_url: &str,
    target_url: &str,
    post_id: &str,
    mention_type: MentionType,
    payload: MentionPayload,
) -> Result<(Mention, UpsertAction)> {
    let now = Utc::now();

    if let Some(existing) = store.find_by_pair(source_url, target_url).await? {
        debug!(id = %existing.id, "refreshing existing mention");
        let updated = store
            .update(
                &existing.id,
                MentionUpdate {
                    mention_type,
                    payload,
                    verified_at: now,
                },
            )
            .await?;
        return Ok((updated, UpsertAction::Updated));
    }

    let id = MentionId::new();
    let stored = store
        .create(NewMention {
            id: id.clone(),
            source_url: source_url.to_string(),
            target_url: target_url.to_string(),
            post_id: post_id.to_string(),
            mention_type,
            payload,
            verified_at: now,
        })
        .await?;

    // Lost a create/create race: the store folded this call into the other row.
    let action = if stored.id == id {
        UpsertAction::Created
    } else {
        debug!(id = %stored.id, "concurrent create resolved as update");
        UpsertAction::Updated
    };
    Ok((stored, action))
}
