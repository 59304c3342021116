//! Read-side queries over stored mentions.

use backfeed_shared::{Mention, MentionStore, Result, TypeCounts};
use serde::Serialize;

/// How many mentions the stats view lists.
pub const RECENT_LIMIT: u32 = 10;

/// Aggregate view over all stored mentions.
#[derive(Debug, Clone, Serialize)]
pub struct MentionStats {
    pub total: u64,
    pub by_type: TypeCounts,
    /// Newest first, at most [`RECENT_LIMIT`].
    pub recent: Vec<Mention>,
}

/// Verified mentions of one post, oldest first.
pub async fn mentions_for_post(store: &dyn MentionStore, post_id: &str) -> Result<Vec<Mention>> {
    store.list_by_post(post_id).await
}

/// Totals per type plus the most recent mentions.
pub async fn stats(store: &dyn MentionStore) -> Result<MentionStats> {
    let by_type = store.count_by_type().await?;
    let recent = store.list_recent(RECENT_LIMIT).await?;

    Ok(MentionStats {
        total: by_type.total(),
        by_type,
        recent,
    })
}
