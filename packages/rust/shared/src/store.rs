//! Storage seams consumed by the webmention core.
//!
//! The core never talks to a database directly; it goes through these traits
//! so the persistence layer can be swapped (libSQL in production, anything
//! else in embedding applications).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Mention, MentionId, MentionUpdate, NewMention, Post, TypeCounts};

/// Persistence for verified webmentions.
///
/// Implementations must enforce uniqueness of `(source_url, target_url)`.
/// Two concurrent `create` calls for the same pair may both observe the pair
/// as absent; the second must resolve as an update of the first, keeping the
/// original `id`, `post_id` and `created_at`. The later `verified_at` wins,
/// together with the type and payload that came with it.
#[async_trait]
pub trait MentionStore: Send + Sync {
    /// Look up the mention for a `(source, target)` pair.
    async fn find_by_pair(&self, source_url: &str, target_url: &str) -> Result<Option<Mention>>;

    /// Create a mention, returning the stored record.
    async fn create(&self, mention: NewMention) -> Result<Mention>;

    /// Apply a re-verification to an existing mention.
    async fn update(&self, id: &MentionId, update: MentionUpdate) -> Result<Mention>;

    /// All mentions of one post, oldest first.
    async fn list_by_post(&self, post_id: &str) -> Result<Vec<Mention>>;

    /// Mention counts grouped by type.
    async fn count_by_type(&self) -> Result<TypeCounts>;

    /// The `limit` most recently created mentions, newest first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<Mention>>;
}

/// Read access to local posts.
#[async_trait]
pub trait PostResolver: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Post>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Post>>;
}
