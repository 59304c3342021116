//! Core domain types for webmentions and the posts they target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackfeedError;

// ---------------------------------------------------------------------------
// MentionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for webmention identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MentionId(pub Uuid);

impl MentionId {
    /// Generate a new time-sortable mention identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MentionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MentionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MentionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// MentionType
// ---------------------------------------------------------------------------

/// How the source page relates to the target post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionType {
    #[default]
    Mention,
    Like,
    Repost,
    Reply,
}

impl MentionType {
    /// All variants, in stats display order.
    pub const ALL: [MentionType; 4] = [
        MentionType::Mention,
        MentionType::Like,
        MentionType::Repost,
        MentionType::Reply,
    ];

    /// The lowercase wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Reply => "reply",
        }
    }
}

impl std::fmt::Display for MentionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MentionType {
    type Err = BackfeedError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mention" => Ok(Self::Mention),
            "like" => Ok(Self::Like),
            "repost" => Ok(Self::Repost),
            "reply" => Ok(Self::Reply),
            other => Err(BackfeedError::validation(format!(
                "unknown mention type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Author card extracted from the source's `p-author`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl Author {
    /// True when no field was extracted.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.photo.is_none()
    }
}

/// Structured metadata stored alongside a mention, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    /// Plain-text content of the source entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Timestamp declared by the source (`dt-published`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Mention
// ---------------------------------------------------------------------------

/// A verified webmention. At most one exists per `(source_url, target_url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub id: MentionId,
    pub source_url: String,
    pub target_url: String,
    /// Local post resolved from `target_url`; fixed at creation.
    pub post_id: String,
    #[serde(rename = "type")]
    pub mention_type: MentionType,
    pub payload: MentionPayload,
    /// Most recent successful verification.
    pub verified_at: DateTime<Utc>,
    /// First creation; never changes afterwards.
    pub created_at: DateTime<Utc>,
}

/// Fields for a mention that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewMention {
    /// Id to use if this call inserts the row. A stored mention with a
    /// different id means the pair already existed.
    pub id: MentionId,
    pub source_url: String,
    pub target_url: String,
    pub post_id: String,
    pub mention_type: MentionType,
    pub payload: MentionPayload,
    pub verified_at: DateTime<Utc>,
}

/// The mutable part of a mention, applied on re-verification.
#[derive(Debug, Clone)]
pub struct MentionUpdate {
    pub mention_type: MentionType,
    pub payload: MentionPayload,
    pub verified_at: DateTime<Utc>,
}

/// Per-type mention counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub mention: u64,
    pub like: u64,
    pub repost: u64,
    pub reply: u64,
}

impl TypeCounts {
    /// Sum over all types.
    pub fn total(&self) -> u64 {
        self.mention + self.like + self.repost + self.reply
    }

    /// Add `n` to the counter for `kind`.
    pub fn add(&mut self, kind: MentionType, n: u64) {
        match kind {
            MentionType::Mention => self.mention += n,
            MentionType::Like => self.like += n,
            MentionType::Repost => self.repost += n,
            MentionType::Reply => self.reply += n,
        }
    }
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// A local post, as seen by the webmention pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Rendered HTML body, scanned for outbound links.
    pub content_html: String,
}
