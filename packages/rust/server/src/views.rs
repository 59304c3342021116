//! JSON response shapes (camelCase on the wire).

use backfeed_core::MentionStats;
use backfeed_shared::{Author, Mention, MentionType, TypeCounts};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub success: bool,
    pub id: String,
}

/// One mention as listed for a post.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionView {
    pub id: String,
    pub source_url: String,
    #[serde(rename = "type")]
    pub mention_type: MentionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Mention> for MentionView {
    fn from(m: Mention) -> Self {
        Self {
            id: m.id.to_string(),
            source_url: m.source_url,
            mention_type: m.mention_type,
            author: m.payload.author,
            content: m.payload.content,
            published_at: m.payload.published_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub total: u64,
    pub by_type: TypeCounts,
    pub recent: Vec<MentionView>,
}

impl From<MentionStats> for StatsView {
    fn from(stats: MentionStats) -> Self {
        Self {
            total: stats.total,
            by_type: stats.by_type,
            recent: stats.recent.into_iter().map(MentionView::from).collect(),
        }
    }
}
