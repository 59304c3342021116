//! SQL migration definitions for the Backfeed database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: posts, webmentions",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Local posts that can be mentioned and that send mentions
CREATE TABLE IF NOT EXISTS posts (
    id           TEXT PRIMARY KEY,
    slug         TEXT NOT NULL UNIQUE,
    title        TEXT,
    content_html TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- Verified inbound mentions; one row per (source, target)
CREATE TABLE IF NOT EXISTS webmentions (
    id           TEXT PRIMARY KEY,
    source_url   TEXT NOT NULL,
    target_url   TEXT NOT NULL,
    post_id      TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    mention_type TEXT NOT NULL CHECK (mention_type IN ('mention', 'like', 'repost', 'reply')),
    payload_json TEXT NOT NULL DEFAULT '{}',
    verified_at  TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(source_url, target_url)
);

CREATE INDEX IF NOT EXISTS idx_webmentions_post_id ON webmentions(post_id);
CREATE INDEX IF NOT EXISTS idx_webmentions_created_at ON webmentions(created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
