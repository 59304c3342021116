//! libSQL storage layer for posts and verified webmentions.
//!
//! The [`Storage`] struct wraps a local libSQL database and implements the
//! [`MentionStore`] and [`PostResolver`] seams consumed by the core.
//!
//! **Invariants enforced here:**
//! - at most one mention per `(source_url, target_url)`, via a unique index
//! - a concurrent duplicate `create` turns into an update of the existing row
//!   (same `id`, `post_id` and `created_at`)
//! - deleting a post deletes its mentions

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use backfeed_shared::{
    BackfeedError, Mention, MentionId, MentionPayload, MentionStore, MentionType, MentionUpdate,
    NewMention, Post, PostResolver, Result, TypeCounts,
};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};

/// Column list shared by every mention query; see [`row_to_mention`].
const MENTION_COLUMNS: &str =
    "id, source_url, target_url, post_id, mention_type, payload_json, verified_at, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackfeedError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (used by reporting commands).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BackfeedError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BackfeedError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Post operations
    // -----------------------------------------------------------------------

    /// Insert a post, or replace slug/title/content of the post with the same id.
    pub async fn upsert_post(&self, post: &Post) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO posts (id, slug, title, content_html, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    slug = excluded.slug,
                    title = excluded.title,
                    content_html = excluded.content_html,
                    updated_at = excluded.updated_at",
                params![
                    post.id.as_str(),
                    post.slug.as_str(),
                    post.title.as_deref(),
                    post.content_html.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a post by slug.
    pub async fn get_post_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        self.query_post("SELECT id, slug, title, content_html FROM posts WHERE slug = ?1", slug)
            .await
    }

    /// Get a post by id.
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        self.query_post("SELECT id, slug, title, content_html FROM posts WHERE id = ?1", id)
            .await
    }

    async fn query_post(&self, sql: &str, key: &str) -> Result<Option<Post>> {
        let mut rows = self.conn.query(sql, params![key]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_post(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Delete a post by id, cascading to its mentions. Returns whether a row was removed.
    pub async fn delete_post(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Mention operations
    // -----------------------------------------------------------------------

    /// Get a mention by id.
    pub async fn get_mention(&self, id: &MentionId) -> Result<Option<Mention>> {
        let sql = format!("SELECT {MENTION_COLUMNS} FROM webmentions WHERE id = ?1");
        let id = id.to_string();
        let mut rows = self
            .conn
            .query(&sql, params![id.as_str()])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_mention(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn query_mentions(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Mention>> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_mention(&row)?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Collaborator trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl MentionStore for Storage {
    async fn find_by_pair(&self, source_url: &str, target_url: &str) -> Result<Option<Mention>> {
        let sql = format!(
            "SELECT {MENTION_COLUMNS} FROM webmentions WHERE source_url = ?1 AND target_url = ?2"
        );
        Ok(self
            .query_mentions(&sql, params![source_url, target_url])
            .await?
            .into_iter()
            .next())
    }

    async fn create(&self, mention: NewMention) -> Result<Mention> {
        self.check_writable()?;
        let id = mention.id.to_string();
        let payload = payload_json(&mention.payload)?;
        let verified_at = timestamp(&mention.verified_at);

        // A row inserted by a concurrent caller keeps id, post_id and
        // created_at. The re-verifiable columns are only replaced by a newer
        // verification, so verified_at never moves backwards.
        self.conn
            .execute(
                "INSERT INTO webmentions
                    (id, source_url, target_url, post_id, mention_type, payload_json, verified_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(source_url, target_url) DO UPDATE SET
                    mention_type = excluded.mention_type,
                    payload_json = excluded.payload_json,
                    verified_at = excluded.verified_at
                 WHERE excluded.verified_at > webmentions.verified_at",
                params![
                    id.as_str(),
                    mention.source_url.as_str(),
                    mention.target_url.as_str(),
                    mention.post_id.as_str(),
                    mention.mention_type.as_str(),
                    payload.as_str(),
                    verified_at.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        self.find_by_pair(&mention.source_url, &mention.target_url)
            .await?
            .ok_or_else(|| {
                BackfeedError::Storage(format!(
                    "mention for {} -> {} missing after insert",
                    mention.source_url, mention.target_url
                ))
            })
    }

    async fn update(&self, id: &MentionId, update: MentionUpdate) -> Result<Mention> {
        self.check_writable()?;
        let payload = payload_json(&update.payload)?;
        let verified_at = timestamp(&update.verified_at);
        let key = id.to_string();

        let affected = self
            .conn
            .execute(
                "UPDATE webmentions
                 SET mention_type = ?1, payload_json = ?2, verified_at = ?3
                 WHERE id = ?4",
                params![
                    update.mention_type.as_str(),
                    payload.as_str(),
                    verified_at.as_str(),
                    key.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        if affected == 0 {
            return Err(BackfeedError::Storage(format!("mention {id} not found")));
        }

        self.get_mention(id)
            .await?
            .ok_or_else(|| BackfeedError::Storage(format!("mention {id} not found")))
    }

    async fn list_by_post(&self, post_id: &str) -> Result<Vec<Mention>> {
        let sql = format!(
            "SELECT {MENTION_COLUMNS} FROM webmentions WHERE post_id = ?1 ORDER BY created_at, id"
        );
        self.query_mentions(&sql, params![post_id]).await
    }

    async fn count_by_type(&self) -> Result<TypeCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT mention_type, COUNT(*) FROM webmentions GROUP BY mention_type",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut counts = TypeCounts::default();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let kind: MentionType = row.get::<String>(0).map_err(db_err)?.parse()?;
            let n = row.get::<i64>(1).map_err(db_err)?;
            counts.add(kind, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Mention>> {
        let sql = format!(
            "SELECT {MENTION_COLUMNS} FROM webmentions ORDER BY created_at DESC, id DESC LIMIT ?1"
        );
        self.query_mentions(&sql, params![i64::from(limit)]).await
    }
}

#[async_trait]
impl PostResolver for Storage {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        self.get_post_by_slug(slug).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Post>> {
        self.get_post(id).await
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> BackfeedError {
    BackfeedError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 (UTC, microseconds) so text order is time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BackfeedError::Storage(format!("invalid date '{s}': {e}")))
}

fn payload_json(payload: &MentionPayload) -> Result<String> {
    serde_json::to_string(payload)
        .map_err(|e| BackfeedError::Storage(format!("failed to encode payload: {e}")))
}

fn row_to_post(row: &libsql::Row) -> Result<Post> {
    Ok(Post {
        id: row.get::<String>(0).map_err(db_err)?,
        slug: row.get::<String>(1).map_err(db_err)?,
        title: row.get::<String>(2).ok(),
        content_html: row.get::<String>(3).map_err(db_err)?,
    })
}

/// Map a row selected with [`MENTION_COLUMNS`].
fn row_to_mention(row: &libsql::Row) -> Result<Mention> {
    let id: String = row.get(0).map_err(db_err)?;
    let mention_type: String = row.get(4).map_err(db_err)?;
    let payload: String = row.get(5).map_err(db_err)?;
    let verified_at: String = row.get(6).map_err(db_err)?;
    let created_at: String = row.get(7).map_err(db_err)?;

    Ok(Mention {
        id: id
            .parse()
            .map_err(|e| BackfeedError::Storage(format!("invalid mention id '{id}': {e}")))?,
        source_url: row.get::<String>(1).map_err(db_err)?,
        target_url: row.get::<String>(2).map_err(db_err)?,
        post_id: row.get::<String>(3).map_err(db_err)?,
        mention_type: mention_type.parse()?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| BackfeedError::Storage(format!("invalid payload for {id}: {e}")))?,
        verified_at: parse_timestamp(&verified_at)?,
        created_at: parse_timestamp(&created_at)?,
    })
}
