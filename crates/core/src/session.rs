//! # Session Store
//!
//! SQLite-backed persistence for run conversations, keyed by a
//! caller-supplied session id. Rows carry a TTL; expired sessions are purged
//! lazily on access. Connection access is serialized behind a mutex and
//! moved off the async threads with `spawn_blocking`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::state::ChatMessage;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// A persisted conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub metadata: HashMap<String, String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session listing entry (no message bodies)
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite session store with per-row TTL
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    ttl: ChronoDuration,
}

impl SessionStore {
    /// Open or create the store at `path`
    pub fn open_at<P: AsRef<Path>>(path: P, ttl_days: u32) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn =
            Connection::open(path.as_ref()).context("Failed to open session database")?;
        Self::from_connection(conn, ttl_days)
    }

    /// In-memory store, for tests
    pub fn open_in_memory(ttl_days: u32) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, ttl_days)
    }

    fn from_connection(conn: Connection, ttl_days: u32) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl: ChronoDuration::days(i64::from(ttl_days)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current < SCHEMA_VERSION {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    messages_json TEXT NOT NULL DEFAULT '[]',
                    metadata_json TEXT NOT NULL DEFAULT '{}',
                    message_count INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock error: {e}"))
    }

    /// Check the store responds (used by the health endpoint)
    pub async fn ping(&self) -> bool {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().ok()?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0)).ok()
        })
        .await
        .ok()
        .flatten()
        .is_some()
    }

    /// Save (upsert) a conversation under `session_id`.
    ///
    /// `created_at` is preserved across saves; the TTL window restarts on
    /// every save.
    pub async fn save(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        let messages_json = serde_json::to_string(messages)?;
        let metadata_json = serde_json::to_string(metadata)?;
        let count = messages.len();
        let now = Utc::now();
        let expires_at = now + self.ttl;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {e}"))?;

            let existing_created: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM sessions WHERE session_id = ?1",
                    [&session_id],
                    |row| row.get(0),
                )
                .optional()?;

            let created_at = existing_created.unwrap_or_else(|| now.to_rfc3339());

            conn.execute(
                r#"
                INSERT OR REPLACE INTO sessions
                    (session_id, messages_json, metadata_json, message_count,
                     created_at, updated_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    session_id,
                    messages_json,
                    metadata_json,
                    count as i64,
                    created_at,
                    now.to_rfc3339(),
                    expires_at.to_rfc3339(),
                ],
            )?;

            tracing::debug!("saved conversation for session {session_id} ({count} messages)");
            Ok(())
        })
        .await
        .context("session save task failed")?
    }

    /// Load a conversation, or `None` if absent or expired
    pub async fn load(&self, session_id: &str) -> Result<Option<Conversation>> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Conversation>> {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {e}"))?;
            purge_expired(&conn)?;

            let row = conn
                .query_row(
                    r#"
                    SELECT messages_json, metadata_json, message_count,
                           created_at, updated_at
                    FROM sessions WHERE session_id = ?1
                    "#,
                    [&session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((messages_json, metadata_json, count, created_at, updated_at)) = row
            else {
                return Ok(None);
            };

            Ok(Some(Conversation {
                session_id,
                messages: serde_json::from_str(&messages_json)?,
                metadata: serde_json::from_str(&metadata_json)?,
                message_count: count as usize,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            }))
        })
        .await
        .context("session load task failed")?
    }

    /// Delete a session; true if a row was removed
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {e}"))?;
            let removed =
                conn.execute("DELETE FROM sessions WHERE session_id = ?1", [&session_id])?;
            if removed > 0 {
                tracing::info!("deleted session {session_id}");
            }
            Ok(removed > 0)
        })
        .await
        .context("session delete task failed")?
    }

    /// Most recently updated sessions, newest first
    pub async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<Vec<SessionSummary>> {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {e}"))?;
            purge_expired(&conn)?;

            let mut stmt = conn.prepare(
                r#"
                SELECT session_id, message_count, created_at, updated_at
                FROM sessions ORDER BY updated_at DESC LIMIT ?1
                "#,
            )?;

            let rows = stmt.query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut sessions = Vec::new();
            for row in rows {
                let (session_id, count, created_at, updated_at) = row?;
                sessions.push(SessionSummary {
                    session_id,
                    message_count: count as usize,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                });
            }
            Ok(sessions)
        })
        .await
        .context("session list task failed")?
    }
}

fn purge_expired(conn: &Connection) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at < ?1",
        [Utc::now().to_rfc3339()],
    )?;
    if removed > 0 {
        tracing::debug!("purged {removed} expired sessions");
    }
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in store: {raw}"))?
        .with_timezone(&Utc))
}
