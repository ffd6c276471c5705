//! wp-memory: Per-user conversational memory with SQLite persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use wp_core::memory::{MemoryEntry, MemoryStore, MemoryStoreError};

/// Query words shorter than this are ignored when ranking.
const MIN_TERM_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Memory store backed by SQLite. Search is keyword overlap, newest first
/// on ties.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// Open or create the memory database at the given path.
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        let conn = Connection::open(path).map_err(|e| MemoryError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory().map_err(|e| MemoryError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, MemoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id, created_at);",
        )
        .map_err(|e| MemoryError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        if entry.user_id.trim().is_empty() {
            return Err(MemoryError::Validation("user_id must not be empty".into()));
        }
        let conn = self.conn.lock().map_err(|e| MemoryError::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO memories (id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entry.id.to_string(),
                entry.user_id,
                serde_json::to_string(&entry.role).unwrap_or_default(),
                entry.content,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| MemoryError::Database(e.to_string()))?;
        Ok(())
    }

    /// Entries sharing at least one query word, best overlap first. A query
    /// without usable words returns the most recent entries.
    pub fn find(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let terms = terms(query);
        let mut entries = self.entries_for(user_id)?;

        if !terms.is_empty() {
            let mut scored: Vec<(usize, MemoryEntry)> = entries
                .into_iter()
                .map(|e| {
                    let content = e.content.to_lowercase();
                    (terms.iter().filter(|t| content.contains(t.as_str())).count(), e)
                })
                .filter(|(score, _)| *score > 0)
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
            entries = scored.into_iter().map(|(_, e)| e).collect();
        }

        entries.truncate(limit);
        Ok(entries)
    }

    /// All entries of one user, newest first.
    pub fn entries_for(&self, user_id: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let conn = self.conn.lock().map_err(|e| MemoryError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, role, content, created_at FROM memories
                 WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| MemoryError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| MemoryError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, user_id, role, content, created_at) =
                row.map_err(|e| MemoryError::Database(e.to_string()))?;
            entries.push(MemoryEntry {
                id: id
                    .parse()
                    .map_err(|e: uuid::Error| MemoryError::Database(format!("id: {e}")))?,
                user_id,
                role: serde_json::from_str(&role)
                    .map_err(|e| MemoryError::Database(format!("role: {e}")))?,
                content,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| MemoryError::Database(format!("created_at: {e}")))?,
            });
        }
        Ok(entries)
    }

    /// Delete everything stored for `user_id`; returns the number removed.
    pub fn forget(&self, user_id: &str) -> Result<usize, MemoryError> {
        let conn = self.conn.lock().map_err(|e| MemoryError::Database(e.to_string()))?;
        let removed = conn
            .execute("DELETE FROM memories WHERE user_id = ?1", rusqlite::params![user_id])
            .map_err(|e| MemoryError::Database(e.to_string()))?;
        tracing::info!(user_id, removed, "memories forgotten");
        Ok(removed)
    }
}

fn terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryStoreError> {
        self.find(user_id, query, limit)
            .map_err(|e| MemoryStoreError(e.to_string()))
    }

    async fn add(&self, entry: MemoryEntry) -> Result<(), MemoryStoreError> {
        self.insert(&entry).map_err(|e| MemoryStoreError(e.to_string()))
    }
}
