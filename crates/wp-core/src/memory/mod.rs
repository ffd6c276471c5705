//! Memory collaborator contract — cross-run recall keyed by a user id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::message::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(user_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("memory store error: {0}")]
pub struct MemoryStoreError(pub String);

/// Consistency is the store's concern; callers do one best-effort read.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Entries relevant to `query`, most relevant first.
    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryStoreError>;

    async fn add(&self, entry: MemoryEntry) -> Result<(), MemoryStoreError>;
}
