//! # Session Store Backends
//!
//! `SessionStore` abstracts over where session records live. Production
//! uses Redis; tests use the in-memory backend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::{AppError, AppResult};
use crate::oidc::TokenSet;

/// Stored session state: the provider token set and when it was issued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub tokens: TokenSet,
    /// Unix timestamp of the moment the token set was obtained
    pub issued_at: i64,
}

impl SessionRecord {
    /// Wrap a freshly obtained token set
    pub fn new(tokens: TokenSet) -> Self {
        Self {
            tokens,
            issued_at: Utc::now().timestamp(),
        }
    }
}

/// Backend-agnostic session persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a record by session id
    async fn get(&self, session_id: &str) -> AppResult<Option<SessionRecord>>;

    /// Store a record with a time-to-live
    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> AppResult<()>;

    /// Delete a record; returns whether it existed
    async fn delete(&self, session_id: &str) -> AppResult<bool>;
}

// ==================
// Redis Backend
// ==================

/// Redis-backed session store
pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisSessionStore {
    /// Key prefix for session records
    pub const DEFAULT_PREFIX: &'static str = "padws:session:";

    /// Connect to Redis and return a store
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: Self::DEFAULT_PREFIX.to_string(),
        })
    }

    /// Verify the connection is alive
    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(AppError::from)
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.prefix, session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> AppResult<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(session_id)).await?;
        match raw {
            None => Ok(None),
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| AppError::Cache(format!("corrupt session record: {}", e)))?;
                Ok(Some(record))
            }
        }
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> AppResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| AppError::Internal(format!("serialize session: {}", e)))?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(session_id), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.key(session_id)).await?;
        Ok(removed > 0)
    }
}

// ==================
// In-Memory Backend
// ==================

/// In-memory session store for tests
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, (SessionRecord, Instant)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> AppResult<Option<SessionRecord>> {
        let entries = self.entries.read().await;
        match entries.get(session_id) {
            Some((record, deadline)) if Instant::now() < *deadline => Ok(Some(record.clone())),
            _ => Ok(None),
        }
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            session_id.to_string(),
            (record.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> AppResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(session_id).is_some())
    }
}
