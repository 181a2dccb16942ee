//! # Pad Model
//!
//! A pad is one canvas document: owner, display name, the canvas payload
//! (opaque JSON as produced by the frontend), and a sharing policy that
//! gates non-owner access.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::AppResult;

/// Who may read a pad besides its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingPolicy {
    /// Owner only
    Private,
    /// Owner plus the users in `shared_with`
    Whitelist,
    /// Any authenticated user
    Public,
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self::Private
    }
}

/// A canvas document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pad {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    /// Canvas payload; the server treats it as opaque JSON
    pub data: serde_json::Value,
    pub sharing: SharingPolicy,
    pub shared_with: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pad {
    /// Create a new pad owned by `owner_id`
    pub fn new(owner_id: Uuid, display_name: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            display_name: display_name.into(),
            data,
            sharing: SharingPolicy::Private,
            shared_with: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `user_id` may read this pad
    pub fn can_access(&self, user_id: Uuid) -> bool {
        if self.owner_id == user_id {
            return true;
        }
        match self.sharing {
            SharingPolicy::Private => false,
            SharingPolicy::Public => true,
            SharingPolicy::Whitelist => self.shared_with.contains(&user_id),
        }
    }

    /// Add a user to the whitelist, switching the policy if needed
    pub fn share_with(&mut self, user_id: Uuid) {
        if self.sharing == SharingPolicy::Private {
            self.sharing = SharingPolicy::Whitelist;
        }
        if !self.shared_with.contains(&user_id) {
            self.shared_with.push(user_id);
        }
        self.updated_at = Utc::now();
    }

    /// Remove a user from the whitelist
    pub fn unshare(&mut self, user_id: Uuid) {
        self.shared_with.retain(|u| *u != user_id);
        self.updated_at = Utc::now();
    }

    /// Metadata view without the canvas payload
    pub fn summary(&self) -> PadSummary {
        PadSummary {
            id: self.id,
            owner_id: self.owner_id,
            display_name: self.display_name.clone(),
            sharing: self.sharing,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Pad metadata without the (potentially large) canvas payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PadSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub sharing: SharingPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pad persistence
#[async_trait]
pub trait PadRepository: Send + Sync {
    /// Fetch a pad by id
    async fn get(&self, pad_id: Uuid) -> AppResult<Option<Pad>>;

    /// Insert a new pad
    async fn insert(&self, pad: &Pad) -> AppResult<()>;

    /// Replace an existing pad row
    async fn update(&self, pad: &Pad) -> AppResult<()>;

    /// Delete a pad; returns whether it existed
    async fn delete(&self, pad_id: Uuid) -> AppResult<bool>;

    /// Metadata of pads owned by a user, newest first
    async fn list_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<PadSummary>>;
}

// ==================
// In-Memory Repository
// ==================

/// In-memory pad repository for tests
pub struct InMemoryPadRepository {
    pads: RwLock<HashMap<Uuid, Pad>>,
}

impl InMemoryPadRepository {
    pub fn new() -> Self {
        Self {
            pads: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPadRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PadRepository for InMemoryPadRepository {
    async fn get(&self, pad_id: Uuid) -> AppResult<Option<Pad>> {
        Ok(self.pads.read().unwrap().get(&pad_id).cloned())
    }

    async fn insert(&self, pad: &Pad) -> AppResult<()> {
        self.pads.write().unwrap().insert(pad.id, pad.clone());
        Ok(())
    }

    async fn update(&self, pad: &Pad) -> AppResult<()> {
        let mut pads = self.pads.write().unwrap();
        pads.insert(pad.id, pad.clone());
        Ok(())
    }

    async fn delete(&self, pad_id: Uuid) -> AppResult<bool> {
        Ok(self.pads.write().unwrap().remove(&pad_id).is_some())
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<PadSummary>> {
        let pads = self.pads.read().unwrap();
        let mut summaries: Vec<PadSummary> = pads
            .values()
            .filter(|p| p.owner_id == owner_id)
            .map(Pad::summary)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}
