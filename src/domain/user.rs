//! # User Model
//!
//! Users mirror the identity provider: rows are created on first login from
//! verified token claims and keyed by a deterministic UUID derived from the
//! OIDC subject, so the same subject always maps to the same row even when
//! the provider's `sub` is not itself a UUID.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{AppError, AppResult};
use crate::oidc::Claims;

/// Namespace for deriving user ids from OIDC subjects (UUIDv5)
const USER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6e_5f_21_9b_4d_0a_44_c8_8f_1e_2b_7a_90_33_51_c4);

/// Deterministic user id for an OIDC subject
pub fn user_id_for_sub(sub: &str) -> Uuid {
    Uuid::new_v5(&USER_ID_NAMESPACE, sub.as_bytes())
}

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub roles: Vec<String>,
    pub last_selected_pad: Option<Uuid>,
    pub open_pads: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a user row from verified token claims
    pub fn from_claims(claims: &Claims) -> Self {
        let now = Utc::now();
        Self {
            id: user_id_for_sub(&claims.sub),
            username: claims.preferred_username.clone(),
            email: claims.email.clone(),
            email_verified: claims.email_verified,
            name: claims.name.clone(),
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            roles: claims.roles().to_vec(),
            last_selected_pad: None,
            open_pads: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// User persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetch a user by id
    async fn get(&self, user_id: Uuid) -> AppResult<Option<User>>;

    /// Insert a new user; errors if the id already exists
    async fn insert(&self, user: &User) -> AppResult<()>;

    /// Replace an existing user row
    async fn update(&self, user: &User) -> AppResult<()>;

    /// Record the pad last selected by the user
    async fn set_last_selected_pad(&self, user_id: Uuid, pad_id: Option<Uuid>) -> AppResult<()>;

    /// Add a pad to the user's open list (idempotent)
    async fn add_open_pad(&self, user_id: Uuid, pad_id: Uuid) -> AppResult<()>;

    /// Remove a pad from the user's open list
    async fn remove_open_pad(&self, user_id: Uuid, pad_id: Uuid) -> AppResult<()>;
}

/// Ensure a user row exists for the given claims, creating it on first
/// login. A duplicate-key race with another replica resolves by re-reading.
pub async fn ensure_user_from_claims(
    repo: &dyn UserRepository,
    claims: &Claims,
) -> AppResult<User> {
    let user_id = user_id_for_sub(&claims.sub);

    if let Some(user) = repo.get(user_id).await? {
        return Ok(user);
    }

    let user = User::from_claims(claims);
    match repo.insert(&user).await {
        Ok(()) => {
            tracing::info!(user_id = %user.id, username = %user.username, "created user");
            Ok(user)
        }
        Err(AppError::Database(_)) | Err(AppError::Validation(_)) => repo
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::internal("user insert race left no row")),
        Err(e) => Err(e),
    }
}

// ==================
// In-Memory Repository
// ==================

/// In-memory user repository for tests
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().unwrap().get(&user_id).cloned())
    }

    async fn insert(&self, user: &User) -> AppResult<()> {
        let mut users = self.users.write().unwrap();
        if users.contains_key(&user.id) {
            return Err(AppError::Database(format!(
                "duplicate key: user {}",
                user.id
            )));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> AppResult<()> {
        let mut users = self.users.write().unwrap();
        match users.get_mut(&user.id) {
            Some(slot) => {
                *slot = User {
                    updated_at: Utc::now(),
                    ..user.clone()
                };
                Ok(())
            }
            None => Err(AppError::not_found(format!("user {}", user.id))),
        }
    }

    async fn set_last_selected_pad(&self, user_id: Uuid, pad_id: Option<Uuid>) -> AppResult<()> {
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found(format!("user {}", user_id)))?;
        user.last_selected_pad = pad_id;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn add_open_pad(&self, user_id: Uuid, pad_id: Uuid) -> AppResult<()> {
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found(format!("user {}", user_id)))?;
        if !user.open_pads.contains(&pad_id) {
            user.open_pads.push(pad_id);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove_open_pad(&self, user_id: Uuid, pad_id: Uuid) -> AppResult<()> {
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found(format!("user {}", user_id)))?;
        user.open_pads.retain(|p| *p != pad_id);
        user.updated_at = Utc::now();
        Ok(())
    }
}
