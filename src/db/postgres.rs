//! # Postgres Repositories
//!
//! sqlx-backed implementations of the domain repository traits. Row structs
//! stay here; the domain types never derive database traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::{AppError, AppResult};
use crate::domain::pad::{Pad, PadRepository, PadSummary, SharingPolicy};
use crate::domain::template::{TemplatePad, TemplateRepository};
use crate::domain::user::{User, UserRepository};

/// Open a connection pool against the configured DSN
pub async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .map_err(AppError::from)
}

fn sharing_to_str(policy: SharingPolicy) -> &'static str {
    match policy {
        SharingPolicy::Private => "private",
        SharingPolicy::Whitelist => "whitelist",
        SharingPolicy::Public => "public",
    }
}

fn sharing_from_str(raw: &str) -> SharingPolicy {
    match raw {
        "whitelist" => SharingPolicy::Whitelist,
        "public" => SharingPolicy::Public,
        _ => SharingPolicy::Private,
    }
}

// ==================
// Users
// ==================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    email_verified: bool,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    roles: Vec<String>,
    last_selected_pad: Option<Uuid>,
    open_pads: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            email_verified: row.email_verified,
            name: row.name,
            given_name: row.given_name,
            family_name: row.family_name,
            roles: row.roles,
            last_selected_pad: row.last_selected_pad,
            open_pads: row.open_pads,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Postgres-backed user repository
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn insert(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users \
             (id, username, email, email_verified, name, given_name, family_name, \
              roles, last_selected_pad, open_pads, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.name)
        .bind(&user.given_name)
        .bind(&user.family_name)
        .bind(&user.roles)
        .bind(user.last_selected_pad)
        .bind(&user.open_pads)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, user: &User) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET \
             username = $2, email = $3, email_verified = $4, name = $5, \
             given_name = $6, family_name = $7, roles = $8, \
             last_selected_pad = $9, open_pads = $10, updated_at = now() \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.name)
        .bind(&user.given_name)
        .bind(&user.family_name)
        .bind(&user.roles)
        .bind(user.last_selected_pad)
        .bind(&user.open_pads)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn set_last_selected_pad(&self, user_id: Uuid, pad_id: Option<Uuid>) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE users SET last_selected_pad = $2, updated_at = now() WHERE id = $1")
                .bind(user_id)
                .bind(pad_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn add_open_pad(&self, user_id: Uuid, pad_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET \
             open_pads = CASE WHEN open_pads @> ARRAY[$2]::uuid[] THEN open_pads \
                              ELSE array_append(open_pads, $2) END, \
             updated_at = now() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(pad_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn remove_open_pad(&self, user_id: Uuid, pad_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET open_pads = array_remove(open_pads, $2), updated_at = now() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(pad_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user {}", user_id)));
        }
        Ok(())
    }
}

// ==================
// Pads
// ==================

#[derive(sqlx::FromRow)]
struct PadRow {
    id: Uuid,
    owner_id: Uuid,
    display_name: String,
    data: serde_json::Value,
    sharing: String,
    shared_with: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PadRow> for Pad {
    fn from(row: PadRow) -> Self {
        Pad {
            id: row.id,
            owner_id: row.owner_id,
            display_name: row.display_name,
            data: row.data,
            sharing: sharing_from_str(&row.sharing),
            shared_with: row.shared_with,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PadSummaryRow {
    id: Uuid,
    owner_id: Uuid,
    display_name: String,
    sharing: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Postgres-backed pad repository
pub struct PgPadRepository {
    pool: PgPool,
}

impl PgPadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PadRepository for PgPadRepository {
    async fn get(&self, pad_id: Uuid) -> AppResult<Option<Pad>> {
        let row = sqlx::query_as::<_, PadRow>("SELECT * FROM pads WHERE id = $1")
            .bind(pad_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Pad::from))
    }

    async fn insert(&self, pad: &Pad) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO pads \
             (id, owner_id, display_name, data, sharing, shared_with, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(pad.id)
        .bind(pad.owner_id)
        .bind(&pad.display_name)
        .bind(&pad.data)
        .bind(sharing_to_str(pad.sharing))
        .bind(&pad.shared_with)
        .bind(pad.created_at)
        .bind(pad.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, pad: &Pad) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE pads SET \
             display_name = $2, data = $3, sharing = $4, shared_with = $5, updated_at = now() \
             WHERE id = $1",
        )
        .bind(pad.id)
        .bind(&pad.display_name)
        .bind(&pad.data)
        .bind(sharing_to_str(pad.sharing))
        .bind(&pad.shared_with)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("pad {}", pad.id)));
        }
        Ok(())
    }

    async fn delete(&self, pad_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM pads WHERE id = $1")
            .bind(pad_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<PadSummary>> {
        let rows = sqlx::query_as::<_, PadSummaryRow>(
            "SELECT id, owner_id, display_name, sharing, created_at, updated_at \
             FROM pads WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PadSummary {
                id: row.id,
                owner_id: row.owner_id,
                display_name: row.display_name,
                sharing: sharing_from_str(&row.sharing),
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect())
    }
}

// ==================
// Templates
// ==================

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    display_name: String,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<TemplateRow> for TemplatePad {
    fn from(row: TemplateRow) -> Self {
        TemplatePad {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            data: row.data,
            created_at: row.created_at,
        }
    }
}

/// Postgres-backed template repository
pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn get_by_name(&self, name: &str) -> AppResult<Option<TemplatePad>> {
        let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM template_pads WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TemplatePad::from))
    }

    async fn insert(&self, template: &TemplatePad) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO template_pads (id, name, display_name, data, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.display_name)
        .bind(&template.data)
        .bind(template.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> AppResult<Vec<TemplatePad>> {
        let rows =
            sqlx::query_as::<_, TemplateRow>("SELECT * FROM template_pads ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(TemplatePad::from).collect())
    }
}
