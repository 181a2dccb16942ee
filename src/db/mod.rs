//! # Persistence
//!
//! Postgres-backed repository implementations and the startup migration
//! runner. The repository traits themselves live in `crate::domain`.

pub mod migrate;
pub mod postgres;

pub use migrate::run_migrations_with_lock;
pub use postgres::{
    connect_pool, PgPadRepository, PgTemplateRepository, PgUserRepository,
};
