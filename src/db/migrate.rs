//! # Migration Runner
//!
//! Schema migrations are embedded in the binary and executed at startup.
//! With multiple replicas racing, a Redis lock elects one migrator; the
//! others wait for the lock to clear before serving traffic.

use std::time::Duration;

use sqlx::PgPool;

use crate::core::{AppError, AppResult};

/// Embedded migrations from the `migrations/` directory
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Redis key used as the migration lock
const LOCK_KEY: &str = "padws:migrations:lock";

/// Poll interval for replicas waiting on the lock holder
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run migrations, coordinating replicas through a Redis lock
///
/// Returns `true` when migrations are known to have completed (either by
/// this process or by the lock holder releasing), `false` when the wait
/// timed out.
pub async fn run_migrations_with_lock(
    pool: &PgPool,
    redis_url: &str,
    lock_timeout: Duration,
    max_wait: Duration,
) -> AppResult<bool> {
    let client = redis::Client::open(redis_url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;

    let acquired: Option<String> = redis::cmd("SET")
        .arg(LOCK_KEY)
        .arg("1")
        .arg("NX")
        .arg("EX")
        .arg(lock_timeout.as_secs().max(1))
        .query_async(&mut conn)
        .await?;

    if acquired.is_some() {
        tracing::info!("acquired migration lock, running migrations");
        let result = MIGRATOR
            .run(pool)
            .await
            .map_err(|e| AppError::Database(format!("migration failed: {}", e)));

        // Release the lock regardless of outcome so waiters stop polling.
        let _: i64 = redis::cmd("DEL")
            .arg(LOCK_KEY)
            .query_async(&mut conn)
            .await
            .unwrap_or(0);

        result?;
        tracing::info!("migrations complete");
        return Ok(true);
    }

    tracing::info!("another replica holds the migration lock, waiting");
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let held: bool = redis::cmd("EXISTS")
            .arg(LOCK_KEY)
            .query_async::<i64>(&mut conn)
            .await?
            > 0;
        if !held {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("timed out waiting for migration lock holder");
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_embedded() {
        assert!(!MIGRATOR.migrations.is_empty());
        assert!(MIGRATOR
            .migrations
            .iter()
            .any(|m| m.description.contains("init")));
    }
}
