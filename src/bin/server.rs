//! padws server binary.
//!
//! Startup order matters: database first, then migrations behind the Redis
//! lock (all replicas wait for the winner), then template seeding, then the
//! listener.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use padws::coder::CoderClient;
use padws::config::{format_config_errors, AppConfig};
use padws::core::AppResult;
use padws::db;
use padws::domain::load_templates_from_dir;
use padws::http::{self, AppState};
use padws::observability::AuthEventLog;
use padws::oidc::{DiscoveryCache, JwksVerifier, OidcClient};
use padws::session::{RedisSessionStore, SessionManager};

#[derive(Parser)]
#[command(name = "padws-server", about = "Self-hostable collaborative pad server")]
struct Args {
    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Override the listen address from PADWS_BIND_ADDR
    #[arg(long)]
    bind: Option<String>,

    /// Directory of built-in template JSON files
    #[arg(long, default_value = "templates")]
    templates_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            if let Err(e) = dotenvy::from_path(path) {
                eprintln!("Failed to load env file {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "padws=info,tower_http=info".into()),
        )
        .init();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(errors) => {
            eprintln!("Configuration errors:\n{}", format_config_errors(&errors));
            std::process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    if let Err(e) = run(config, &args.templates_dir).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig, templates_dir: &std::path::Path) -> AppResult<()> {
    let http_client = reqwest::Client::new();

    let discovery = Arc::new(DiscoveryCache::new(
        http_client.clone(),
        config.oidc_discovery_url.clone(),
    ));
    let oidc = Arc::new(OidcClient::new(
        http_client.clone(),
        discovery.clone(),
        config.oidc_client_id.clone(),
        config.oidc_client_secret.clone(),
        config.redirect_uri.clone(),
    ));
    let verifier = Arc::new(JwksVerifier::new(
        http_client.clone(),
        discovery,
        config.oidc_client_id.clone(),
    ));

    let pool = db::connect_pool(&config.database_url).await?;
    tracing::info!("database connection established");

    // Migration failure is survivable: the schema may already be current
    // from a previous deploy, and the lock holder may still be working.
    match db::run_migrations_with_lock(
        &pool,
        &config.redis_url,
        Duration::from_secs(120),
        Duration::from_secs(300),
    )
    .await
    {
        Ok(true) => {}
        Ok(false) => tracing::warn!("migrations timed out, proceeding with caution"),
        Err(e) => tracing::warn!(error = %e, "migrations failed, proceeding with caution"),
    }

    let session_store = Arc::new(RedisSessionStore::connect(&config.redis_url).await?);
    session_store.ping().await?;
    tracing::info!("redis connection established");

    let users = Arc::new(db::PgUserRepository::new(pool.clone()));
    let pads = Arc::new(db::PgPadRepository::new(pool.clone()));
    let templates = Arc::new(db::PgTemplateRepository::new(pool));

    let added = load_templates_from_dir(templates.as_ref(), templates_dir).await?;
    tracing::info!(added, "templates loaded");

    let sessions = Arc::new(SessionManager::new(
        session_store,
        oidc.clone(),
        Arc::new(AuthEventLog::default()),
        Duration::from_secs(config.session_ttl_secs),
    ));

    let coder = Arc::new(CoderClient::new(
        http_client,
        config.coder_url.clone(),
        config.coder_api_key.clone(),
        config.coder_template_id.clone(),
        config.coder_organization.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        sessions,
        oidc,
        verifier,
        coder,
        users,
        pads,
        templates,
    };

    http::serve(state).await
}
