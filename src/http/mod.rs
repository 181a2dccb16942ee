//! # HTTP Layer
//!
//! Router assembly and shared application state. Route groups mirror the
//! API surface: `/auth` for the login flow, `/api/*` for the JSON API, and
//! static file services for the frontend bundle.

pub mod auth_routes;
pub mod extract;
pub mod pad_routes;
pub mod template_routes;
pub mod user_routes;
pub mod workspace_routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::coder::CoderClient;
use crate::config::AppConfig;
use crate::core::AppResult;
use crate::domain::{PadRepository, TemplateRepository, UserRepository};
use crate::oidc::{JwksVerifier, OidcClient};
use crate::session::SessionManager;

pub use extract::{AdminUser, CurrentUser, MaybeUser};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionManager>,
    pub oidc: Arc<OidcClient>,
    pub verifier: Arc<JwksVerifier>,
    pub coder: Arc<CoderClient>,
    pub users: Arc<dyn UserRepository>,
    pub pads: Arc<dyn PadRepository>,
    pub templates: Arc<dyn TemplateRepository>,
}

/// Liveness probe
async fn healthz() -> &'static str {
    "ok"
}

/// Assemble the full application router
pub fn build_router(state: AppState) -> Router {
    let index = PathBuf::from(&state.config.static_dir).join("index.html");

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .nest("/auth", auth_routes::routes())
        .nest("/api/users", user_routes::routes())
        .nest("/api/workspace", workspace_routes::routes())
        .nest("/api/pad", pad_routes::routes())
        .nest("/api/templates", template_routes::routes())
        .route_service("/", ServeFile::new(&index))
        .nest_service("/static", ServeDir::new(&state.config.static_dir));

    if let Some(assets_dir) = &state.config.assets_dir {
        router = router.nest_service("/assets", ServeDir::new(assets_dir));
    }

    router
        // Unknown paths fall through to the SPA entry point.
        .fallback_service(ServeFile::new(&index))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn serve(state: AppState) -> AppResult<()> {
    let addr = state.config.bind_addr.clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::core::AppError::Internal(format!("bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| crate::core::AppError::Internal(format!("server error: {}", e)))
}
