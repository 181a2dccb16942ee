//! # Auth Routes
//!
//! The OIDC authorization-code flow. `/login` redirects to the provider,
//! `/callback` exchanges the code and establishes the session, `/logout`
//! tears it down and hands the frontend the provider end-session URL.
//!
//! Coder provisioning on the callback is best-effort: login succeeds even
//! when the workspace backend is unreachable.

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{AppendHeaders, Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::extract::{
    clear_pkce_cookie, clear_session_cookie, cookie_value, pkce_cookie, session_cookie,
    MaybeUser, PKCE_COOKIE, SESSION_COOKIE,
};
use super::AppState;
use crate::coder::client::coder_username;
use crate::core::{AppError, AppResult};
use crate::domain::ensure_user_from_claims;
use crate::oidc::{Claims, PkcePair};
use crate::session::new_session_id;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .route("/status", get(status))
        .route("/refresh", post(refresh))
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    popup: Option<String>,
    kc_idp_hint: Option<String>,
}

/// GET /auth/login - start the authorization-code flow
async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> AppResult<Response> {
    let session_id = new_session_id();
    let login_state = if query.popup.as_deref() == Some("1") {
        "popup"
    } else {
        "default"
    };

    let pkce = PkcePair::generate();
    let url = state
        .oidc
        .authorization_url(login_state, query.kc_idp_hint.as_deref(), &pkce)
        .await?;

    let secure = state.config.cookies_secure();
    let cookies = AppendHeaders([
        (header::SET_COOKIE, session_cookie(&session_id, secure)),
        (header::SET_COOKIE, pkce_cookie(&pkce.verifier, secure)),
    ]);

    Ok((cookies, Redirect::to(&url)).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    #[serde(default)]
    state: Option<String>,
}

/// GET /auth/callback - finish the flow and establish the session
async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    let session_id = cookie_value(&headers, SESSION_COOKIE)
        .ok_or_else(|| AppError::validation("No session"))?;
    let pkce_verifier = cookie_value(&headers, PKCE_COOKIE)
        .ok_or_else(|| AppError::validation("Missing login verifier"))?;

    let tokens = state.oidc.exchange_code(&query.code, &pkce_verifier).await?;

    // The access token must verify before any claim is trusted.
    let claims = state.verifier.verify(&tokens.access_token).await?;

    state.sessions.create(&session_id, tokens).await?;
    ensure_user_from_claims(state.users.as_ref(), &claims).await?;
    provision_coder(&state, &claims).await;

    let secure = state.config.cookies_secure();
    let cookies = AppendHeaders([(header::SET_COOKIE, clear_pkce_cookie(secure))]);

    if query.state.as_deref() == Some("popup") {
        Ok((cookies, popup_close_page(&state).await).into_response())
    } else {
        Ok((cookies, Redirect::to("/")).into_response())
    }
}

/// Ensure the Coder user and workspace exist. Failures are logged and
/// swallowed: the pad itself works without a workspace.
async fn provision_coder(state: &AppState, claims: &Claims) {
    let result = async {
        let (user, _) = state.coder.ensure_user_exists(claims).await?;
        state.coder.ensure_workspace_exists(&user.username).await
    }
    .await;

    if let Err(e) = result {
        tracing::error!(
            username = %coder_username(&claims.preferred_username, &claims.sub),
            error = %e,
            "coder provisioning failed during login"
        );
    }
}

/// The tiny page a popup login renders to close itself
async fn popup_close_page(state: &AppState) -> Html<String> {
    let path = PathBuf::from(&state.config.static_dir).join("auth/popup-close.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Html(body),
        Err(_) => Html("<!doctype html><script>window.close()</script>".to_string()),
    }
}

/// GET /auth/logout - delete the session and return the provider logout URL
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let Some(session_id) = cookie_value(&headers, SESSION_COOKIE) else {
        return Ok(Redirect::to("/").into_response());
    };

    let Some(record) = state.sessions.destroy(&session_id).await? else {
        return Ok(Redirect::to("/").into_response());
    };

    let id_token = record.tokens.id_token.unwrap_or_default();
    let logout_url = state
        .oidc
        .end_session_url(&id_token, &state.config.public_url)
        .await?
        .unwrap_or_else(|| state.config.public_url.clone());

    let secure = state.config.cookies_secure();
    let cookies = AppendHeaders([(header::SET_COOKIE, clear_session_cookie(secure))]);
    let body = Json(serde_json::json!({
        "status": "success",
        "logout_url": logout_url,
    }));

    Ok((cookies, body).into_response())
}

/// GET /auth/status - session introspection that never errors
async fn status(MaybeUser(user): MaybeUser) -> Json<serde_json::Value> {
    match user {
        None => Json(serde_json::json!({
            "authenticated": false,
            "message": "Not authenticated",
        })),
        Some(current) => {
            let expires_in = current.claims.expires_in(chrono::Utc::now().timestamp());
            Json(serde_json::json!({
                "authenticated": true,
                "user": {
                    "id": current.user_id(),
                    "username": current.claims.preferred_username,
                    "email": current.claims.email,
                    "name": current.claims.name,
                },
                "expires_in": expires_in,
            }))
        }
    }
}

/// POST /auth/refresh - force a token refresh
async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<serde_json::Value>> {
    let session_id = cookie_value(&headers, SESSION_COOKIE).ok_or(AppError::AuthRequired)?;

    let record = state.sessions.force_refresh(&session_id).await?;

    Ok(Json(serde_json::json!({
        "expires_in": record.tokens.expires_in,
        "authenticated": true,
    })))
}
