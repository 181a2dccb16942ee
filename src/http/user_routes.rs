//! # User Routes
//!
//! The authenticated user's own profile, pad listing, and pad selection.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use super::extract::CurrentUser;
use super::AppState;
use crate::core::{AppError, AppResult};
use crate::domain::{ensure_user_from_claims, PadSummary, User};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/me/pads", get(my_pads))
        .route("/me/last-selected/{pad_id}", post(select_pad))
}

/// GET /api/users/me - the caller's profile row
///
/// The row is created on demand: a valid session implies the user went
/// through the callback, but a fresh database (or a replica race) may not
/// have the row yet.
async fn me(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<User>> {
    let user = ensure_user_from_claims(state.users.as_ref(), &current.claims).await?;
    Ok(Json(user))
}

/// GET /api/users/me/pads - metadata of the caller's pads, newest first
async fn my_pads(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<PadSummary>>> {
    let summaries = state.pads.list_by_owner(current.user_id()).await?;
    Ok(Json(summaries))
}

/// POST /api/users/me/last-selected/{pad_id} - remember the active pad
async fn select_pad(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(pad_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let pad = state
        .pads
        .get(pad_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("pad {}", pad_id)))?;

    if !pad.can_access(current.user_id()) {
        return Err(AppError::access_denied("Not authorized to access this pad"));
    }

    state
        .users
        .set_last_selected_pad(current.user_id(), Some(pad_id))
        .await?;

    Ok(Json(serde_json::json!({"status": "ok", "pad_id": pad_id})))
}
