//! # Pad Routes
//!
//! Pad CRUD and sharing. Reads require access under the pad's sharing
//! policy; canvas writes require access too (collaborators edit shared
//! pads); renames, sharing changes, and deletion are owner-only.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::extract::CurrentUser;
use super::AppState;
use crate::core::{AppError, AppResult};
use crate::domain::{Pad, SharingPolicy};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_pad))
        .route("/{id}", get(get_pad).put(update_canvas).patch(update_meta).delete(delete_pad))
        .route("/{id}/share", post(share_pad))
        .route("/{id}/share/{user_id}", delete(unshare_pad))
}

/// Blank canvas payload for pads created without a template
fn blank_canvas(display_name: &str) -> serde_json::Value {
    serde_json::json!({
        "elements": [],
        "appState": {"pad": {"displayName": display_name}},
    })
}

/// Fetch a pad and check the caller can read it
async fn load_accessible(
    state: &AppState,
    current: &CurrentUser,
    pad_id: Uuid,
) -> AppResult<Pad> {
    let pad = state
        .pads
        .get(pad_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("pad {}", pad_id)))?;

    if !pad.can_access(current.user_id()) {
        return Err(AppError::access_denied("Not authorized to access this pad"));
    }
    Ok(pad)
}

/// Fetch a pad and check the caller owns it
async fn load_owned(state: &AppState, current: &CurrentUser, pad_id: Uuid) -> AppResult<Pad> {
    let pad = load_accessible(state, current, pad_id).await?;
    if pad.owner_id != current.user_id() {
        return Err(AppError::access_denied(
            "Only the pad owner can perform this operation",
        ));
    }
    Ok(pad)
}

#[derive(Debug, Deserialize)]
struct CreatePadRequest {
    #[serde(default)]
    display_name: Option<String>,
    /// Template name to seed the canvas from
    #[serde(default)]
    template: Option<String>,
}

/// POST /api/pad - create a pad, blank or from a template
async fn create_pad(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<CreatePadRequest>,
) -> AppResult<(StatusCode, Json<Pad>)> {
    let (display_name, data) = match request.template.as_deref() {
        Some(template_name) => {
            let template = state
                .templates
                .get_by_name(template_name)
                .await?
                .ok_or_else(|| {
                    AppError::not_found(format!("template {}", template_name))
                })?;
            (
                request.display_name.unwrap_or(template.display_name),
                template.data,
            )
        }
        None => {
            let name = request.display_name.unwrap_or_else(|| "Untitled".to_string());
            let data = blank_canvas(&name);
            (name, data)
        }
    };

    let user_id = current.user_id();
    let pad = Pad::new(user_id, display_name, data);
    state.pads.insert(&pad).await?;
    state.users.add_open_pad(user_id, pad.id).await?;

    Ok((StatusCode::CREATED, Json(pad)))
}

/// GET /api/pad/{id} - full pad including canvas data
async fn get_pad(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(pad_id): Path<Uuid>,
) -> AppResult<Json<Pad>> {
    let pad = load_accessible(&state, &current, pad_id).await?;
    Ok(Json(pad))
}

/// PUT /api/pad/{id} - replace the canvas payload
async fn update_canvas(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(pad_id): Path<Uuid>,
    Json(data): Json<serde_json::Value>,
) -> AppResult<Json<Pad>> {
    let mut pad = load_accessible(&state, &current, pad_id).await?;
    pad.data = data;
    pad.updated_at = chrono::Utc::now();
    state.pads.update(&pad).await?;
    Ok(Json(pad))
}

#[derive(Debug, Deserialize)]
struct UpdateMetaRequest {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    sharing: Option<SharingPolicy>,
}

/// PATCH /api/pad/{id} - rename or change the sharing policy (owner only)
async fn update_meta(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(pad_id): Path<Uuid>,
    Json(request): Json<UpdateMetaRequest>,
) -> AppResult<Json<Pad>> {
    let mut pad = load_owned(&state, &current, pad_id).await?;

    if let Some(display_name) = request.display_name {
        if display_name.trim().is_empty() {
            return Err(AppError::validation("Display name cannot be empty"));
        }
        pad.display_name = display_name;
    }
    if let Some(sharing) = request.sharing {
        pad.sharing = sharing;
    }
    pad.updated_at = chrono::Utc::now();

    state.pads.update(&pad).await?;
    Ok(Json(pad))
}

/// DELETE /api/pad/{id} - delete a pad (owner only)
async fn delete_pad(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(pad_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let pad = load_owned(&state, &current, pad_id).await?;

    state.pads.delete(pad.id).await?;
    state.users.remove_open_pad(current.user_id(), pad.id).await?;

    // Clear a dangling last-selected pointer.
    if let Some(user) = state.users.get(current.user_id()).await? {
        if user.last_selected_pad == Some(pad.id) {
            state
                .users
                .set_last_selected_pad(current.user_id(), None)
                .await?;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ShareRequest {
    user_id: Uuid,
}

/// POST /api/pad/{id}/share - add a user to the whitelist (owner only)
async fn share_pad(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(pad_id): Path<Uuid>,
    Json(request): Json<ShareRequest>,
) -> AppResult<Json<Pad>> {
    let mut pad = load_owned(&state, &current, pad_id).await?;

    if request.user_id == pad.owner_id {
        return Err(AppError::validation("Cannot share a pad with its owner"));
    }

    pad.share_with(request.user_id);
    state.pads.update(&pad).await?;
    Ok(Json(pad))
}

/// DELETE /api/pad/{id}/share/{user_id} - remove a user from the whitelist
async fn unshare_pad(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((pad_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Pad>> {
    let mut pad = load_owned(&state, &current, pad_id).await?;
    pad.unshare(user_id);
    state.pads.update(&pad).await?;
    Ok(Json(pad))
}
