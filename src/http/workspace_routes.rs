//! # Workspace Routes
//!
//! Thin proxy over the Coder workspace of the authenticated user. The
//! workspace is named after the Coder username, which is derived from the
//! token claims the same way provisioning derives it.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::extract::CurrentUser;
use super::AppState;
use crate::coder::client::coder_username;
use crate::coder::{CoderClient, CoderError, WorkspaceState};
use crate::core::{AppError, AppResult};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/state", get(state_handler))
        .route("/start", post(start))
        .route("/stop", post(stop))
}

#[derive(Debug, Serialize)]
struct StateResponse {
    state: WorkspaceState,
}

fn username_of(current: &CurrentUser) -> String {
    coder_username(&current.claims.preferred_username, &current.claims.sub)
}

/// GET /api/workspace/state - current workspace state
async fn state_handler(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<StateResponse>> {
    let username = username_of(&current);
    let workspace_state = state.coder.workspace_state(&username).await?;
    Ok(Json(StateResponse {
        state: workspace_state,
    }))
}

/// POST /api/workspace/start - queue a start build
///
/// Idempotent: a workspace that is already running or starting is reported
/// as-is instead of erroring.
async fn start(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<StateResponse>> {
    let username = username_of(&current);
    let workspace = state
        .coder
        .get_workspace(&username, &username)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found(format!("workspace {}", username)))?;

    if CoderClient::is_running_or_starting(workspace.latest_build.status) {
        return Ok(Json(StateResponse {
            state: WorkspaceState::from(workspace.latest_build.status),
        }));
    }

    let build = match state.coder.start_workspace(workspace.id).await {
        Ok(build) => build,
        // A concurrent start is fine; report the pending state.
        Err(CoderError::Conflict(_)) => {
            return Ok(Json(StateResponse {
                state: WorkspaceState::Pending,
            }))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(StateResponse {
        state: WorkspaceState::from(build.status),
    }))
}

/// POST /api/workspace/stop - queue a stop build
async fn stop(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<StateResponse>> {
    let username = username_of(&current);
    let workspace = state
        .coder
        .get_workspace(&username, &username)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found(format!("workspace {}", username)))?;

    let build = match state.coder.stop_workspace(workspace.id).await {
        Ok(build) => build,
        Err(CoderError::Conflict(_)) => {
            return Ok(Json(StateResponse {
                state: WorkspaceState::from(workspace.latest_build.status),
            }))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(StateResponse {
        state: WorkspaceState::from(build.status),
    }))
}
