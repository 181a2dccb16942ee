//! # Template Routes
//!
//! Listing and fetching pad templates; creating new ones is admin-only.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::extract::{AdminUser, CurrentUser};
use super::AppState;
use crate::core::{AppError, AppResult};
use crate::domain::TemplatePad;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/{name}", get(get_template))
}

/// Template listing entry, without the canvas payload
#[derive(Debug, Serialize)]
struct TemplateInfo {
    name: String,
    display_name: String,
}

/// GET /api/templates - all templates
async fn list_templates(
    State(state): State<AppState>,
    _current: CurrentUser,
) -> AppResult<Json<Vec<TemplateInfo>>> {
    let templates = state.templates.list().await?;
    Ok(Json(
        templates
            .into_iter()
            .map(|t| TemplateInfo {
                name: t.name,
                display_name: t.display_name,
            })
            .collect(),
    ))
}

/// GET /api/templates/{name} - one template including its canvas
async fn get_template(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(name): Path<String>,
) -> AppResult<Json<TemplatePad>> {
    let template = state
        .templates
        .get_by_name(&name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("template {}", name)))?;
    Ok(Json(template))
}

#[derive(Debug, Deserialize)]
struct CreateTemplateRequest {
    name: String,
    display_name: String,
    data: serde_json::Value,
}

/// POST /api/templates - register a template (admin only)
async fn create_template(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(request): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplatePad>)> {
    if request.name.trim().is_empty() {
        return Err(AppError::validation("Template name cannot be empty"));
    }
    if state.templates.get_by_name(&request.name).await?.is_some() {
        return Err(AppError::validation(format!(
            "template '{}' already exists",
            request.name
        )));
    }

    let template = TemplatePad::new(request.name, request.display_name, request.data);
    state.templates.insert(&template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}
