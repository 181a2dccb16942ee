//! # Coder API Types
//!
//! Wire models for the subset of the Coder v2 API the server consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Coder user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub organization_ids: Vec<Uuid>,
}

/// Request body for user creation
#[derive(Debug, Clone, Serialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub password: String,
    pub login_type: String,
    pub organization_ids: Vec<String>,
}

/// Status of a workspace build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Canceling,
    Canceled,
    Deleting,
    Deleted,
}

impl BuildStatus {
    /// Returns string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Starting => "starting",
            BuildStatus::Running => "running",
            BuildStatus::Stopping => "stopping",
            BuildStatus::Stopped => "stopped",
            BuildStatus::Failed => "failed",
            BuildStatus::Canceling => "canceling",
            BuildStatus::Canceled => "canceled",
            BuildStatus::Deleting => "deleting",
            BuildStatus::Deleted => "deleted",
        }
    }
}

/// A workspace build (the unit Coder transitions between states)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceBuild {
    pub id: Uuid,
    pub status: BuildStatus,
    #[serde(default)]
    pub transition: Option<String>,
}

/// A Coder workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    pub template_id: Uuid,
    pub latest_build: WorkspaceBuild,
}

/// Request body for workspace creation
#[derive(Debug, Clone, Serialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub template_id: String,
}

/// Request body for build transitions
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRequest {
    pub transition: String,
}

/// Coder error body (`{"message": ..., "detail": ...}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Workspace state as surfaced by this server's API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceState {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Deleting,
}

impl From<BuildStatus> for WorkspaceState {
    fn from(status: BuildStatus) -> Self {
        match status {
            BuildStatus::Pending => WorkspaceState::Pending,
            BuildStatus::Starting => WorkspaceState::Starting,
            BuildStatus::Running => WorkspaceState::Running,
            BuildStatus::Stopping => WorkspaceState::Stopping,
            BuildStatus::Stopped | BuildStatus::Canceled => WorkspaceState::Stopped,
            BuildStatus::Failed | BuildStatus::Canceling => WorkspaceState::Failed,
            BuildStatus::Deleting | BuildStatus::Deleted => WorkspaceState::Deleting,
        }
    }
}
