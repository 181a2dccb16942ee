//! # Coder Integration
//!
//! Client for the Coder REST API (`/api/v2`). On first login the server
//! ensures a Coder user and a workspace (named after the user) exist; the
//! workspace routes proxy start/stop/state.

pub mod client;
pub mod types;

pub use client::{CoderClient, CoderError, RetryPolicy};
pub use types::{
    BuildStatus, CoderUser, CreateUserRequest, CreateWorkspaceRequest, Workspace,
    WorkspaceBuild, WorkspaceState,
};
