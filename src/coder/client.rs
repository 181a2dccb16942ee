//! # Coder Client
//!
//! Thin client over the Coder v2 REST API with bounded retries for
//! transient failures. Authentication uses the deployment-scoped session
//! token from configuration (`Coder-Session-Token` header).

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::types::{
    ApiErrorBody, BuildStatus, CoderUser, CreateUserRequest, CreateWorkspaceRequest,
    TransitionRequest, Workspace, WorkspaceBuild, WorkspaceState,
};
use crate::core::AppError;
use crate::oidc::Claims;

/// Coder API error
#[derive(Debug, thiserror::Error)]
pub enum CoderError {
    /// Request never reached the API (after retries)
    #[error("coder request failed: {0}")]
    Http(String),

    /// API answered with a non-success status
    #[error("coder API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A build is already queued for the workspace
    #[error("workspace build already pending: {0}")]
    Conflict(String),

    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Response body did not match the expected shape
    #[error("coder response decode error: {0}")]
    Decode(String),
}

impl From<CoderError> for AppError {
    fn from(e: CoderError) -> Self {
        match e {
            CoderError::NotFound(what) => AppError::NotFound(what),
            CoderError::Conflict(msg) => AppError::Validation(msg),
            other => AppError::Coder(other.to_string()),
        }
    }
}

/// Retry policy for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: usize,
    /// Base backoff delay, doubled per retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    fn is_transient(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }
}

/// Client for a Coder deployment
pub struct CoderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    template_id: String,
    organization: String,
    retry: RetryPolicy,
}

impl CoderClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        template_id: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            template_id: template_id.into(),
            organization: organization.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.base_url, path)
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, CoderError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let url = self.url(path);
        let mut last_err = None;

        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                let delay = self.retry.base_delay * 2u32.pow(attempt as u32 - 1);
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Coder-Session-Token", &self.api_key);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    // Connect-level failures are worth retrying.
                    last_err = Some(CoderError::Http(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|e| CoderError::Decode(e.to_string()));
            }

            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|b| b.message)
                .unwrap_or_default();

            if RetryPolicy::is_transient(status) {
                last_err = Some(CoderError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }

            return Err(match status {
                StatusCode::NOT_FOUND => CoderError::NotFound(message),
                StatusCode::CONFLICT => CoderError::Conflict(message),
                _ => CoderError::Api {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        Err(last_err.unwrap_or_else(|| CoderError::Http("request never attempted".to_string())))
    }

    // ==================
    // Users
    // ==================

    /// Fetch a user by username, `None` when absent
    pub async fn get_user(&self, username: &str) -> Result<Option<CoderUser>, CoderError> {
        match self
            .request::<CoderUser, ()>(Method::GET, &format!("/users/{}", username), None)
            .await
        {
            Ok(user) => Ok(Some(user)),
            Err(CoderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a user account
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<CoderUser, CoderError> {
        let request = CreateUserRequest {
            email: email.to_string(),
            username: username.to_string(),
            name: name.map(|n| n.to_string()),
            password: generated_password(),
            login_type: "password".to_string(),
            organization_ids: vec![self.organization.clone()],
        };
        self.request(Method::POST, "/users", Some(&request)).await
    }

    /// Ensure a user exists for the given claims; returns whether it was
    /// created. A concurrent-creation conflict is resolved by re-fetching.
    pub async fn ensure_user_exists(
        &self,
        claims: &Claims,
    ) -> Result<(CoderUser, bool), CoderError> {
        let username = coder_username(&claims.preferred_username, &claims.sub);

        if let Some(user) = self.get_user(&username).await? {
            return Ok((user, false));
        }

        match self
            .create_user(&username, &claims.email, claims.name.as_deref())
            .await
        {
            Ok(user) => {
                tracing::info!(username = %user.username, "provisioned coder user");
                Ok((user, true))
            }
            Err(CoderError::Conflict(_)) => {
                let user = self
                    .get_user(&username)
                    .await?
                    .ok_or_else(|| CoderError::NotFound(format!("user {}", username)))?;
                Ok((user, false))
            }
            Err(e) => Err(e),
        }
    }

    // ==================
    // Workspaces
    // ==================

    /// Fetch a user's workspace by name, `None` when absent
    pub async fn get_workspace(
        &self,
        username: &str,
        workspace: &str,
    ) -> Result<Option<Workspace>, CoderError> {
        match self
            .request::<Workspace, ()>(
                Method::GET,
                &format!("/users/{}/workspace/{}", username, workspace),
                None,
            )
            .await
        {
            Ok(ws) => Ok(Some(ws)),
            Err(CoderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the user's workspace from the configured template
    pub async fn create_workspace(&self, username: &str) -> Result<Workspace, CoderError> {
        let request = CreateWorkspaceRequest {
            name: username.to_string(),
            template_id: self.template_id.clone(),
        };
        self.request(
            Method::POST,
            &format!("/users/{}/workspaces", username),
            Some(&request),
        )
        .await
    }

    /// Ensure the user's workspace exists; returns whether it was created
    pub async fn ensure_workspace_exists(
        &self,
        username: &str,
    ) -> Result<(Workspace, bool), CoderError> {
        if let Some(ws) = self.get_workspace(username, username).await? {
            return Ok((ws, false));
        }

        match self.create_workspace(username).await {
            Ok(ws) => {
                tracing::info!(username = %username, workspace = %ws.name, "provisioned workspace");
                Ok((ws, true))
            }
            Err(CoderError::Conflict(_)) => {
                let ws = self
                    .get_workspace(username, username)
                    .await?
                    .ok_or_else(|| CoderError::NotFound(format!("workspace {}", username)))?;
                Ok((ws, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Current state of the user's workspace
    pub async fn workspace_state(&self, username: &str) -> Result<WorkspaceState, CoderError> {
        let ws = self
            .get_workspace(username, username)
            .await?
            .ok_or_else(|| CoderError::NotFound(format!("workspace {}", username)))?;
        Ok(WorkspaceState::from(ws.latest_build.status))
    }

    /// Queue a start build
    pub async fn start_workspace(&self, workspace_id: Uuid) -> Result<WorkspaceBuild, CoderError> {
        self.transition(workspace_id, "start").await
    }

    /// Queue a stop build
    pub async fn stop_workspace(&self, workspace_id: Uuid) -> Result<WorkspaceBuild, CoderError> {
        self.transition(workspace_id, "stop").await
    }

    async fn transition(
        &self,
        workspace_id: Uuid,
        transition: &str,
    ) -> Result<WorkspaceBuild, CoderError> {
        let request = TransitionRequest {
            transition: transition.to_string(),
        };
        self.request(
            Method::POST,
            &format!("/workspaces/{}/builds", workspace_id),
            Some(&request),
        )
        .await
    }

    /// Whether a status means a start request is redundant
    pub fn is_running_or_starting(status: BuildStatus) -> bool {
        matches!(
            status,
            BuildStatus::Running | BuildStatus::Starting | BuildStatus::Pending
        )
    }
}

/// Username for Coder, derived from the preferred username with the OIDC
/// subject as fallback. Coder restricts usernames to `[a-zA-Z0-9-]`.
pub fn coder_username(preferred_username: &str, sub: &str) -> String {
    let source = if preferred_username.is_empty() {
        sub
    } else {
        preferred_username
    };
    let mut name: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name.truncate(32);
    let trimmed = name.trim_matches('-');
    if trimmed.is_empty() {
        "user".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Random password for accounts whose real login happens at the IdP
fn generated_password() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    fn claims(username: &str, email: &str) -> Claims {
        Claims {
            sub: "subject-1".to_string(),
            exp: 4_000_000_000,
            email: email.to_string(),
            email_verified: true,
            preferred_username: username.to_string(),
            name: Some("J. Doe".to_string()),
            given_name: None,
            family_name: None,
            realm_access: None,
        }
    }

    fn coder_user(username: &str) -> serde_json::Value {
        serde_json::json!({
            "id": Uuid::new_v4(),
            "username": username,
            "email": "j@example.com",
            "organization_ids": [],
        })
    }

    async fn spawn(app: Router) -> CoderClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        CoderClient::new(
            reqwest::Client::new(),
            format!("http://{}", addr),
            "test-key",
            "template-1",
            "default",
        )
        .with_retry(RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        })
    }

    #[test]
    fn test_coder_username_sanitized() {
        assert_eq!(coder_username("j.doe@corp", "s"), "j-doe-corp");
        assert_eq!(coder_username("", "oidc|12345"), "oidc-12345");
        assert_eq!(coder_username("---", "---"), "user");
    }

    #[tokio::test]
    async fn test_ensure_user_exists_finds_existing() {
        let app = Router::new().route(
            "/api/v2/users/{username}",
            get(|| async { Json(serde_json::json!({
                "id": Uuid::new_v4(),
                "username": "jdoe",
                "email": "j@example.com",
            })) }),
        );
        let client = spawn(app).await;

        let (user, created) = client.ensure_user_exists(&claims("jdoe", "j@example.com")).await.unwrap();
        assert_eq!(user.username, "jdoe");
        assert!(!created);
    }

    #[tokio::test]
    async fn test_ensure_user_exists_creates_missing() {
        async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"message": "no such user"})),
            )
        }

        let app = Router::new()
            .route("/api/v2/users/{username}", get(not_found))
            .route(
                "/api/v2/users",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["username"], "jdoe");
                    assert_eq!(body["organization_ids"][0], "default");
                    assert!(!body["password"].as_str().unwrap().is_empty());
                    Json(serde_json::json!({
                        "id": Uuid::new_v4(),
                        "username": "jdoe",
                        "email": "j@example.com",
                    }))
                }),
            );
        let client = spawn(app).await;

        let (user, created) = client.ensure_user_exists(&claims("jdoe", "j@example.com")).await.unwrap();
        assert_eq!(user.username, "jdoe");
        assert!(created);
    }

    #[tokio::test]
    async fn test_ensure_user_conflict_race_resolves() {
        // First lookup misses, create conflicts, second lookup hits.
        let lookups = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route(
                "/api/v2/users/{username}",
                get({
                    let lookups = lookups.clone();
                    move || {
                        let lookups = lookups.clone();
                        async move {
                            if lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                                (
                                    StatusCode::NOT_FOUND,
                                    Json(serde_json::json!({"message": "missing"})),
                                )
                            } else {
                                (StatusCode::OK, Json(coder_user("jdoe")))
                            }
                        }
                    }
                }),
            )
            .route(
                "/api/v2/users",
                post(|| async {
                    (
                        StatusCode::CONFLICT,
                        Json(serde_json::json!({"message": "already exists"})),
                    )
                }),
            );
        let client = spawn(app).await;

        let (_, created) = client.ensure_user_exists(&claims("jdoe", "j@example.com")).await.unwrap();
        assert!(!created);
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let hits = Arc::new(AtomicUsize::new(0));

        async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            use axum::response::IntoResponse;
            if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            } else {
                Json(serde_json::json!({
                    "id": Uuid::new_v4(),
                    "username": "jdoe",
                    "email": "j@example.com",
                }))
                .into_response()
            }
        }

        let app = Router::new()
            .route("/api/v2/users/{username}", get(flaky))
            .with_state(hits.clone());
        let client = spawn(app).await;

        let user = client.get_user("jdoe").await.unwrap().unwrap();
        assert_eq!(user.username, "jdoe");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_attempts() {
        let app = Router::new().route(
            "/api/v2/users/{username}",
            get(|| async { StatusCode::BAD_GATEWAY }),
        );
        let client = spawn(app).await;

        let err = client.get_user("jdoe").await.unwrap_err();
        assert!(matches!(err, CoderError::Api { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_start_conflict_surfaced() {
        let app = Router::new().route(
            "/api/v2/workspaces/{id}/builds",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({"message": "a build is already running"})),
                )
            }),
        );
        let client = spawn(app).await;

        let err = client.start_workspace(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoderError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_workspace_state_maps_build_status() {
        let app = Router::new().route(
            "/api/v2/users/{username}/workspace/{workspace}",
            get(|| async {
                Json(serde_json::json!({
                    "id": Uuid::new_v4(),
                    "name": "jdoe",
                    "template_id": Uuid::new_v4(),
                    "latest_build": {"id": Uuid::new_v4(), "status": "starting"},
                }))
            }),
        );
        let client = spawn(app).await;

        let state = client.workspace_state("jdoe").await.unwrap();
        assert_eq!(state, WorkspaceState::Starting);
    }

    #[tokio::test]
    async fn test_api_error_message_surfaced() {
        let app = Router::new().route(
            "/api/v2/users",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"message": "email taken"})),
                )
            }),
        );
        let client = spawn(app).await;

        let err = client
            .create_user("jdoe", "j@example.com", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("email taken"));
    }
}
