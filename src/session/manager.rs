//! # Session Manager
//!
//! Session lifecycle on top of a `SessionStore`: opaque id generation,
//! expiry tracking with clock skew, transparent refresh through the
//! provider, and auth event recording.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;

use super::store::{SessionRecord, SessionStore};
use crate::core::{AppError, AppResult};
use crate::observability::{AuthEventKind, AuthEventLog};
use crate::oidc::{OidcClient, TokenSet};

/// Generate an opaque session id: 32 random bytes, URL-safe base64
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Session lifecycle service
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    oidc: Arc<OidcClient>,
    events: Arc<AuthEventLog>,
    fallback_ttl: Duration,
}

impl SessionManager {
    /// Tokens are treated as expired this many seconds early, so a token
    /// that is valid now is still valid by the time it reaches upstream.
    const EXPIRY_SKEW_SECS: i64 = 30;

    pub fn new(
        store: Arc<dyn SessionStore>,
        oidc: Arc<OidcClient>,
        events: Arc<AuthEventLog>,
        fallback_ttl: Duration,
    ) -> Self {
        Self {
            store,
            oidc,
            events,
            fallback_ttl,
        }
    }

    /// The auth event log fed by this manager
    pub fn events(&self) -> &AuthEventLog {
        &self.events
    }

    /// Store TTL for a token set: at least the configured fallback, so a
    /// short-lived access token does not evict the refresh token with it.
    fn ttl_for(&self, tokens: &TokenSet) -> Duration {
        let token_ttl = Duration::from_secs(tokens.expires_in.unwrap_or(0));
        token_ttl.max(self.fallback_ttl)
    }

    /// Whether the access token in a record is past its lifetime
    pub fn is_expired(&self, record: &SessionRecord, now_unix: i64) -> bool {
        let lifetime = record
            .tokens
            .expires_in
            .unwrap_or(self.fallback_ttl.as_secs()) as i64;
        record.issued_at + lifetime - Self::EXPIRY_SKEW_SECS <= now_unix
    }

    /// Persist a fresh login
    pub async fn create(&self, session_id: &str, tokens: TokenSet) -> AppResult<SessionRecord> {
        let record = SessionRecord::new(tokens);
        self.store
            .put(session_id, &record, self.ttl_for(&record.tokens))
            .await?;
        self.events.record(AuthEventKind::Login, session_id);
        Ok(record)
    }

    /// Fetch a session, refreshing it if the access token has expired
    ///
    /// `Ok(None)` means no session exists. `Err(SessionExpired)` means one
    /// existed but could not be refreshed; the record is deleted.
    pub async fn get_live(&self, session_id: &str) -> AppResult<Option<SessionRecord>> {
        let Some(record) = self.store.get(session_id).await? else {
            return Ok(None);
        };

        if !self.is_expired(&record, Utc::now().timestamp()) {
            return Ok(Some(record));
        }

        match self.refresh(session_id, &record).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(err) => {
                tracing::debug!(error = %err, "session refresh failed, dropping session");
                let _ = self.store.delete(session_id).await;
                Err(AppError::SessionExpired)
            }
        }
    }

    /// Refresh the token set behind a session
    pub async fn refresh(
        &self,
        session_id: &str,
        record: &SessionRecord,
    ) -> AppResult<SessionRecord> {
        let refresh_token = record
            .tokens
            .refresh_token
            .as_deref()
            .ok_or(AppError::SessionExpired)?;

        let mut tokens = self.oidc.refresh(refresh_token).await?;

        // Providers may omit rotated fields; keep the previous values.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = record.tokens.refresh_token.clone();
        }
        if tokens.id_token.is_none() {
            tokens.id_token = record.tokens.id_token.clone();
        }

        let refreshed = SessionRecord::new(tokens);
        self.store
            .put(session_id, &refreshed, self.ttl_for(&refreshed.tokens))
            .await?;
        self.events.record(AuthEventKind::Refresh, session_id);
        Ok(refreshed)
    }

    /// Refresh a session unconditionally (the explicit `/auth/refresh` path)
    pub async fn force_refresh(&self, session_id: &str) -> AppResult<SessionRecord> {
        let record = self
            .store
            .get(session_id)
            .await?
            .ok_or(AppError::AuthRequired)?;

        self.refresh(session_id, &record).await.map_err(|err| {
            tracing::debug!(error = %err, "forced refresh failed");
            AppError::SessionExpired
        })
    }

    /// Delete a session, returning the record that was stored
    pub async fn destroy(&self, session_id: &str) -> AppResult<Option<SessionRecord>> {
        let record = self.store.get(session_id).await?;
        if self.store.delete(session_id).await? {
            self.events.record(AuthEventKind::Logout, session_id);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::AuthEventLog;
    use crate::oidc::discovery::{DiscoveryCache, ProviderMetadata};
    use crate::session::store::InMemorySessionStore;

    fn tokens(access_token: &str, expires_in: Option<u64>) -> TokenSet {
        TokenSet {
            access_token: access_token.to_string(),
            refresh_token: Some("rt".to_string()),
            id_token: Some("it".to_string()),
            expires_in,
            token_type: Some("Bearer".to_string()),
            scope: None,
        }
    }

    fn manager_with_endpoint(token_endpoint: &str) -> SessionManager {
        let discovery = Arc::new(DiscoveryCache::preloaded(ProviderMetadata {
            issuer: "https://idp.test".to_string(),
            authorization_endpoint: "https://idp.test/auth".to_string(),
            token_endpoint: token_endpoint.to_string(),
            jwks_uri: "https://idp.test/certs".to_string(),
            end_session_endpoint: None,
        }));
        let oidc = Arc::new(OidcClient::new(
            reqwest::Client::new(),
            discovery,
            "padws",
            "s3cret",
            "https://pad.test/auth/callback",
        ));
        SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            oidc,
            Arc::new(AuthEventLog::default()),
            Duration::from_secs(3600),
        )
    }

    async fn spawn_token_endpoint(response: Result<TokenSet, u16>) -> String {
        use axum::response::IntoResponse;
        use axum::{http::StatusCode, routing::post, Json, Router};

        let app = Router::new().route(
            "/token",
            post(move || {
                let response = response.clone();
                async move {
                    match response {
                        Ok(tokens) => Json(tokens).into_response(),
                        Err(status) => {
                            StatusCode::from_u16(status).unwrap().into_response()
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/token", addr)
    }

    #[tokio::test]
    async fn test_session_id_shape() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, unpadded base64
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[tokio::test]
    async fn test_create_and_get_live() {
        let manager = manager_with_endpoint("https://unused.test/token");
        let sid = new_session_id();
        manager.create(&sid, tokens("at", Some(300))).await.unwrap();

        let record = manager.get_live(&sid).await.unwrap().unwrap();
        assert_eq!(record.tokens.access_token, "at");
        assert_eq!(manager.events().len(), 1);
    }

    #[tokio::test]
    async fn test_get_live_missing_session() {
        let manager = manager_with_endpoint("https://unused.test/token");
        assert!(manager.get_live("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_refreshes() {
        let endpoint = spawn_token_endpoint(Ok(tokens("fresh-at", Some(300)))).await;
        let manager = manager_with_endpoint(&endpoint);

        let sid = new_session_id();
        let mut record = SessionRecord::new(tokens("stale-at", Some(60)));
        record.issued_at -= 3600;
        manager
            .store
            .put(&sid, &record, Duration::from_secs(600))
            .await
            .unwrap();

        let live = manager.get_live(&sid).await.unwrap().unwrap();
        assert_eq!(live.tokens.access_token, "fresh-at");
        assert_eq!(manager.events().snapshot()[0].kind, AuthEventKind::Refresh);
    }

    #[tokio::test]
    async fn test_failed_refresh_drops_session() {
        let endpoint = spawn_token_endpoint(Err(400)).await;
        let manager = manager_with_endpoint(&endpoint);

        let sid = new_session_id();
        let mut record = SessionRecord::new(tokens("stale-at", Some(60)));
        record.issued_at -= 3600;
        manager
            .store
            .put(&sid, &record, Duration::from_secs(600))
            .await
            .unwrap();

        let err = manager.get_live(&sid).await.unwrap_err();
        assert_eq!(err.error_code(), "SESSION_EXPIRED");
        // The broken session is gone entirely on the next call.
        assert!(manager.get_live(&sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_keeps_unrotated_fields() {
        let endpoint = spawn_token_endpoint(Ok(TokenSet {
            access_token: "new-at".to_string(),
            refresh_token: None,
            id_token: None,
            expires_in: Some(300),
            token_type: None,
            scope: None,
        }))
        .await;
        let manager = manager_with_endpoint(&endpoint);

        let record = SessionRecord::new(tokens("old-at", Some(300)));
        let refreshed = manager.refresh("sid", &record).await.unwrap();
        assert_eq!(refreshed.tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(refreshed.tokens.id_token.as_deref(), Some("it"));
    }

    #[tokio::test]
    async fn test_force_refresh_without_session_is_auth_required() {
        let manager = manager_with_endpoint("https://unused.test/token");
        let err = manager.force_refresh("missing").await.unwrap_err();
        assert_eq!(err.error_code(), "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn test_destroy_returns_record_and_logs_event() {
        let manager = manager_with_endpoint("https://unused.test/token");
        let sid = new_session_id();
        manager.create(&sid, tokens("at", Some(300))).await.unwrap();

        let destroyed = manager.destroy(&sid).await.unwrap().unwrap();
        assert_eq!(destroyed.tokens.access_token, "at");
        assert!(manager.get_live(&sid).await.unwrap().is_none());

        let kinds: Vec<_> = manager.events().snapshot().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AuthEventKind::Login, AuthEventKind::Logout]);
    }

    #[test]
    fn test_is_expired_honors_skew() {
        let manager = manager_with_endpoint("https://unused.test/token");
        let record = SessionRecord::new(tokens("at", Some(300)));
        let now = record.issued_at;

        assert!(!manager.is_expired(&record, now));
        // 30s of skew: expired slightly before the nominal lifetime.
        assert!(manager.is_expired(&record, now + 271));
        assert!(manager.is_expired(&record, now + 400));
    }
}
