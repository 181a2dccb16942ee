//! # OIDC Client
//!
//! Builds authorization URLs and talks to the provider token endpoint for
//! the authorization-code and refresh-token grants. PKCE (S256) is applied
//! on top of the confidential client credentials.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::discovery::DiscoveryCache;
use crate::core::{AppError, AppResult};

/// Scopes requested at login; `offline_access` yields a refresh token
pub const LOGIN_SCOPES: &str = "openid profile email offline_access";

/// Token set returned by the provider token endpoint
///
/// This is also the session record payload stored in Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// PKCE verifier/challenge pair for one login attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier and its S256 challenge
    pub fn generate() -> Self {
        let mut bytes = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        Self::from_verifier(verifier)
    }

    /// Derive the S256 challenge for an existing verifier
    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self { verifier, challenge }
    }
}

/// Client for the provider authorization and token endpoints
pub struct OidcClient {
    http: reqwest::Client,
    discovery: Arc<DiscoveryCache>,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OidcClient {
    pub fn new(
        http: reqwest::Client,
        discovery: Arc<DiscoveryCache>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            discovery,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// The registered client id
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the authorization URL the login route redirects to
    ///
    /// `state` is echoed back on the callback (`default` or `popup`);
    /// `kc_idp_hint` is passed through for Keycloak brokered logins.
    pub async fn authorization_url(
        &self,
        state: &str,
        kc_idp_hint: Option<&str>,
        pkce: &PkcePair,
    ) -> AppResult<String> {
        let metadata = self.discovery.get().await?;

        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", LOGIN_SCOPES),
            ("state", state),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        if let Some(hint) = kc_idp_hint {
            params.push(("kc_idp_hint", hint));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{}?{}", metadata.authorization_endpoint, query))
    }

    /// Exchange an authorization code for a token set
    pub async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> AppResult<TokenSet> {
        let metadata = self.discovery.get().await?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code_verifier", pkce_verifier),
        ];

        self.token_request(&metadata.token_endpoint, &params).await
    }

    /// Refresh a token set
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenSet> {
        let metadata = self.discovery.get().await?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        self.token_request(&metadata.token_endpoint, &params).await
    }

    /// Provider logout URL, if the provider advertises end-session support
    pub async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> AppResult<Option<String>> {
        let metadata = self.discovery.get().await?;

        Ok(metadata.end_session_endpoint.map(|endpoint| {
            format!(
                "{}?id_token_hint={}&post_logout_redirect_uri={}",
                endpoint,
                urlencoding::encode(id_token_hint),
                urlencoding::encode(post_logout_redirect_uri)
            )
        }))
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
    ) -> AppResult<TokenSet> {
        let response = self
            .http
            .post(token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::Oidc(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Oidc(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|e| AppError::Oidc(format!("invalid token response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::discovery::ProviderMetadata;

    fn test_metadata(token_endpoint: &str) -> ProviderMetadata {
        ProviderMetadata {
            issuer: "https://idp.test/realms/pad".to_string(),
            authorization_endpoint: "https://idp.test/auth".to_string(),
            token_endpoint: token_endpoint.to_string(),
            jwks_uri: "https://idp.test/certs".to_string(),
            end_session_endpoint: Some("https://idp.test/logout".to_string()),
        }
    }

    fn test_client(token_endpoint: &str) -> OidcClient {
        OidcClient::new(
            reqwest::Client::new(),
            Arc::new(DiscoveryCache::preloaded(test_metadata(token_endpoint))),
            "padws",
            "s3cret",
            "https://pad.test/auth/callback",
        )
    }

    #[test]
    fn test_pkce_challenge_is_s256_of_verifier() {
        // RFC 7636 appendix B example values
        let pair = PkcePair::from_verifier(
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string(),
        );
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pkce_generate_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert!(!a.verifier.contains('='));
    }

    #[tokio::test]
    async fn test_authorization_url_contents() {
        let client = test_client("https://idp.test/token");
        let pkce = PkcePair::generate();

        let url = client
            .authorization_url("popup", Some("github"), &pkce)
            .await
            .unwrap();

        assert!(url.starts_with("https://idp.test/auth?"));
        assert!(url.contains("client_id=padws"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=popup"));
        assert!(url.contains("kc_idp_hint=github"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("code_challenge={}", pkce.challenge)));
        assert!(url.contains("offline_access"));
    }

    #[tokio::test]
    async fn test_authorization_url_without_hint() {
        let client = test_client("https://idp.test/token");
        let url = client
            .authorization_url("default", None, &PkcePair::generate())
            .await
            .unwrap();
        assert!(!url.contains("kc_idp_hint"));
    }

    #[tokio::test]
    async fn test_end_session_url() {
        let client = test_client("https://idp.test/token");
        let url = client
            .end_session_url("id.token.value", "https://pad.test/")
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with("https://idp.test/logout?"));
        assert!(url.contains("id_token_hint=id.token.value"));
        assert!(url.contains("post_logout_redirect_uri=https%3A%2F%2Fpad.test%2F"));
    }

    #[tokio::test]
    async fn test_exchange_code_round_trip() {
        use axum::{routing::post, Form, Json, Router};
        use std::collections::HashMap;

        async fn token(Form(form): Form<HashMap<String, String>>) -> Json<TokenSet> {
            assert_eq!(form.get("grant_type").unwrap(), "authorization_code");
            assert_eq!(form.get("code").unwrap(), "the-code");
            assert!(form.contains_key("code_verifier"));
            Json(TokenSet {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                id_token: Some("it".to_string()),
                expires_in: Some(300),
                token_type: Some("Bearer".to_string()),
                scope: None,
            })
        }

        let app = Router::new().route("/token", post(token));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = test_client(&format!("http://{}/token", addr));
        let tokens = client.exchange_code("the-code", "verifier").await.unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.expires_in, Some(300));
    }

    #[tokio::test]
    async fn test_exchange_code_failure_surfaces_body() {
        use axum::{http::StatusCode, routing::post, Router};

        let app = Router::new().route(
            "/token",
            post(|| async { (StatusCode::BAD_REQUEST, "invalid_grant") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = test_client(&format!("http://{}/token", addr));
        let err = client.exchange_code("bad", "verifier").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }
}
