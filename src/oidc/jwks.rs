//! # Access Token Verification
//!
//! Verifies RS256 access tokens against the provider JWKS. Keys are cached
//! by `kid`; an unknown `kid` triggers one refetch before the token is
//! rejected, which covers provider key rotation.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::discovery::DiscoveryCache;
use crate::core::{AppError, AppResult};

/// Realm role container as issued by Keycloak
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Verified claims of an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
}

impl Claims {
    /// Realm roles granted to the subject
    pub fn roles(&self) -> &[String] {
        self.realm_access
            .as_ref()
            .map(|ra| ra.roles.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the subject carries the `admin` realm role
    pub fn is_admin(&self) -> bool {
        self.roles().iter().any(|r| r == "admin")
    }

    /// Seconds until the token expires, clamped at zero
    pub fn expires_in(&self, now_unix: i64) -> u64 {
        (self.exp - now_unix).max(0) as u64
    }
}

/// JWK as served by the provider; only RSA signature keys are consumed
#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Access token verifier backed by the provider JWKS
pub struct JwksVerifier {
    http: reqwest::Client,
    discovery: Arc<DiscoveryCache>,
    audience: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
    /// Fixed key bypassing JWKS, for tests and single-key deployments
    static_key: Option<(DecodingKey, Algorithm)>,
}

impl JwksVerifier {
    pub fn new(
        http: reqwest::Client,
        discovery: Arc<DiscoveryCache>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            http,
            discovery,
            audience: audience.into(),
            keys: RwLock::new(HashMap::new()),
            static_key: None,
        }
    }

    /// Verify against a fixed key instead of the provider JWKS
    pub fn with_static_key(
        discovery: Arc<DiscoveryCache>,
        audience: impl Into<String>,
        key: DecodingKey,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery,
            audience: audience.into(),
            keys: RwLock::new(HashMap::new()),
            static_key: Some((key, algorithm)),
        }
    }

    /// Verify an access token and return its claims
    pub async fn verify(&self, token: &str) -> AppResult<Claims> {
        if let Some((key, algorithm)) = &self.static_key {
            return self.decode_with(token, key, *algorithm);
        }

        let header = decode_header(token)
            .map_err(|e| AppError::InvalidToken(format!("malformed header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::InvalidToken("token has no key id".to_string()))?;

        if let Some(key) = self.keys.read().await.get(&kid) {
            return self.decode_with(token, key, Algorithm::RS256);
        }

        // Unknown kid: refetch the JWKS once, then give up.
        self.refresh_keys().await?;

        let keys = self.keys.read().await;
        let key = keys
            .get(&kid)
            .ok_or_else(|| AppError::InvalidToken(format!("unknown key id '{}'", kid)))?;
        self.decode_with(token, key, Algorithm::RS256)
    }

    fn decode_with(
        &self,
        token: &str,
        key: &DecodingKey,
        algorithm: Algorithm,
    ) -> AppResult<Claims> {
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::InvalidToken(e.to_string()))
    }

    async fn refresh_keys(&self) -> AppResult<()> {
        let metadata = self.discovery.get().await?;

        let response = self
            .http
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| AppError::Oidc(format!("JWKS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Oidc(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AppError::Oidc(format!("invalid JWKS document: {}", e)))?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => {
                    tracing::warn!(kid = %kid, error = %err, "skipping unparseable JWK");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::discovery::ProviderMetadata;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn test_discovery() -> Arc<DiscoveryCache> {
        Arc::new(DiscoveryCache::preloaded(ProviderMetadata {
            issuer: "https://idp.test".to_string(),
            authorization_endpoint: "https://idp.test/auth".to_string(),
            token_endpoint: "https://idp.test/token".to_string(),
            jwks_uri: "https://idp.test/certs".to_string(),
            end_session_endpoint: None,
        }))
    }

    fn hs256_verifier(secret: &[u8]) -> JwksVerifier {
        JwksVerifier::with_static_key(
            test_discovery(),
            "padws",
            DecodingKey::from_secret(secret),
            Algorithm::HS256,
        )
    }

    fn sign(claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 600
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let verifier = hs256_verifier(b"secret");
        let token = sign(
            &serde_json::json!({
                "sub": "user-1",
                "aud": "padws",
                "exp": future_exp(),
                "email": "u@example.com",
                "preferred_username": "u",
                "realm_access": {"roles": ["admin", "user"]},
            }),
            b"secret",
        );

        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.preferred_username, "u");
        assert!(claims.is_admin());
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_audience() {
        let verifier = hs256_verifier(b"secret");
        let token = sign(
            &serde_json::json!({
                "sub": "user-1",
                "aud": "someone-else",
                "exp": future_exp(),
            }),
            b"secret",
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_signature() {
        let verifier = hs256_verifier(b"secret");
        let token = sign(
            &serde_json::json!({"sub": "x", "aud": "padws", "exp": future_exp()}),
            b"other-secret",
        );

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let verifier = hs256_verifier(b"secret");
        let token = sign(
            &serde_json::json!({
                "sub": "x",
                "aud": "padws",
                "exp": chrono::Utc::now().timestamp() - 600,
            }),
            b"secret",
        );

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_garbage_token() {
        let verifier = hs256_verifier(b"secret");
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_claims_helpers() {
        let claims = Claims {
            sub: "s".to_string(),
            exp: 1_000,
            email: String::new(),
            email_verified: false,
            preferred_username: String::new(),
            name: None,
            given_name: None,
            family_name: None,
            realm_access: None,
        };
        assert!(claims.roles().is_empty());
        assert!(!claims.is_admin());
        assert_eq!(claims.expires_in(900), 100);
        assert_eq!(claims.expires_in(2_000), 0);
    }
}
