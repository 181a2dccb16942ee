//! # Provider Discovery
//!
//! Fetches and caches the OIDC discovery document. The metadata is cached
//! with a TTL; when a refresh attempt fails and a previous document is
//! available, the stale copy is served so a briefly unreachable provider
//! does not take down already-authenticated traffic.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::{AppError, AppResult};

/// Fields of the discovery document the server relies on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

struct CacheSlot {
    metadata: ProviderMetadata,
    fetched_at: Instant,
}

/// TTL cache over the discovery document
pub struct DiscoveryCache {
    http: reqwest::Client,
    discovery_url: String,
    ttl: Duration,
    slot: RwLock<Option<CacheSlot>>,
}

impl DiscoveryCache {
    /// Default time between refreshes of the discovery document
    pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

    /// Create a cache for the given discovery URL
    pub fn new(http: reqwest::Client, discovery_url: impl Into<String>) -> Self {
        Self {
            http,
            discovery_url: discovery_url.into(),
            ttl: Self::DEFAULT_TTL,
            slot: RwLock::new(None),
        }
    }

    /// Override the refresh TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Create a cache pre-populated with fixed metadata (tests, offline use)
    pub fn preloaded(metadata: ProviderMetadata) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery_url: String::new(),
            ttl: Duration::from_secs(u64::MAX / 4),
            slot: RwLock::new(Some(CacheSlot {
                metadata,
                fetched_at: Instant::now(),
            })),
        }
    }

    /// Get the current provider metadata, refreshing if the cache is stale
    pub async fn get(&self) -> AppResult<ProviderMetadata> {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.metadata.clone());
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.metadata.clone());
            }
        }

        match self.fetch().await {
            Ok(metadata) => {
                *slot = Some(CacheSlot {
                    metadata: metadata.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(metadata)
            }
            Err(err) => {
                if let Some(cached) = slot.as_ref() {
                    tracing::warn!(error = %err, "discovery refresh failed, serving stale metadata");
                    Ok(cached.metadata.clone())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn fetch(&self) -> AppResult<ProviderMetadata> {
        let response = self
            .http
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| AppError::Oidc(format!("discovery request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Oidc(format!(
                "discovery document returned {}",
                response.status()
            )));
        }

        response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| AppError::Oidc(format!("invalid discovery document: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_metadata() -> ProviderMetadata {
        ProviderMetadata {
            issuer: "https://idp.test/realms/pad".to_string(),
            authorization_endpoint: "https://idp.test/auth".to_string(),
            token_endpoint: "https://idp.test/token".to_string(),
            jwks_uri: "https://idp.test/certs".to_string(),
            end_session_endpoint: Some("https://idp.test/logout".to_string()),
        }
    }

    /// Serve a discovery document from a local listener, counting hits
    async fn spawn_idp(hits: Arc<AtomicUsize>) -> String {
        use axum::{extract::State, routing::get, Json, Router};

        async fn handler(
            State(hits): State<Arc<AtomicUsize>>,
        ) -> Json<ProviderMetadata> {
            hits.fetch_add(1, Ordering::SeqCst);
            Json(ProviderMetadata {
                issuer: "https://idp.test/realms/pad".to_string(),
                authorization_endpoint: "https://idp.test/auth".to_string(),
                token_endpoint: "https://idp.test/token".to_string(),
                jwks_uri: "https://idp.test/certs".to_string(),
                end_session_endpoint: None,
            })
        }

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(handler))
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/.well-known/openid-configuration", addr)
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_idp(hits.clone()).await;

        let cache = DiscoveryCache::new(reqwest::Client::new(), url);
        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_eq!(first.issuer, second.issuer);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_refetches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_idp(hits.clone()).await;

        let cache = DiscoveryCache::new(reqwest::Client::new(), url)
            .with_ttl(Duration::from_millis(0));
        cache.get().await.unwrap();
        cache.get().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_preloaded_never_fetches() {
        let cache = DiscoveryCache::preloaded(test_metadata());
        let metadata = cache.get().await.unwrap();
        assert_eq!(metadata.token_endpoint, "https://idp.test/token");
    }

    #[tokio::test]
    async fn test_unreachable_provider_without_cache_errors() {
        let cache = DiscoveryCache::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/.well-known/openid-configuration",
        );
        let err = cache.get().await.unwrap_err();
        assert_eq!(err.error_code(), "OIDC_ERROR");
    }
}
