//! # OIDC Integration
//!
//! Authorization-code flow against a standards-compliant provider
//! (Keycloak or Authentik in the reference deployment): discovery document
//! caching, authorization URL construction, code exchange, token refresh,
//! and RS256 access-token verification against the provider JWKS.

pub mod client;
pub mod discovery;
pub mod jwks;

pub use client::{OidcClient, PkcePair, TokenSet};
pub use discovery::{DiscoveryCache, ProviderMetadata};
pub use jwks::{Claims, JwksVerifier};
