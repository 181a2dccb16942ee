//! # Auth Extractors
//!
//! Resolve the `session_id` cookie into verified token claims. Three
//! flavors mirror the route requirements: required, optional, and
//! admin-gated. All of them go through the session manager, so an expired
//! access token is refreshed transparently before the claims are verified.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use uuid::Uuid;

use super::AppState;
use crate::core::AppError;
use crate::domain::user_id_for_sub;
use crate::oidc::Claims;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_id";

/// Name of the transient PKCE verifier cookie set during login
pub const PKCE_COOKIE: &str = "pkce_verifier";

/// Read a cookie value out of the request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(name) {
                return parts.next().map(|v| v.to_string());
            }
        }
    }
    None
}

/// An authenticated caller: session id plus verified token claims
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session_id: String,
    pub claims: Claims,
}

impl CurrentUser {
    /// The caller's deterministic user id
    pub fn user_id(&self) -> Uuid {
        user_id_for_sub(&self.claims.sub)
    }
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<CurrentUser, AppError> {
    let session_id =
        cookie_value(&parts.headers, SESSION_COOKIE).ok_or(AppError::AuthRequired)?;

    let record = state
        .sessions
        .get_live(&session_id)
        .await?
        .ok_or(AppError::AuthRequired)?;

    let claims = state.verifier.verify(&record.tokens.access_token).await?;

    Ok(CurrentUser { session_id, claims })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await
    }
}

/// Optional authentication: any failure resolves to `None`
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(authenticate(parts, state).await.ok()))
    }
}

/// Authentication plus the `admin` realm role
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(parts, state).await?;
        if !user.claims.is_admin() {
            return Err(AppError::access_denied("Admin privileges required"));
        }
        Ok(AdminUser(user))
    }
}

/// Build a `Set-Cookie` value for the session cookie
pub fn session_cookie(value: &str, secure: bool) -> String {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, value);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        SESSION_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a `Set-Cookie` value for the short-lived PKCE verifier cookie
pub fn pkce_cookie(value: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=600",
        PKCE_COOKIE, value
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a `Set-Cookie` value that removes the PKCE verifier cookie
pub fn clear_pkce_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=0",
        PKCE_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_value_parses_multiple_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_id=abc123; lang=en"),
        );
        assert_eq!(cookie_value(&headers, "session_id").as_deref(), Some("abc123"));
        assert_eq!(cookie_value(&headers, "lang").as_deref(), Some("en"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_cookie_value_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("session_id=xyz"));
        assert_eq!(cookie_value(&headers, "session_id").as_deref(), Some("xyz"));
    }

    #[test]
    fn test_cookie_name_must_match_exactly() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("xsession_id=nope"),
        );
        assert_eq!(cookie_value(&headers, "session_id"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let plain = session_cookie("v", false);
        assert!(plain.contains("HttpOnly"));
        assert!(!plain.contains("Secure"));

        let secure = session_cookie("v", true);
        assert!(secure.ends_with("; Secure"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        assert!(clear_session_cookie(false).contains("Max-Age=0"));
        assert!(clear_pkce_cookie(false).contains("Max-Age=0"));
    }
}
