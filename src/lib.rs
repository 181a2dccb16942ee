//! padws - self-hostable collaborative pad server
//!
//! OIDC login in front of a canvas frontend, Redis-backed sessions, and
//! per-user Coder workspaces provisioned on first login.

pub mod coder;
pub mod config;
pub mod core;
pub mod db;
pub mod domain;
pub mod http;
pub mod observability;
pub mod oidc;
pub mod session;
