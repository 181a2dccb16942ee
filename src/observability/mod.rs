//! Observability: structured logging lives in `tracing`; this module holds
//! the in-process auth event log.

pub mod auth_events;

pub use auth_events::{AuthEvent, AuthEventKind, AuthEventLog, AuthEventLogConfig};
