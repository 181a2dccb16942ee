//! # Auth Event Log
//!
//! Minimal, append-only log of authentication events (login, logout,
//! refresh). Bounded ring buffer: when full, the oldest entry is dropped.
//! Entries are never modified after insertion.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of authentication event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    Login,
    Logout,
    Refresh,
}

impl AuthEventKind {
    /// Returns string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::Login => "login",
            AuthEventKind::Logout => "logout",
            AuthEventKind::Refresh => "refresh",
        }
    }
}

/// A single auth event entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Event kind
    pub kind: AuthEventKind,
    /// Prefix of the session id. The full cookie value is a bearer
    /// credential and must not land in logs.
    pub session_prefix: String,
    /// Event timestamp
    pub at: DateTime<Utc>,
}

/// Auth event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEventLogConfig {
    /// Whether events are recorded at all
    pub enabled: bool,
    /// Maximum retained entries
    pub capacity: usize,
}

impl Default for AuthEventLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
        }
    }
}

/// Bounded append-only auth event log
pub struct AuthEventLog {
    config: AuthEventLogConfig,
    entries: RwLock<VecDeque<AuthEvent>>,
}

impl AuthEventLog {
    /// Create a log with the given configuration
    pub fn new(config: AuthEventLogConfig) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(config.capacity.min(1024))),
            config,
        }
    }

    /// Record an event
    pub fn record(&self, kind: AuthEventKind, session_id: &str) {
        if !self.config.enabled {
            return;
        }

        let event = AuthEvent {
            id: Uuid::new_v4(),
            kind,
            session_prefix: session_id.chars().take(8).collect(),
            at: Utc::now(),
        };

        tracing::info!(
            kind = kind.as_str(),
            session = %event.session_prefix,
            "auth event"
        );

        let mut entries = self.entries.write().unwrap();
        if entries.len() >= self.config.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Snapshot of current entries, oldest first
    pub fn snapshot(&self) -> Vec<AuthEvent> {
        self.entries.read().unwrap().iter().cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuthEventLog {
    fn default() -> Self {
        Self::new(AuthEventLogConfig::default())
    }
}
