mod store;

pub use store::{InMemorySessionStore, SessionStore};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One user message paired with the generated reply. Immutable once
/// appended; only window pruning or session eviction removes it.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Bookkeeping kept alongside a session's history.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Total exchanges ever appended — keeps counting past the storage bound.
    pub message_count: u64,
    pub source_address: String,
}
