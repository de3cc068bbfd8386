use super::{Exchange, SessionMeta};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use uuid::Uuid;

/// Conversation state, keyed by opaque session id.
///
/// The store is the only owner of session data; the relay never holds a
/// session across calls. All operations are total over any string id.
pub trait SessionStore: Send + Sync {
    /// Resolve a client-supplied candidate id to a live session id,
    /// creating the session if needed. An absent candidate gets a fresh
    /// high-entropy id rather than an address-derived one, so two clients
    /// behind the same address can never collide.
    fn resolve(&self, candidate_id: Option<&str>, source_address: &str) -> String;

    /// Append one exchange and prune the history to the storage bound,
    /// keeping the newest entries.
    fn append(&self, session_id: &str, user_text: &str, assistant_text: &str);

    /// Up to `window` most recent exchanges, chronological order.
    fn recent_context(&self, session_id: &str, window: usize) -> Vec<Exchange>;

    /// Evict every session idle longer than `retention_secs`. Returns the
    /// number of sessions removed.
    fn sweep(&self, retention_secs: u64) -> usize;

    fn session_count(&self) -> usize;

    /// Sum of history lengths across all live sessions.
    fn buffered_messages(&self) -> usize;
}

struct SessionEntry {
    history: VecDeque<Exchange>,
    meta: SessionMeta,
}

impl SessionEntry {
    fn new(source_address: &str) -> Self {
        let now = Utc::now();
        Self {
            history: VecDeque::new(),
            meta: SessionMeta {
                created_at: now,
                last_activity_at: now,
                message_count: 0,
                source_address: source_address.to_string(),
            },
        }
    }
}

/// Process-lifetime session store backed by a concurrent map.
///
/// Concurrent requests sharing one session id still race on
/// read-modify-write of the history (last writer wins after truncation);
/// the map itself is the only synchronization.
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionEntry>,
    max_history: usize,
}

impl InMemorySessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_history: max_history.max(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, session_id: &str, secs: i64) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.meta.last_activity_at -= Duration::seconds(secs);
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn resolve(&self, candidate_id: Option<&str>, source_address: &str) -> String {
        if let Some(id) = candidate_id {
            if let Some(mut entry) = self.sessions.get_mut(id) {
                entry.meta.last_activity_at = Utc::now();
            } else {
                self.sessions
                    .insert(id.to_string(), SessionEntry::new(source_address));
            }
            return id.to_string();
        }

        let id = Uuid::new_v4().to_string();
        self.sessions
            .insert(id.clone(), SessionEntry::new(source_address));
        id
    }

    fn append(&self, session_id: &str, user_text: &str, assistant_text: &str) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new("unknown"));

        entry.history.push_back(Exchange {
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            timestamp: Utc::now(),
        });
        entry.meta.message_count += 1;
        entry.meta.last_activity_at = Utc::now();

        while entry.history.len() > self.max_history {
            entry.history.pop_front();
        }
    }

    fn recent_context(&self, session_id: &str, window: usize) -> Vec<Exchange> {
        let Some(entry) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let skip = entry.history.len().saturating_sub(window);
        entry.history.iter().skip(skip).cloned().collect()
    }

    fn sweep(&self, retention_secs: u64) -> usize {
        let now = Utc::now();
        let retention = Duration::seconds(i64::try_from(retention_secs).unwrap_or(i64::MAX));

        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now - entry.value().meta.last_activity_at > retention)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.sessions.remove(&id).is_some() {
                tracing::debug!(session_id = %id, "evicted idle session");
                removed += 1;
            }
        }
        removed
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn buffered_messages(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().history.len())
            .sum()
    }
}
