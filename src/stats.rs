use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime request counters for the stats surface.
#[derive(Debug)]
pub struct RequestStats {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    started_at: DateTime<Utc>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_request(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = RequestStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_success();
        stats.record_failure();

        assert_eq!(stats.total(), 2);
        assert_eq!(stats.succeeded(), 1);
        assert_eq!(stats.failed(), 1);
    }

    #[test]
    fn uptime_is_non_negative() {
        let stats = RequestStats::new();
        assert!(stats.uptime_seconds() >= 0);
    }
}
