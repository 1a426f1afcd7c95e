use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::clock::Clock;
use crate::source::SourceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthEntry {
    pub status: SourceStatus,
    pub checked_at: DateTime<Utc>,
}

/// Probe results keyed by URL. Entries older than the TTL read as absent.
///
/// Shared by reference between every prober in the process. Writes are
/// last-write-wins; two concurrent probes of one URL both land and the later
/// one sticks.
#[derive(Debug)]
pub struct HealthCache {
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, HealthEntry>>,
}

impl HealthCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, HealthEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, url: &str) -> Option<SourceStatus> {
        let now = self.clock.now();
        self.entries()
            .get(url)
            .filter(|entry| now - entry.checked_at < self.ttl)
            .map(|entry| entry.status)
    }

    pub fn entry(&self, url: &str) -> Option<HealthEntry> {
        self.entries().get(url).copied()
    }

    pub fn insert(&self, url: &str, status: SourceStatus) {
        let entry = HealthEntry {
            status,
            checked_at: self.clock.now(),
        };
        self.entries().insert(url.to_string(), entry);
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::clock::ManualClock;

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = HealthCache::new(Duration::from_secs(300), clock.clone());
        cache.insert("https://a.example", SourceStatus::Active);
        assert_eq!(cache.get("https://a.example"), Some(SourceStatus::Active));

        clock.advance(chrono::Duration::seconds(299));
        assert_eq!(cache.get("https://a.example"), Some(SourceStatus::Active));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cache.get("https://a.example"), None);
        assert!(cache.entry("https://a.example").is_some());
    }

    #[test]
    fn insert_overwrites_and_clear_empties() {
        let clock = Arc::new(ManualClock::default());
        let cache = HealthCache::new(Duration::from_secs(60), clock);
        cache.insert("https://a.example", SourceStatus::Active);
        cache.insert("https://a.example", SourceStatus::Down);
        assert_eq!(cache.get("https://a.example"), Some(SourceStatus::Down));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
