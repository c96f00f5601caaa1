//! Telegram update deduplication cache

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default dedup TTL (5 minutes)
const DEDUP_TTL_SECS: u64 = 300;

/// Maximum dedup cache entries
const DEDUP_MAX_ENTRIES: usize = 2000;

/// Remembers recently handled update IDs
///
/// A reconnect after a network error can replay updates that were already
/// dispatched. Entries expire after a TTL with a hard cap on entries.
#[derive(Debug)]
pub struct UpdateDedup {
    seen: HashMap<i64, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for UpdateDedup {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEDUP_TTL_SECS), DEDUP_MAX_ENTRIES)
    }
}

impl UpdateDedup {
    /// Cache with a custom TTL and size cap
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record `update_id`, returning `true` if it was already seen
    pub fn is_duplicate(&mut self, update_id: i64) -> bool {
        let now = Instant::now();

        if self.seen.len() >= self.max_entries {
            self.seen.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        if self.seen.len() >= self.max_entries
            && let Some(oldest) = self.seen.iter().min_by_key(|(_, ts)| **ts).map(|(id, _)| *id)
        {
            self.seen.remove(&oldest);
        }

        if let Some(ts) = self.seen.get(&update_id)
            && now.duration_since(*ts) < self.ttl
        {
            return true;
        }

        self.seen.insert(update_id, now);
        false
    }

    /// Number of remembered updates
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing is remembered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_sighting_is_duplicate() {
        let mut dedup = UpdateDedup::default();
        assert!(!dedup.is_duplicate(10));
        assert!(dedup.is_duplicate(10));
        assert!(!dedup.is_duplicate(11));
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut dedup = UpdateDedup::new(Duration::from_secs(300), 2);
        assert!(!dedup.is_duplicate(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!dedup.is_duplicate(2));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!dedup.is_duplicate(3));
        assert_eq!(dedup.len(), 2);
        assert!(!dedup.is_duplicate(1));
    }

    #[test]
    fn test_expired_entries_are_not_duplicates() {
        let mut dedup = UpdateDedup::new(Duration::ZERO, 10);
        assert!(!dedup.is_duplicate(5));
        assert!(!dedup.is_duplicate(5));
    }
}
