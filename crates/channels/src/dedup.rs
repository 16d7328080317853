//! Message-id de-duplication for webhook retries.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Remembers message ids with their arrival time. Once more than
/// `capacity` ids are held, ids older than `window` are forgotten on the
/// next insert.
pub struct MessageDedup {
    capacity: usize,
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl MessageDedup {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `msgid`. Returns `false` if it was already seen.
    pub fn check_and_record(&self, msgid: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains_key(msgid) {
            return false;
        }

        let now = Instant::now();
        if seen.len() > self.capacity {
            let window = self.window;
            seen.retain(|_, arrived| now.duration_since(*arrived) <= window);
        }
        seen.insert(msgid.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_ids_are_rejected() {
        let dedup = MessageDedup::new(10, Duration::from_secs(3600));
        assert!(dedup.check_and_record("m1"));
        assert!(!dedup.check_and_record("m1"));
        assert!(dedup.check_and_record("m2"));
        assert_eq!(dedup.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn old_ids_are_pruned_once_over_capacity() {
        let dedup = MessageDedup::new(2, Duration::from_secs(3600));
        for id in ["a", "b", "c"] {
            dedup.check_and_record(id);
        }
        tokio::time::advance(Duration::from_secs(3601)).await;

        // over capacity: a, b, c are past the window and go
        assert!(dedup.check_and_record("d"));
        assert_eq!(dedup.len(), 1);
        assert!(dedup.check_and_record("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn recent_ids_survive_pruning() {
        let dedup = MessageDedup::new(1, Duration::from_secs(3600));
        dedup.check_and_record("a");
        dedup.check_and_record("b");
        tokio::time::advance(Duration::from_secs(60)).await;
        dedup.check_and_record("c");
        assert_eq!(dedup.len(), 3);
        assert!(!dedup.check_and_record("a"));
    }
}
