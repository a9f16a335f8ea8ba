// ============================================================================
// Retry Tracker
// ============================================================================
//
// Counts failed processing attempts per message id for one subscription.
//
// Invariant: an entry exists iff the message failed at least once and has
// neither succeeded nor exceeded the retry ceiling since.
//
// The transport may redeliver a message while an earlier delivery of the
// same id is still being handled, so increments go through the map's entry
// API: the shard lock is held across load-or-insert-and-increment and no
// increment is lost.
//
// ============================================================================

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: DashMap<String, u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more failure for `id` and return the resulting attempt count
    pub fn record_failure(&self, id: &str) -> u32 {
        let mut attempts = self.attempts.entry(id.to_string()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        *attempts
    }

    /// Forget `id`, returning the attempt count it had reached
    pub fn clear(&self, id: &str) -> Option<u32> {
        self.attempts.remove(id).map(|(_, attempts)| attempts)
    }

    pub fn attempts(&self, id: &str) -> Option<u32> {
        self.attempts.get(id).map(|attempts| *attempts)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.attempts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
