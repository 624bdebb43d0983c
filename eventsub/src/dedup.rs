use std::collections::VecDeque;

use parking_lot::Mutex;

/// Bounded-memory in-activity dedup set, per §4.2: caps at `capacity` ids,
/// evicting the oldest half on overflow rather than growing unbounded.
pub struct DedupSet {
    capacity: usize,
    seen: Mutex<(std::collections::HashSet<String>, VecDeque<String>)>,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new((std::collections::HashSet::new(), VecDeque::new())),
        }
    }

    /// Returns `true` if `event_id` had already been seen (caller should
    /// drop the notification); inserts it otherwise.
    pub fn seen_or_insert(&self, event_id: &str) -> bool {
        let mut guard = self.seen.lock();
        if guard.0.contains(event_id) {
            return true;
        }
        guard.0.insert(event_id.to_string());
        guard.1.push_back(event_id.to_string());

        if guard.1.len() > self.capacity {
            let evict = guard.1.len() / 2;
            for _ in 0..evict {
                if let Some(old) = guard.1.pop_front() {
                    guard.0.remove(&old);
                }
            }
        }
        false
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.lock().1.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_repeated_ids() {
        let set = DedupSet::new(10);
        assert!(!set.seen_or_insert("a"));
        assert!(set.seen_or_insert("a"));
    }

    #[test]
    fn evicts_oldest_half_on_overflow() {
        let set = DedupSet::new(4);
        for i in 0..4 {
            assert!(!set.seen_or_insert(&i.to_string()));
        }
        assert_eq!(set.len(), 4);
        // Fifth insert overflows capacity, triggering eviction of the oldest 2.
        assert!(!set.seen_or_insert("4"));
        assert!(set.len() <= 4);
        // The earliest ids should now be forgotten and re-insertable as "new".
        assert!(!set.seen_or_insert("0"));
    }
}
