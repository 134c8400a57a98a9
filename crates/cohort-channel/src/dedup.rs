use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Bounded window of recently seen message ids.
///
/// At-least-once delivery means a consumer may see the same message twice;
/// feeding every id through [`Deduplicator::first_seen`] makes handling
/// idempotent for the size of the window.
#[derive(Debug)]
pub struct Deduplicator {
    capacity: usize,
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
}

impl Deduplicator {
    /// A window remembering the last `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Records `id` and returns `true` if it was not already in the window.
    pub fn first_seen(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Whether `id` is in the window, without recording it.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    /// Ids currently in the window.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_rejected() {
        let mut dedup = Deduplicator::new(4);
        let id = Uuid::new_v4();
        assert!(dedup.first_seen(id));
        assert!(!dedup.first_seen(id));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut dedup = Deduplicator::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(dedup.first_seen(*id));
        }
        assert_eq!(dedup.len(), 2);
        assert!(!dedup.contains(&ids[0]));
        assert!(dedup.contains(&ids[1]));
        // The first id fell out of the window.
        assert!(dedup.first_seen(ids[0]));
        assert!(!dedup.first_seen(ids[2]));
    }
}
