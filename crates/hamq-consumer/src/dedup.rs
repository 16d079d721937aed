//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Dual-endpoint consumption pipeline and dedup tracking."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::collections::HashSet;

use hamq_msg::CorrelationId;
use parking_lot::Mutex;

/// Set of correlation ids already processed by any pipeline.
///
/// Grows for the lifetime of the process; there is no eviction.
#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: Mutex<HashSet<CorrelationId>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` processed and report whether it already was.
    ///
    /// Membership test and insert happen under one lock acquisition, so of
    /// any number of concurrent callers with the same id exactly one sees
    /// `false`.
    pub fn check_and_mark(&self, id: CorrelationId) -> bool {
        !self.seen.lock().insert(id)
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.seen.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Explicitly allow `id` to be processed again. Never called by the pipeline.
    pub fn forget(&self, id: &CorrelationId) -> bool {
        self.seen.lock().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn second_mark_reports_presence() {
        let tracker = DedupTracker::new();
        let id = CorrelationId::new();
        assert!(!tracker.check_and_mark(id));
        assert!(tracker.check_and_mark(id));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.forget(&id));
        assert!(!tracker.check_and_mark(id));
    }

    #[test]
    fn concurrent_marks_admit_a_single_winner_per_id() {
        let tracker = Arc::new(DedupTracker::new());
        let ids: Arc<Vec<CorrelationId>> = Arc::new((0..256).map(|_| CorrelationId::new()).collect());
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                let ids = ids.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    for id in ids.iter() {
                        if !tracker.check_and_mark(*id) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("thread");
        }

        assert_eq!(winners.load(Ordering::SeqCst), ids.len());
        assert_eq!(tracker.len(), ids.len());
    }

    proptest! {
        #[test]
        fn first_sightings_equal_distinct_ids(picks in proptest::collection::vec(0usize..16, 0..128)) {
            let pool: Vec<CorrelationId> = (0..16).map(|_| CorrelationId::new()).collect();
            let tracker = DedupTracker::new();
            let first = picks
                .iter()
                .filter(|index| !tracker.check_and_mark(pool[**index]))
                .count();
            let distinct: HashSet<usize> = picks.iter().copied().collect();
            prop_assert_eq!(first, distinct.len());
            prop_assert_eq!(tracker.len(), distinct.len());
        }
    }
}
