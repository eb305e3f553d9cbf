//! Per-path garbage collection bookkeeping.
//!
//! A GC lock is advisory: it blocks nobody, it only tells a collector that
//! content under the path may be about to be referenced and must not be
//! reclaimed.  The modified flag records that content under the path changed
//! since the index was last known to be good, which is what makes a sweep
//! worthwhile.
//!
//! Entries are created on first use and live as long as the tracker.

use std::collections::HashMap;

/// Snapshot of the GC state of one layout path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcState {
    /// Outstanding holders preventing collection.
    pub locks: usize,
    /// Content changed since the last successful sweep.
    pub modified: bool,
}

impl GcState {
    /// A sweep may run: nobody holds a lock and there is something to do.
    pub fn collectable(&self) -> bool {
        self.locks == 0 && self.modified
    }
}

/// GC state keyed by normalized layout path.
#[derive(Debug, Default)]
pub struct GcTracker {
    refs: HashMap<String, GcState>,
}

impl GcTracker {
    pub fn lock(&mut self, path: &str) {
        self.refs.entry(path.to_string()).or_default().locks += 1;
    }

    /// Releases one lock.  Unlocking an untracked or unlocked path is a no-op.
    pub fn unlock(&mut self, path: &str) {
        if let Some(state) = self.refs.get_mut(path) {
            state.locks = state.locks.saturating_sub(1);
        }
    }

    pub fn mark_modified(&mut self, path: &str) {
        self.refs.entry(path.to_string()).or_default().modified = true;
    }

    pub fn clear_modified(&mut self, path: &str) {
        if let Some(state) = self.refs.get_mut(path) {
            state.modified = false;
        }
    }

    pub fn get(&self, path: &str) -> GcState {
        self.refs.get(path).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_lock_balance() {
        let mut gc = GcTracker::default();
        gc.lock("a");
        gc.lock("a");
        assert_eq!(gc.get("a").locks, 2);
        gc.unlock("a");
        gc.unlock("a");
        assert_eq!(gc.get("a").locks, 0);

        // extra unlocks neither underflow nor create entries
        gc.unlock("a");
        gc.unlock("untracked");
        assert_eq!(gc.get("a").locks, 0);
        assert_eq!(gc.get("untracked"), GcState::default());
        assert!(!gc.refs.contains_key("untracked"));
    }

    #[test]
    fn test_modified() {
        let mut gc = GcTracker::default();
        gc.mark_modified("a");
        assert_eq!(
            gc.get("a"),
            GcState {
                locks: 0,
                modified: true
            }
        );
        assert!(gc.get("a").collectable());

        gc.lock("a");
        assert!(!gc.get("a").collectable());
        gc.unlock("a");

        gc.clear_modified("a");
        assert!(!gc.get("a").collectable());
        assert!(!gc.get("b").modified);
    }
}
