//! Per-path limits on concurrent content writes.
//!
//! Each layout path gets one [`Semaphore`], created on first use with the
//! configured capacity and shared by every caller writing under that path.
//! Callers hold a permit for the duration of a blob or manifest write:
//!
//! ```no_run
//! # async fn f(dir: &ocistore::OciDir, r: &ocistore::Reference) {
//! if let Some(throttle) = dir.throttle(r, true) {
//!     let _permit = throttle.acquire_owned().await.unwrap();
//!     // write the blob; the permit is released when dropped
//! }
//! # }
//! ```
//!
//! Semaphores are never evicted, so a process touching many distinct paths
//! keeps one per path for its lifetime.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Semaphore;

#[derive(Debug)]
pub struct ThrottleMap {
    capacity: usize,
    throttles: HashMap<String, Arc<Semaphore>>,
}

impl ThrottleMap {
    /// A capacity of zero disables throttling.  Capacities beyond what a
    /// semaphore can hold are clamped to [`Semaphore::MAX_PERMITS`].
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(Semaphore::MAX_PERMITS),
            throttles: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The semaphore for `path`, or `None` when throttling is disabled.
    pub fn get(&mut self, path: &str) -> Option<Arc<Semaphore>> {
        if self.capacity == 0 {
            return None;
        }
        let capacity = self.capacity;
        let throttle = self
            .throttles
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(capacity)));
        Some(Arc::clone(throttle))
    }
}
