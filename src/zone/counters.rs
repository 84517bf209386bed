//! Per-backend load counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Size reserved for one counter record inside the zone.
pub const COUNTER_SIZE: usize = std::mem::size_of::<LoadCounter>();

/// Live load figures for one backend, shared by every worker.
///
/// `pending` and `last_active_ms` are updated independently. A reader may see
/// a fresh count with a stale timestamp (or the reverse); scoring treats the
/// pair as a best-effort snapshot.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct LoadCounter {
    /// In-flight requests. Wraps on an unmatched decrement, which scoring
    /// detects through its sanity ceiling.
    pending: AtomicU64,
    /// Last dispatch time in milliseconds since the Unix epoch.
    last_active_ms: AtomicU64,
}

/// A point-in-time copy of a [`LoadCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSnapshot {
    pub pending: u64,
    pub last_active_ms: u64,
}

impl LoadCounter {
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn last_active_ms(&self) -> u64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            pending: self.pending(),
            last_active_ms: self.last_active_ms(),
        }
    }

    /// Record a dispatch: one more request in flight, active as of `now_ms`.
    pub fn begin(&self, now_ms: u64) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.last_active_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Record a completion.
    pub fn finish(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    /// Overwrite both fields. Used when seeding counters in tests and tools.
    pub fn store(&self, pending: u64, last_active_ms: u64) {
        self.pending.store(pending, Ordering::Relaxed);
        self.last_active_ms.store(last_active_ms, Ordering::Relaxed);
    }
}

/// One counter per backend of a group, addressed by backend index.
pub type CounterBlock = Arc<[LoadCounter]>;

pub(crate) fn new_block(backends: usize) -> CounterBlock {
    (0..backends).map(|_| LoadCounter::default()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_cache_line_sized() {
        assert_eq!(COUNTER_SIZE, 64);
        assert_eq!(std::mem::align_of::<LoadCounter>(), 64);
    }

    #[test]
    fn test_begin_and_finish() {
        let counter = LoadCounter::default();
        counter.begin(500);
        counter.begin(700);
        assert_eq!(counter.snapshot(), LoadSnapshot { pending: 2, last_active_ms: 700 });

        counter.finish();
        assert_eq!(counter.pending(), 1);
        // Completion does not touch the activity stamp.
        assert_eq!(counter.last_active_ms(), 700);
    }

    #[test]
    fn test_unmatched_finish_wraps() {
        let counter = LoadCounter::default();
        counter.finish();
        assert_eq!(counter.pending(), u64::MAX);
    }

    #[test]
    fn test_block_has_one_counter_per_backend() {
        let block = new_block(3);
        assert_eq!(block.len(), 3);
        assert!(block.iter().all(|c| c.pending() == 0 && c.last_active_ms() == 0));
    }
}
