//! Counter store directory with piggybacked garbage collection.
//!
//! # Responsibilities
//! - Own the fixed zone capacity and account every counter block against it
//! - Hand out one shared counter block per (generation, upstream)
//! - Reference count the blocks and reclaim superseded generations
//!
//! # Design Decisions
//! - A single mutex guards the directory; it is only taken when a worker
//!   initialises an upstream, never per request
//! - Every `acquire` walks the whole directory once. Entries of any other
//!   generation lose one reference per walk and are freed when they reach
//!   zero, so reclaim cost is bounded by directory size and paid by lookups
//! - Handles carry no release call: a generation that stops acquiring is
//!   drained by the walks of its successors
//! - Exhaustion is reported once per upstream name and returned to the
//!   caller, which falls back to plain rotation

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::observability::metrics;
use crate::zone::counters::{new_block, CounterBlock, LoadCounter, COUNTER_SIZE};

/// Page granularity of the zone size knob.
pub const PAGE_SIZE: usize = 4096;

/// Smallest accepted zone, in pages.
pub const MIN_ZONE_PAGES: usize = 8;

/// Bookkeeping charged per directory entry on top of its counters.
pub const ENTRY_OVERHEAD: usize = 64;

/// A configuration epoch. Every reload gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Generation {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Validated zone capacity in bytes: at least [`MIN_ZONE_PAGES`] pages and
/// a whole number of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneSize(usize);

impl ZoneSize {
    pub const MIN: ZoneSize = ZoneSize(PAGE_SIZE * MIN_ZONE_PAGES);

    /// Returns `None` when `bytes` is below the minimum, otherwise the size
    /// rounded up to the next page boundary.
    pub fn new(bytes: usize) -> Option<Self> {
        if bytes < Self::MIN.0 {
            return None;
        }
        let pages = bytes.div_ceil(PAGE_SIZE);
        Some(Self(pages * PAGE_SIZE))
    }

    pub fn bytes(self) -> usize {
        self.0
    }
}

impl Default for ZoneSize {
    fn default() -> Self {
        Self::MIN
    }
}

/// Directory key: which generation, which upstream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneKey {
    pub generation: Generation,
    pub group: Arc<str>,
}

impl ZoneKey {
    pub fn new(generation: Generation, group: &str) -> Self {
        Self {
            generation,
            group: Arc::from(group),
        }
    }
}

/// Errors surfaced by the zone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ZoneError {
    /// Not enough room left for another counter block.
    #[error("shared zone exhausted: {requested} bytes requested, {available} of {capacity} available")]
    Exhausted {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// The key already holds a block sized for a different pool.
    #[error("counter block for this upstream holds {existing} backends, {requested} requested")]
    SizeMismatch { existing: usize, requested: usize },

    /// The zone was torn down at shutdown.
    #[error("shared zone has been torn down")]
    Closed,
}

/// Occupancy figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStats {
    pub capacity: usize,
    pub used: usize,
    pub entries: usize,
}

#[derive(Debug)]
struct ZoneEntry {
    counters: CounterBlock,
    refcount: usize,
    bytes: usize,
}

#[derive(Debug, Default)]
struct ZoneState {
    directory: BTreeMap<ZoneKey, ZoneEntry>,
    used: usize,
    /// Upstreams already warned about exhaustion.
    warned: HashSet<Arc<str>>,
    closed: bool,
}

/// The shared counter store.
#[derive(Debug)]
pub struct SharedZone {
    capacity: usize,
    state: Mutex<ZoneState>,
}

/// A worker's reference to one counter block.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    key: ZoneKey,
    counters: CounterBlock,
}

impl CounterHandle {
    pub fn key(&self) -> &ZoneKey {
        &self.key
    }

    pub fn counters(&self) -> &[LoadCounter] {
        &self.counters
    }

    pub fn get(&self, index: usize) -> Option<&LoadCounter> {
        self.counters.get(index)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// True when both handles address the same counter block.
    pub fn shares_block_with(&self, other: &CounterHandle) -> bool {
        Arc::ptr_eq(&self.counters, &other.counters)
    }
}

impl SharedZone {
    /// Create an empty zone of the given capacity.
    pub fn new(size: ZoneSize) -> Self {
        Self {
            capacity: size.bytes(),
            state: Mutex::new(ZoneState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, ZoneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes a block for `backends` backends occupies.
    pub fn block_bytes(backends: usize) -> usize {
        backends * COUNTER_SIZE + ENTRY_OVERHEAD
    }

    /// Find or allocate the counter block for `(generation, group)`.
    ///
    /// The directory walk that performs the lookup also drops one reference
    /// from every entry of an older generation and frees those that reach
    /// zero. Newer generations are left alone, so a worker that initialises
    /// late with a stale generation cannot drain its successor.
    pub fn acquire(
        &self,
        generation: Generation,
        group: &str,
        backends: usize,
    ) -> Result<CounterHandle, ZoneError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ZoneError::Closed);
        }

        let key = ZoneKey::new(generation, group);
        let mut found = None;
        let mut freed = 0usize;
        {
            let ZoneState { directory, used, .. } = &mut *state;
            directory.retain(|entry_key, entry| {
                if entry_key.generation < generation {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 {
                        *used -= entry.bytes;
                        freed += 1;
                        tracing::debug!(
                            generation = %entry_key.generation,
                            upstream = %entry_key.group,
                            bytes = entry.bytes,
                            "Freed superseded counter block"
                        );
                        return false;
                    }
                } else if *entry_key == key {
                    if entry.counters.len() == backends {
                        entry.refcount += 1;
                        found = Some(Ok(entry.counters.clone()));
                    } else {
                        found = Some(Err(entry.counters.len()));
                    }
                }
                true
            });
        }

        let handle = match found {
            Some(Ok(counters)) => CounterHandle { key, counters },
            Some(Err(existing)) => {
                tracing::warn!(
                    upstream = %key.group,
                    generation = %generation,
                    existing,
                    requested = backends,
                    "Counter block size does not match the pool"
                );
                return Err(ZoneError::SizeMismatch {
                    existing,
                    requested: backends,
                });
            }
            None => {
                let requested = Self::block_bytes(backends);
                let available = self.capacity - state.used;
                if requested > available {
                    if state.warned.insert(key.group.clone()) {
                        tracing::warn!(
                            upstream = %key.group,
                            generation = %generation,
                            requested,
                            available,
                            capacity = self.capacity,
                            "Shared zone exhausted, increase shared_zone.size"
                        );
                    }
                    return Err(ZoneError::Exhausted {
                        requested,
                        available,
                        capacity: self.capacity,
                    });
                }

                let counters = new_block(backends);
                state.used += requested;
                state.directory.insert(
                    key.clone(),
                    ZoneEntry {
                        counters: counters.clone(),
                        refcount: 1,
                        bytes: requested,
                    },
                );
                tracing::debug!(
                    upstream = %key.group,
                    generation = %generation,
                    backends,
                    "Allocated counter block"
                );
                CounterHandle { key, counters }
            }
        };

        if freed > 0 {
            tracing::debug!(freed, "Reclaimed superseded counter blocks");
        }
        metrics::record_zone_usage(state.used, state.directory.len());
        Ok(handle)
    }

    /// Current reference count of an entry, if it exists.
    pub fn refcount(&self, generation: Generation, group: &str) -> Option<usize> {
        let key = ZoneKey::new(generation, group);
        self.lock().directory.get(&key).map(|e| e.refcount)
    }

    pub fn stats(&self) -> ZoneStats {
        let state = self.lock();
        ZoneStats {
            capacity: self.capacity,
            used: state.used,
            entries: state.directory.len(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Free every entry and refuse further acquisitions.
    ///
    /// Handles still held by workers keep their counters readable; they are
    /// simply no longer tracked by the zone.
    pub fn teardown(&self) {
        let mut state = self.lock();
        let entries = state.directory.len();
        state.directory.clear();
        state.used = 0;
        state.closed = true;
        metrics::record_zone_usage(0, 0);
        tracing::info!(entries, "Shared zone torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(pages: usize) -> SharedZone {
        SharedZone::new(ZoneSize::new(pages * PAGE_SIZE).unwrap())
    }

    #[test]
    fn test_zone_size_rounding() {
        assert_eq!(ZoneSize::new(PAGE_SIZE * 8 - 1), None);
        assert_eq!(ZoneSize::new(PAGE_SIZE * 8).unwrap().bytes(), PAGE_SIZE * 8);
        assert_eq!(ZoneSize::new(PAGE_SIZE * 8 + 1).unwrap().bytes(), PAGE_SIZE * 9);
        assert_eq!(ZoneSize::default(), ZoneSize::MIN);
    }

    #[test]
    fn test_same_key_shares_block() {
        let zone = zone(8);
        let a = zone.acquire(Generation(1), "web", 3).unwrap();
        let b = zone.acquire(Generation(1), "web", 3).unwrap();

        assert!(a.shares_block_with(&b));
        assert_eq!(zone.refcount(Generation(1), "web"), Some(2));
        assert_eq!(zone.stats().entries, 1);

        a.counters()[1].begin(42);
        assert_eq!(b.counters()[1].pending(), 1);
    }

    #[test]
    fn test_groups_get_separate_blocks() {
        let zone = zone(8);
        let web = zone.acquire(Generation(1), "web", 2).unwrap();
        let api = zone.acquire(Generation(1), "api", 2).unwrap();
        assert!(!web.shares_block_with(&api));
        assert_eq!(zone.stats().entries, 2);
        assert_eq!(zone.stats().used, 2 * SharedZone::block_bytes(2));
    }

    #[test]
    fn test_new_generation_drains_old_entry() {
        let zone = zone(8);
        let _w1 = zone.acquire(Generation(1), "web", 2).unwrap();
        let _w2 = zone.acquire(Generation(1), "web", 2).unwrap();
        assert_eq!(zone.refcount(Generation(1), "web"), Some(2));

        // First worker of generation 2 drops one reference from the old block.
        let n1 = zone.acquire(Generation(2), "web", 2).unwrap();
        assert_eq!(zone.refcount(Generation(1), "web"), Some(1));

        // Second worker drains it.
        let n2 = zone.acquire(Generation(2), "web", 2).unwrap();
        assert_eq!(zone.refcount(Generation(1), "web"), None);
        assert!(n1.shares_block_with(&n2));

        let stats = zone.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.used, SharedZone::block_bytes(2));
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let zone = zone(8);
        // One counter record is 64 bytes; 8 pages hold 511 records plus overhead.
        let big = (zone.capacity() - ENTRY_OVERHEAD) / COUNTER_SIZE;
        let _full = zone.acquire(Generation(1), "big", big).unwrap();

        let err = zone.acquire(Generation(1), "small", 4).unwrap_err();
        assert!(matches!(err, ZoneError::Exhausted { available: 0, .. }));

        // Repeated failures keep failing without touching the directory.
        assert!(zone.acquire(Generation(1), "small", 4).is_err());
        assert_eq!(zone.stats().entries, 1);
    }

    #[test]
    fn test_exhaustion_clears_after_old_generation_is_reclaimed() {
        let zone = zone(8);
        let big = (zone.capacity() - ENTRY_OVERHEAD) / COUNTER_SIZE;
        let _old = zone.acquire(Generation(1), "big", big).unwrap();

        // The walk frees the only reference to generation 1 before allocating.
        let fresh = zone.acquire(Generation(2), "big", big).unwrap();
        assert_eq!(fresh.len(), big);
        assert_eq!(zone.stats().entries, 1);
    }

    #[test]
    fn test_stale_generation_leaves_newer_entries_alone() {
        let zone = zone(8);
        let first = zone.acquire(Generation(2), "web", 2).unwrap();
        let _second = zone.acquire(Generation(2), "web", 2).unwrap();

        // Workers still initialising the previous generation.
        let _late = zone.acquire(Generation(1), "web", 2).unwrap();
        let _later = zone.acquire(Generation(1), "web", 2).unwrap();
        assert_eq!(zone.refcount(Generation(2), "web"), Some(2));

        let third = zone.acquire(Generation(2), "web", 2).unwrap();
        assert!(third.shares_block_with(&first));
        assert_eq!(zone.refcount(Generation(2), "web"), Some(3));
        // The stale entry is swept by that walk instead.
        assert_eq!(zone.refcount(Generation(1), "web"), Some(1));
    }

    #[test]
    fn test_each_walk_takes_one_reference_per_old_entry() {
        let zone = zone(8);
        for _ in 0..3 {
            zone.acquire(Generation(1), "web", 2).unwrap();
            zone.acquire(Generation(1), "api", 2).unwrap();
        }

        // One worker refreshing both upstreams walks the directory twice.
        zone.acquire(Generation(2), "web", 2).unwrap();
        zone.acquire(Generation(2), "api", 2).unwrap();
        assert_eq!(zone.refcount(Generation(1), "web"), Some(1));
        assert_eq!(zone.refcount(Generation(1), "api"), Some(1));
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let zone = zone(8);
        let _web = zone.acquire(Generation(1), "web", 2).unwrap();

        assert_eq!(
            zone.acquire(Generation(1), "web", 3).unwrap_err(),
            ZoneError::SizeMismatch {
                existing: 2,
                requested: 3
            }
        );
        assert_eq!(zone.refcount(Generation(1), "web"), Some(1));
    }

    #[test]
    fn test_teardown_closes_zone() {
        let zone = zone(8);
        let handle = zone.acquire(Generation(1), "web", 2).unwrap();
        zone.teardown();

        assert!(zone.is_closed());
        assert_eq!(zone.stats().used, 0);
        assert_eq!(zone.acquire(Generation(1), "web", 2).unwrap_err(), ZoneError::Closed);
        // Outstanding handles stay usable.
        handle.counters()[0].begin(1);
        assert_eq!(handle.counters()[0].pending(), 1);
    }
}
