//! Per-request peer state and the dispatch/completion hooks.
//!
//! # Responsibilities
//! - Carry the scan cursor, retry budget and "tried" set of one request
//! - Account a dispatch in the shared counters (admission hook)
//! - Undo it on completion and feed failures back into backend health
//!   (completion hook)
//!
//! # Design Decisions
//! - `PeerGuard` is RAII: dropping it without `complete` still releases
//!   the pending count, so abandoned requests do not leak load
//! - The retry budget is owned by the request, not the balancer

use std::sync::Arc;

use thiserror::Error;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::Upstream;

/// No backend can take the request right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no backend available")]
pub struct Busy;

/// How a backend attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    Success,
    Failure,
}

/// Bitmask of backends already rejected by one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriedSet {
    bits: Vec<u64>,
}

impl TriedSet {
    pub fn new(backends: usize) -> Self {
        Self {
            bits: vec![0; backends.div_ceil(64)],
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn insert(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word |= 1 << (index % 64);
        }
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }
}

/// Routing state of one request.
#[derive(Debug, Clone)]
pub struct RequestPeerState {
    current: usize,
    tried: TriedSet,
    tries: u32,
}

impl RequestPeerState {
    /// Fresh state for a pool of `backends` backends with one try per
    /// backend. `start` is the cursor position before the first scan.
    pub fn new(start: usize, backends: usize) -> Self {
        Self {
            current: if backends == 0 { 0 } else { start % backends },
            tried: TriedSet::new(backends),
            tries: backends as u32,
        }
    }

    /// Override the retry budget.
    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Remaining attempts for this request.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn tried(&self) -> &TriedSet {
        &self.tried
    }

    pub fn is_tried(&self, index: usize) -> bool {
        self.tried.contains(index)
    }

    pub fn mark_tried(&mut self, index: usize) {
        self.tried.insert(index);
    }

    pub(crate) fn advance(&mut self, backends: usize) {
        if backends > 0 {
            self.current = (self.current + 1) % backends;
        }
    }

    pub(crate) fn set_current(&mut self, index: usize) {
        self.current = index;
    }

    /// Spend one try. Returns `false` once the budget is gone.
    pub(crate) fn consume_try(&mut self) -> bool {
        self.tries = self.tries.saturating_sub(1);
        self.tries > 0
    }

    pub(crate) fn clear_tries(&mut self) {
        self.tries = 0;
    }
}

/// A dispatched request on one backend.
///
/// Created by [`Upstream::get_peer`], which already ran the admission hook.
/// Call [`PeerGuard::complete`] with the outcome; dropping the guard instead
/// only releases the pending count.
#[derive(Debug)]
pub struct PeerGuard {
    upstream: Arc<Upstream>,
    index: usize,
    finished: bool,
}

impl PeerGuard {
    pub(crate) fn new(upstream: Arc<Upstream>, index: usize) -> Self {
        Self {
            upstream,
            index,
            finished: false,
        }
    }

    /// Index of the chosen backend within its group.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn backend(&self) -> &Backend {
        &self.upstream.group().backends()[self.index]
    }

    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.upstream
    }

    /// Run the completion hook.
    pub fn complete(mut self, state: &mut RequestPeerState, outcome: PeerOutcome) {
        self.finished = true;
        self.upstream.complete(self.index, state, outcome);
    }
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.upstream.abandon(self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tried_set() {
        let mut tried = TriedSet::new(130);
        assert!(tried.is_empty());
        tried.insert(0);
        tried.insert(64);
        tried.insert(129);
        tried.insert(500); // out of range, ignored
        assert!(tried.contains(0));
        assert!(tried.contains(64));
        assert!(tried.contains(129));
        assert!(!tried.contains(1));
        assert!(!tried.contains(500));
        assert_eq!(tried.len(), 3);
    }

    #[test]
    fn test_state_cursor_wraps() {
        let mut state = RequestPeerState::new(7, 3);
        assert_eq!(state.current(), 1);
        state.advance(3);
        state.advance(3);
        assert_eq!(state.current(), 0);
        assert_eq!(state.tries(), 3);
    }

    #[test]
    fn test_consume_try() {
        let mut state = RequestPeerState::new(0, 4).with_tries(2);
        assert!(state.consume_try());
        assert!(!state.consume_try());
        assert!(!state.consume_try());
        assert_eq!(state.tries(), 0);
    }
}
