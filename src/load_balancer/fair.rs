//! Fair (load aware) peer selection.
//!
//! # Algorithm
//! ```text
//! single backend           → return it, nothing else consulted
//! advance cursor by one
//! idle-first scan          → first untried, healthy backend with no
//!                            pending requests wins
//! health filtering         → skip unhealthy backends, spending tries
//! weighted best-score scan → start from the first healthy backend
//!                            (weighted by its static weight), walk the
//!                            ring spending `current_weight`; stop at the
//!                            first backend that does not beat the
//!                            running best
//! ```
//!
//! The early stop trades optimality for a short average scan. Because the
//! cursor rotates between requests, backends with equal scores still take
//! turns.

use serde::{Deserialize, Serialize};

use crate::load_balancer::backend::{Backend, WeightTick};
use crate::load_balancer::peer::{Busy, RequestPeerState};
use crate::load_balancer::pool::BackendGroup;
use crate::load_balancer::score::{apply_weight, raw_score, Score, ScoreParams};
use crate::load_balancer::LoadBalancer;
use crate::zone::{CounterHandle, LoadSnapshot};

/// How backend weights interact with the live pending counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMode {
    /// Idle means no pending requests; weights only bias scoring.
    #[default]
    Normal,
    /// A backend counts as idle while it has fewer pending requests than
    /// its weight.
    Idle,
    /// A backend never holds more than `weight` pending requests from this
    /// scheduler; at its weight it is skipped like an unhealthy one.
    Peak,
}

/// Load-aware balancer backed by shared counters.
#[derive(Debug)]
pub struct FairBalancer {
    counters: CounterHandle,
    params: ScoreParams,
    mode: WeightMode,
}

impl FairBalancer {
    pub fn new(counters: CounterHandle, params: ScoreParams, mode: WeightMode) -> Self {
        Self {
            counters,
            params,
            mode,
        }
    }

    pub fn counters(&self) -> &CounterHandle {
        &self.counters
    }

    pub fn weight_mode(&self) -> WeightMode {
        self.mode
    }

    fn load(&self, index: usize) -> LoadSnapshot {
        self.counters
            .get(index)
            .map(|c| c.snapshot())
            .unwrap_or(LoadSnapshot {
                pending: 0,
                last_active_ms: 0,
            })
    }

    fn is_idle(&self, backend: &Backend, load: &LoadSnapshot) -> bool {
        match self.mode {
            WeightMode::Idle => load.pending < u64::from(backend.weight),
            WeightMode::Normal | WeightMode::Peak => load.pending == 0,
        }
    }

    fn is_usable(&self, backend: &Backend, load: &LoadSnapshot, now_ms: u64) -> bool {
        if self.mode == WeightMode::Peak && load.pending >= u64::from(backend.weight) {
            return false;
        }
        backend.check_available(now_ms)
    }

    fn raw(&self, load: &LoadSnapshot, now_ms: u64) -> Score {
        let since = now_ms as i64 - load.last_active_ms as i64;
        raw_score(load.pending, since, &self.params)
    }
}

fn pick(state: &mut RequestPeerState, index: usize) -> usize {
    state.set_current(index);
    state.mark_tried(index);
    index
}

impl LoadBalancer for FairBalancer {
    fn name(&self) -> &'static str {
        "fair"
    }

    fn select_peer(
        &self,
        group: &BackendGroup,
        state: &mut RequestPeerState,
        now_ms: u64,
    ) -> Result<usize, Busy> {
        let n = group.len();
        let backends = group.backends();
        match n {
            0 => return Err(Busy),
            1 => return Ok(pick(state, 0)),
            _ => {}
        }

        state.advance(n);
        let start = state.current();

        for offset in 0..n {
            let i = (start + offset) % n;
            if state.is_tried(i) {
                continue;
            }
            let load = self.load(i);
            if self.is_idle(&backends[i], &load) && self.is_usable(&backends[i], &load, now_ms) {
                return Ok(pick(state, i));
            }
        }

        // Nobody idle: find the first healthy backend, spending a try on
        // every unhealthy one passed on the way.
        let mut first = None;
        let mut i = start;
        for _ in 0..n {
            if !state.is_tried(i) {
                if self.is_usable(&backends[i], &self.load(i), now_ms) {
                    first = Some(i);
                    break;
                }
                state.mark_tried(i);
                if !state.consume_try() {
                    return Err(Busy);
                }
            }
            i = (i + 1) % n;
        }
        let Some(first) = first else {
            return Err(Busy);
        };

        let mut best = first;
        let mut best_score =
            apply_weight(self.raw(&self.load(first), now_ms), backends[first].weight);
        let mut i = first;
        for _ in 1..n {
            i = (i + 1) % n;
            if state.is_tried(i) {
                continue;
            }
            let backend = &backends[i];
            let load = self.load(i);
            if !self.is_usable(backend, &load, now_ms) {
                state.mark_tried(i);
                if !state.consume_try() {
                    return Err(Busy);
                }
                continue;
            }
            let weight = match backend.take_weight() {
                WeightTick::Refilled => continue,
                WeightTick::Spent(weight) => weight,
            };
            let score = apply_weight(self.raw(&load, now_ms), weight);
            if score <= best_score {
                break;
            }
            best = i;
            best_score = score;
        }

        Ok(pick(state, best))
    }

    fn on_dispatch(&self, index: usize, now_ms: u64) {
        if let Some(counter) = self.counters.get(index) {
            counter.begin(now_ms);
        }
    }

    fn on_release(&self, index: usize) {
        if let Some(counter) = self.counters.get(index) {
            counter.finish();
        }
    }
}
