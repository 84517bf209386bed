//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server and its static settings
//! - Track failures and the failure timeout window
//! - Track the smooth weighted round robin `current_weight`
//! - Decay the effective weight on failures
//!
//! Load counters are not stored here; they live in the shared zone so
//! every worker sees them. Everything on this type is worker-local.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::BackendConfig;

/// Result of consuming one unit of a backend's current weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightTick {
    /// The weight was exhausted and has been refilled; skip this backend
    /// for this round.
    Refilled,
    /// One unit was spent; carries the weight held before spending it.
    Spent(u32),
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Human readable name.
    pub name: String,
    /// The address of the backend.
    pub addr: SocketAddr,
    /// Static weight (at least 1).
    pub weight: u32,
    /// Failures tolerated within `fail_timeout` before the backend is
    /// skipped. Zero disables failure accounting.
    pub max_fails: u32,
    /// How long a failed-out backend is skipped.
    pub fail_timeout: Duration,
    /// Administratively disabled.
    pub down: bool,

    current_weight: AtomicU32,
    fails: AtomicU32,
    last_failure_ms: AtomicU64,
}

impl Backend {
    /// Create a new backend with one failure allowed per ten seconds.
    pub fn new(addr: SocketAddr, weight: u32) -> Self {
        let weight = weight.max(1);
        Self {
            name: addr.to_string(),
            addr,
            weight,
            max_fails: 1,
            fail_timeout: Duration::from_secs(10),
            down: false,
            current_weight: AtomicU32::new(weight),
            fails: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
        }
    }

    /// Build a backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> Result<Self, std::net::AddrParseError> {
        let addr: SocketAddr = config.address.parse()?;
        let mut backend = Self::new(addr, config.weight)
            .with_max_fails(config.max_fails)
            .with_fail_timeout(Duration::from_millis(config.fail_timeout_ms))
            .with_down(config.down);
        if !config.name.is_empty() {
            backend.name = config.name.clone();
        }
        Ok(backend)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_fails(mut self, max_fails: u32) -> Self {
        self.max_fails = max_fails;
        self
    }

    pub fn with_fail_timeout(mut self, fail_timeout: Duration) -> Self {
        self.fail_timeout = fail_timeout;
        self
    }

    pub fn with_down(mut self, down: bool) -> Self {
        self.down = down;
        self
    }

    pub fn current_weight(&self) -> u32 {
        self.current_weight.load(Ordering::Relaxed)
    }

    pub fn fails(&self) -> u32 {
        self.fails.load(Ordering::Relaxed)
    }

    pub fn last_failure_ms(&self) -> u64 {
        self.last_failure_ms.load(Ordering::Relaxed)
    }

    /// Health check used by every scan.
    ///
    /// A backend is usable when it is not `down` and either has fewer than
    /// `max_fails` failures or its `fail_timeout` has run out since the last
    /// failure. In the latter case the failure count starts over.
    pub fn check_available(&self, now_ms: u64) -> bool {
        if self.down {
            return false;
        }
        if self.max_fails == 0 || self.fails() < self.max_fails {
            return true;
        }
        let since_failure = now_ms.saturating_sub(self.last_failure_ms());
        if since_failure > self.fail_timeout.as_millis() as u64 {
            self.fails.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Spend one unit of `current_weight`, refilling it from `weight` when
    /// it has run out.
    pub fn take_weight(&self) -> WeightTick {
        let weight = self.weight;
        let prev = self
            .current_weight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cw| {
                Some(if cw == 0 { weight } else { cw - 1 })
            })
            .unwrap_or(weight);
        if prev == 0 {
            WeightTick::Refilled
        } else {
            WeightTick::Spent(prev)
        }
    }

    /// Failure bookkeeping: count it, stamp it, and decay the current weight
    /// by `weight / max_fails` (never below zero).
    pub fn record_failure(&self, now_ms: u64) {
        self.fails.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);

        if self.max_fails > 0 {
            let decay = self.weight / self.max_fails;
            let _ = self
                .current_weight
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cw| {
                    Some(cw.saturating_sub(decay))
                });
        }
    }

    /// Forget all failures.
    pub fn reset_fails(&self) {
        self.fails.store(0, Ordering::Relaxed);
    }
}
