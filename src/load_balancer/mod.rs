//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives for an upstream
//!     → pool.rs (Upstream::new_request: cursor, tried set, tries)
//!     → Apply load balancing algorithm:
//!         - fair.rs (idle-first, then weighted best score from shared counters)
//!         - round_robin.rs (fallback rotation when no counters are available)
//!     → peer.rs (PeerGuard: pending++ on dispatch, pending-- and health on completion)
//!     → Return backend or Busy
//! ```
//!
//! # Design Decisions
//! - Backend health (fails, current weight) is worker-local; load is shared
//! - Algorithm is chosen per upstream when a worker builds its view
//! - Unhealthy backends are skipped, and a fully busy pool resets its fails
//! - Scoring is a pure function so it can be tested on its own

use std::fmt;

pub mod backend;
pub mod fair;
pub mod peer;
pub mod pool;
pub mod round_robin;
pub mod score;

pub use backend::Backend;
pub use fair::{FairBalancer, WeightMode};
pub use peer::{Busy, PeerGuard, PeerOutcome, RequestPeerState};
pub use pool::{BackendGroup, Upstream, UpstreamManager};
pub use round_robin::RoundRobin;

/// A peer selection strategy.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Choose a backend index for the request, or report `Busy`.
    fn select_peer(
        &self,
        group: &BackendGroup,
        state: &mut RequestPeerState,
        now_ms: u64,
    ) -> Result<usize, Busy>;

    /// Admission hook, called once the chosen backend is dispatched to.
    fn on_dispatch(&self, _index: usize, _now_ms: u64) {}

    /// Called when the attempt on `index` ends, whatever the outcome.
    fn on_release(&self, _index: usize) {}
}
