//! Shared load counter zone.
//!
//! # Data Flow
//! ```text
//! Worker initialises an upstream for generation G
//!     → store.rs (lock directory, sweep superseded entries, find or allocate)
//!     → CounterHandle (one LoadCounter per backend)
//!
//! Per request (no lock):
//!     → counters.rs (atomic pending++ / timestamp on dispatch, pending-- on completion)
//! ```
//!
//! # Design Decisions
//! - One fixed-capacity zone per process group, sized once at startup
//! - Directory is an ordered map keyed by (generation, upstream name)
//! - Garbage collection rides on `acquire`; there is no background sweeper
//! - Counter records are cache-line aligned so neighbours never share a line

pub mod counters;
pub mod store;

pub use counters::{LoadCounter, LoadSnapshot};
pub use store::{CounterHandle, Generation, SharedZone, ZoneError, ZoneKey, ZoneSize, ZoneStats};
