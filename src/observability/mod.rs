//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Zone, balancers, lifecycle produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (upstream, backend, generation) on every event
//! - Metrics are cheap (atomic increments) and safe to call with no
//!   recorder installed
//! - Hot-path events stay at trace/debug level

pub mod logging;
pub mod metrics;
