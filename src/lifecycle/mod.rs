//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Allocate shared zone → Generation 1 → Workers build upstreams
//!
//! Reload (startup.rs):
//!     New config → Keep zone size → Bump generation → Workers re-acquire on refresh
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast stop → Workers drain → Zone torn down
//!
//! Signals (signals.rs):
//!     SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The zone is allocated once per process and never resized
//! - A reload never blocks workers; they pick up the new generation lazily
//! - Teardown is explicit, not tied to drop order

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Runtime, Worker};
