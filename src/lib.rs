//! Load-aware ("fair") peer selection for reverse proxy upstreams.
//!
//! Backends are ranked by how many requests they are serving right now and
//! how long ago they last received one. The counters behind that ranking
//! live in a zone shared by every worker and are versioned by configuration
//! generation, so a reload can build new counters while requests on the old
//! ones drain.

pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod simulation;
pub mod zone;

pub use config::FairConfig;
pub use lifecycle::{Runtime, Shutdown, Worker};
pub use load_balancer::{Busy, PeerGuard, PeerOutcome, RequestPeerState, Upstream};
