//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FairConfig (validated, immutable)
//!     → lifecycle::Runtime (one generation per accepted config)
//!
//! On reload:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Runtime::reload (new generation, zone size pinned)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes produce a new generation
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::BackendConfig;
pub use schema::FairConfig;
pub use schema::ObservabilityConfig;
pub use schema::SchedulerConfig;
pub use schema::SharedZoneConfig;
pub use schema::SimulationConfig;
pub use schema::UpstreamConfig;
