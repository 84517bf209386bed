//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (zone size, time scale, weights, rates)
//! - Check upstream names are unique and backends parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FairConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::FairConfig;
use crate::zone::store::{ZoneSize, MIN_ZONE_PAGES};

/// Largest accepted `time_scale_ms`; keeps scores well inside `i64`.
pub const MAX_TIME_SCALE_MS: i64 = 1_000_000;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("shared_zone.size {size} is below the minimum of {min} bytes ({pages} pages)")]
    ZoneTooSmall { size: usize, min: usize, pages: usize },

    #[error("scheduler.time_scale_ms must be between 1 and {max}, got {value}")]
    TimeScaleOutOfRange { value: i64, max: i64 },

    #[error("scheduler.skew_fallback_ms must not be negative, got {0}")]
    NegativeSkewFallback(i64),

    #[error("duplicate upstream name '{0}'")]
    DuplicateUpstream(String),

    #[error("upstream '{0}' has no backends")]
    EmptyUpstream(String),

    #[error("upstream '{upstream}': invalid backend address '{address}'")]
    InvalidAddress { upstream: String, address: String },

    #[error("upstream '{upstream}': backend '{address}' has weight 0")]
    ZeroWeight { upstream: String, address: String },

    #[error("simulation.failure_rate must be within 0.0..=1.0, got {0}")]
    FailureRateOutOfRange(f64),

    #[error("simulation.{0} must be at least 1")]
    ZeroSimulationSetting(&'static str),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &FairConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if ZoneSize::new(config.shared_zone.size).is_none() {
        errors.push(ValidationError::ZoneTooSmall {
            size: config.shared_zone.size,
            min: ZoneSize::MIN.bytes(),
            pages: MIN_ZONE_PAGES,
        });
    }

    let scheduler = &config.scheduler;
    if !(1..=MAX_TIME_SCALE_MS).contains(&scheduler.time_scale_ms) {
        errors.push(ValidationError::TimeScaleOutOfRange {
            value: scheduler.time_scale_ms,
            max: MAX_TIME_SCALE_MS,
        });
    }
    if scheduler.skew_fallback_ms < 0 {
        errors.push(ValidationError::NegativeSkewFallback(scheduler.skew_fallback_ms));
    }

    let mut names = HashSet::new();
    for upstream in &config.upstreams {
        if !names.insert(upstream.name.as_str()) {
            errors.push(ValidationError::DuplicateUpstream(upstream.name.clone()));
        }
        if upstream.backends.is_empty() {
            errors.push(ValidationError::EmptyUpstream(upstream.name.clone()));
        }
        for backend in &upstream.backends {
            if backend.address.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::InvalidAddress {
                    upstream: upstream.name.clone(),
                    address: backend.address.clone(),
                });
            }
            if backend.weight == 0 {
                errors.push(ValidationError::ZeroWeight {
                    upstream: upstream.name.clone(),
                    address: backend.address.clone(),
                });
            }
        }
    }

    let simulation = &config.simulation;
    if !(0.0..=1.0).contains(&simulation.failure_rate) {
        errors.push(ValidationError::FailureRateOutOfRange(simulation.failure_rate));
    }
    for (name, value) in [
        ("workers", simulation.workers),
        ("requests_per_worker", simulation.requests_per_worker),
        ("concurrency", simulation.concurrency),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroSimulationSetting(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Page-aligned zone size for a validated configuration.
pub fn zone_size(config: &FairConfig) -> ZoneSize {
    ZoneSize::new(config.shared_zone.size).unwrap_or_default()
}
