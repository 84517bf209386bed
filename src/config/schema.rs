//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! scheduler. All types derive Serde traits for deserialization from config
//! files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::fair::WeightMode;
use crate::load_balancer::score::{ScoreParams, DEFAULT_SKEW_FALLBACK_MS, DEFAULT_TIME_SCALE_MS};
use crate::zone::store::{MIN_ZONE_PAGES, PAGE_SIZE};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct FairConfig {
    /// Shared counter zone settings.
    pub shared_zone: SharedZoneConfig,

    /// Peer selection settings.
    pub scheduler: SchedulerConfig,

    /// Upstream definitions.
    pub upstreams: Vec<UpstreamConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request simulation settings used by the binary.
    pub simulation: SimulationConfig,
}

/// Shared counter zone configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SharedZoneConfig {
    /// Capacity in bytes. At least 8 pages; rounded up to a page boundary.
    pub size: usize,
}

impl Default for SharedZoneConfig {
    fn default() -> Self {
        Self {
            size: MIN_ZONE_PAGES * PAGE_SIZE,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Use load-aware scheduling. When false every upstream rotates.
    pub enabled: bool,

    /// Cost of one pending request in the score, in milliseconds.
    pub time_scale_ms: i64,

    /// Time delta substituted when clocks disagree.
    pub skew_fallback_ms: i64,

    /// How weights interact with pending counts.
    pub weight_mode: WeightMode,

    /// Always start scanning from the first backend.
    pub no_rr: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_scale_ms: DEFAULT_TIME_SCALE_MS,
            skew_fallback_ms: DEFAULT_SKEW_FALLBACK_MS,
            weight_mode: WeightMode::Normal,
            no_rr: false,
        }
    }
}

impl SchedulerConfig {
    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            time_scale_ms: self.time_scale_ms,
            skew_fallback_ms: self.skew_fallback_ms,
        }
    }
}

/// One upstream: a named group of backends.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UpstreamConfig {
    /// Upstream name, unique.
    pub name: String,

    /// Pool members in scan order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Backend identifier for logs and metrics. Defaults to the address.
    #[serde(default)]
    pub name: String,

    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Weight for weighted scheduling (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Failures within `fail_timeout_ms` before the backend is skipped.
    /// Zero disables failure accounting.
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,

    /// How long a failed-out backend is skipped, in milliseconds.
    #[serde(default = "default_fail_timeout_ms")]
    pub fail_timeout_ms: u64,

    /// Administratively disabled.
    #[serde(default)]
    pub down: bool,

    /// Simulated response time in milliseconds (simulation only).
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: "127.0.0.1:80".to_string(),
            weight: default_weight(),
            max_fails: default_max_fails(),
            fail_timeout_ms: default_fail_timeout_ms(),
            down: false,
            latency_ms: default_latency_ms(),
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_max_fails() -> u32 {
    1
}

fn default_fail_timeout_ms() -> u64 {
    10_000
}

fn default_latency_ms() -> u64 {
    5
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Simulated traffic for the binary.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of independent workers.
    pub workers: usize,

    /// Requests routed by each worker.
    pub requests_per_worker: usize,

    /// Requests in flight per worker.
    pub concurrency: usize,

    /// Probability that an attempt fails (0.0 to 1.0).
    pub failure_rate: f64,

    /// Upstream to send traffic to. Empty means the first configured one.
    pub upstream: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            requests_per_worker: 1000,
            concurrency: 8,
            failure_rate: 0.0,
            upstream: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: FairConfig = toml::from_str(
            r#"
            [[upstreams]]
            name = "web"

            [[upstreams.backends]]
            address = "127.0.0.1:3000"
            "#,
        )
        .unwrap();

        assert_eq!(config.shared_zone.size, 32 * 1024);
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.weight_mode, WeightMode::Normal);
        let backend = &config.upstreams[0].backends[0];
        assert_eq!(backend.weight, 1);
        assert_eq!(backend.max_fails, 1);
        assert_eq!(backend.fail_timeout_ms, 10_000);
        assert!(!backend.down);
    }

    #[test]
    fn test_full_scheduler_section() {
        let config: FairConfig = toml::from_str(
            r#"
            [shared_zone]
            size = 65536

            [scheduler]
            time_scale_ms = 250
            weight_mode = "peak"
            no_rr = true
            "#,
        )
        .unwrap();

        assert_eq!(config.shared_zone.size, 65536);
        assert_eq!(config.scheduler.score_params().time_scale_ms, 250);
        assert_eq!(config.scheduler.skew_fallback_ms, DEFAULT_SKEW_FALLBACK_MS);
        assert_eq!(config.scheduler.weight_mode, WeightMode::Peak);
        assert!(config.scheduler.no_rr);
    }
}
