//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use upstream_fair::clock::ManualClock;
use upstream_fair::config::{BackendConfig, FairConfig, UpstreamConfig};
use upstream_fair::zone::CounterHandle;
use upstream_fair::Runtime;

pub const NOW: u64 = 1_700_000_000_000;

/// Backend entry on 127.0.0.1 named `b<port>`.
pub fn backend(port: u16, weight: u32) -> BackendConfig {
    BackendConfig {
        name: format!("b{}", port),
        address: format!("127.0.0.1:{}", port),
        weight,
        ..BackendConfig::default()
    }
}

/// A config with one upstream `web` whose backends carry `weights`.
pub fn pool_config(weights: &[u32]) -> FairConfig {
    let mut config = FairConfig::default();
    config.upstreams.push(UpstreamConfig {
        name: "web".into(),
        backends: weights
            .iter()
            .enumerate()
            .map(|(i, w)| backend(8000 + i as u16, *w))
            .collect(),
    });
    config
}

/// A runtime driven by a manual clock set to [`NOW`].
pub fn manual_runtime(config: FairConfig) -> (Arc<Runtime>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let runtime = Runtime::start(config, clock.clone()).expect("valid config");
    (runtime, clock)
}

/// The current generation's counter block for `group`.
pub fn counters(runtime: &Runtime, group: &str, backends: usize) -> CounterHandle {
    runtime
        .zone()
        .acquire(runtime.generation(), group, backends)
        .expect("zone has room")
}

pub fn total_pending(handle: &CounterHandle) -> u64 {
    handle.counters().iter().map(|c| c.pending()).sum()
}
