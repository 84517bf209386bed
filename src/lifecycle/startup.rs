//! Startup, reload and teardown of the process-wide scheduler state.
//!
//! # Responsibilities
//! - Validate the configuration and allocate the shared zone once
//! - Hand out the current (generation, config) pair to workers
//! - Turn a reload into a new generation without touching live workers
//! - Tear the zone down on shutdown
//!
//! # Design Decisions
//! - Generation and config are swapped together through `ArcSwap`, so a
//!   worker never builds upstreams from one generation's config under
//!   another generation's number
//! - Workers poll the generation on their own schedule; a reload costs
//!   nothing on the request path until a worker refreshes
//! - The zone size is fixed for the life of the process

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::clock::SharedClock;
use crate::config::loader::ConfigError;
use crate::config::validation::{validate_config, zone_size};
use crate::config::FairConfig;
use crate::load_balancer::{Upstream, UpstreamManager};
use crate::observability::metrics;
use crate::zone::{Generation, SharedZone, ZoneSize};

/// One configuration epoch.
#[derive(Debug)]
struct Epoch {
    generation: Generation,
    config: Arc<FairConfig>,
}

/// Process-scoped scheduler state shared by every worker.
#[derive(Debug)]
pub struct Runtime {
    current: ArcSwap<Epoch>,
    zone: Arc<SharedZone>,
    zone_size: ZoneSize,
    clock: SharedClock,
}

impl Runtime {
    /// Validate `config`, allocate the shared zone and enter generation 1.
    pub fn start(config: FairConfig, clock: SharedClock) -> Result<Arc<Self>, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let zone_size = zone_size(&config);
        let generation = Generation(1);

        tracing::info!(
            generation = %generation,
            zone_bytes = zone_size.bytes(),
            upstreams = config.upstreams.len(),
            scheduler_enabled = config.scheduler.enabled,
            "Runtime started"
        );
        metrics::record_generation(generation.0);

        Ok(Arc::new(Self {
            current: ArcSwap::from_pointee(Epoch {
                generation,
                config: Arc::new(config),
            }),
            zone: Arc::new(SharedZone::new(zone_size)),
            zone_size,
            clock,
        }))
    }

    pub fn generation(&self) -> Generation {
        self.current.load().generation
    }

    pub fn config(&self) -> Arc<FairConfig> {
        self.current.load().config.clone()
    }

    pub fn zone(&self) -> &SharedZone {
        &self.zone
    }

    pub fn zone_size(&self) -> ZoneSize {
        self.zone_size
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Build a worker-local view of the current generation.
    pub fn upstreams(&self) -> UpstreamManager {
        let epoch = self.current.load_full();
        UpstreamManager::new(&epoch.config, epoch.generation, &self.zone, self.clock.clone())
    }

    /// A worker bound to this runtime, already holding the current
    /// generation's counter handles.
    pub fn worker(self: &Arc<Self>) -> Worker {
        Worker {
            manager: self.upstreams(),
            runtime: self.clone(),
        }
    }

    /// Enter a new generation with `config`.
    ///
    /// A different zone size cannot be honoured by a live zone; it is
    /// replaced by the size in use and a warning is logged.
    pub fn reload(&self, mut config: FairConfig) -> Result<Generation, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let requested = zone_size(&config);
        if requested != self.zone_size {
            tracing::warn!(
                requested = requested.bytes(),
                current = self.zone_size.bytes(),
                "Cannot change shared_zone.size on reload, keeping the current size"
            );
            config.shared_zone.size = self.zone_size.bytes();
        }

        let config = Arc::new(config);
        let previous = self.current.rcu(|epoch| Epoch {
            generation: epoch.generation.next(),
            config: config.clone(),
        });
        let generation = previous.generation.next();

        tracing::info!(
            previous = %previous.generation,
            generation = %generation,
            upstreams = config.upstreams.len(),
            "Configuration reloaded"
        );
        metrics::record_generation(generation.0);
        Ok(generation)
    }

    /// Free the whole zone. Workers that refresh afterwards run on round
    /// robin.
    pub fn shutdown(&self) {
        tracing::info!(generation = %self.generation(), "Runtime shutting down");
        self.zone.teardown();
    }
}

/// One worker's upstreams, rebuilt whenever the runtime's generation moves.
#[derive(Debug)]
pub struct Worker {
    runtime: Arc<Runtime>,
    manager: UpstreamManager,
}

impl Worker {
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn generation(&self) -> Generation {
        self.manager.generation()
    }

    pub fn upstreams(&self) -> &UpstreamManager {
        &self.manager
    }

    /// Rebuild against the current generation if a reload happened.
    /// Returns whether anything changed.
    ///
    /// In-flight guards keep the old upstreams alive until they complete,
    /// so their releases still land on the counters they were charged to.
    pub fn refresh(&mut self) -> bool {
        let generation = self.runtime.generation();
        if generation == self.manager.generation() {
            return false;
        }
        tracing::debug!(
            from = %self.manager.generation(),
            to = %generation,
            "Worker switching generation"
        );
        self.manager = self.runtime.upstreams();
        true
    }

    /// Look up an upstream in the latest generation.
    pub fn upstream(&mut self, name: &str) -> Option<Arc<Upstream>> {
        self.refresh();
        self.manager.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BackendConfig, UpstreamConfig};

    fn config() -> FairConfig {
        let mut config = FairConfig::default();
        config.upstreams.push(UpstreamConfig {
            name: "web".into(),
            backends: vec![
                BackendConfig {
                    address: "127.0.0.1:8001".into(),
                    ..BackendConfig::default()
                },
                BackendConfig {
                    address: "127.0.0.1:8002".into(),
                    ..BackendConfig::default()
                },
            ],
        });
        config
    }

    fn runtime() -> Arc<Runtime> {
        Runtime::start(config(), Arc::new(ManualClock::new(1_000))).unwrap()
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let mut bad = config();
        bad.shared_zone.size = 100;
        let result = Runtime::start(bad, Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_workers_share_counters() {
        let runtime = runtime();
        let mut a = runtime.worker();
        let mut b = runtime.worker();

        assert_eq!(runtime.zone().refcount(Generation(1), "web"), Some(2));
        let web_a = a.upstream("web").unwrap();
        let web_b = b.upstream("web").unwrap();

        let mut state = web_a.new_request();
        let guard = web_a.get_peer(&mut state).unwrap();
        assert_eq!(web_b.group().len(), 2);
        assert_eq!(runtime.zone().stats().entries, 1);
        drop(guard);
    }

    #[test]
    fn test_reload_moves_workers_to_new_generation() {
        let runtime = runtime();
        let mut a = runtime.worker();
        let mut b = runtime.worker();

        let generation = runtime.reload(config()).unwrap();
        assert_eq!(generation, Generation(2));
        assert_eq!(a.generation(), Generation(1));

        assert!(a.refresh());
        assert!(!a.refresh());
        assert_eq!(runtime.zone().refcount(Generation(1), "web"), Some(1));

        assert!(b.refresh());
        assert_eq!(runtime.zone().refcount(Generation(1), "web"), None);
        assert_eq!(runtime.zone().refcount(Generation(2), "web"), Some(2));
    }

    #[test]
    fn test_reload_keeps_zone_size() {
        let runtime = runtime();
        let mut bigger = config();
        bigger.shared_zone.size = ZoneSize::MIN.bytes() * 4;

        runtime.reload(bigger).unwrap();
        assert_eq!(runtime.config().shared_zone.size, runtime.zone_size().bytes());
        assert_eq!(runtime.zone().capacity(), ZoneSize::default().bytes());
    }

    #[test]
    fn test_shutdown_falls_back_to_round_robin() {
        let runtime = runtime();
        let mut worker = runtime.worker();
        runtime.shutdown();
        assert!(runtime.zone().is_closed());

        runtime.reload(config()).unwrap();
        let web = worker.upstream("web").unwrap();
        assert_eq!(web.balancer_name(), "round_robin");

        let mut state = web.new_request();
        assert!(web.get_peer(&mut state).is_ok());
    }
}
