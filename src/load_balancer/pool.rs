//! Backend pool management.
//!
//! # Responsibilities
//! - Group backends by upstream name for one configuration generation
//! - Attach a balancer to each group (fair when counters are available)
//! - Run the dispatch and completion hooks around each attempt

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::{FairConfig, SchedulerConfig};
use crate::load_balancer::{
    backend::Backend,
    fair::FairBalancer,
    peer::{Busy, PeerGuard, PeerOutcome, RequestPeerState},
    round_robin::RoundRobin,
    LoadBalancer,
};
use crate::observability::metrics;
use crate::zone::{Generation, SharedZone};

/// The backends behind one upstream name, for one generation.
#[derive(Debug)]
pub struct BackendGroup {
    name: Arc<str>,
    generation: Generation,
    backends: Vec<Backend>,
    /// Where the next request starts scanning.
    cursor: AtomicUsize,
    no_rr: bool,
}

impl BackendGroup {
    pub fn new(name: &str, generation: Generation, backends: Vec<Backend>) -> Self {
        Self {
            name: Arc::from(name),
            generation,
            backends,
            cursor: AtomicUsize::new(0),
            no_rr: false,
        }
    }

    /// Start every request from the first backend instead of rotating.
    pub fn with_no_rr(mut self, no_rr: bool) -> Self {
        self.no_rr = no_rr;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Cursor position for a new request. The scan advances once before
    /// looking, so `no_rr` hands out the last index to land on the first.
    pub fn next_start(&self) -> usize {
        let len = self.len();
        if len == 0 {
            return 0;
        }
        if self.no_rr {
            return len - 1;
        }
        self.cursor.fetch_add(1, Ordering::Relaxed) % len
    }

    /// Clear every backend's failure count.
    pub fn reset_fails(&self) {
        for backend in &self.backends {
            backend.reset_fails();
        }
    }
}

/// One upstream as seen by one worker: its group, balancer and clock.
#[derive(Debug)]
pub struct Upstream {
    group: Arc<BackendGroup>,
    balancer: Box<dyn LoadBalancer>,
    clock: SharedClock,
}

impl Upstream {
    pub fn new(group: Arc<BackendGroup>, balancer: Box<dyn LoadBalancer>, clock: SharedClock) -> Self {
        Self {
            group,
            balancer,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn group(&self) -> &BackendGroup {
        &self.group
    }

    pub fn balancer_name(&self) -> &'static str {
        self.balancer.name()
    }

    /// Routing state for a new request: one try per backend.
    pub fn new_request(&self) -> RequestPeerState {
        RequestPeerState::new(self.group.next_start(), self.group.len())
    }

    /// Choose a backend without dispatching to it.
    pub fn select_peer(&self, state: &mut RequestPeerState) -> Result<usize, Busy> {
        self.balancer
            .select_peer(&self.group, state, self.clock.now_ms())
    }

    /// Choose a backend and run the admission hook.
    ///
    /// When nothing is available every backend's failure count is reset so
    /// a transient outage of the whole pool cannot wedge it; the caller owns
    /// any retry or backoff.
    pub fn get_peer(self: &Arc<Self>, state: &mut RequestPeerState) -> Result<PeerGuard, Busy> {
        let now = self.clock.now_ms();
        match self.balancer.select_peer(&self.group, state, now) {
            Ok(index) => {
                self.balancer.on_dispatch(index, now);
                let backend = &self.group.backends()[index];
                tracing::trace!(
                    upstream = %self.name(),
                    backend = %backend.name,
                    index,
                    "Peer selected"
                );
                metrics::record_selection(self.name(), &backend.name);
                Ok(PeerGuard::new(self.clone(), index))
            }
            Err(Busy) => {
                tracing::warn!(
                    upstream = %self.name(),
                    backends = self.group.len(),
                    tries_left = state.tries(),
                    "No backend available, resetting failure counters"
                );
                for backend in self.group.backends() {
                    tracing::debug!(
                        addr = %backend.addr,
                        fails = backend.fails(),
                        down = backend.down,
                        "Backend status"
                    );
                }
                self.group.reset_fails();
                metrics::record_busy(self.name());
                Err(Busy)
            }
        }
    }

    /// Completion hook.
    pub(crate) fn complete(&self, index: usize, state: &mut RequestPeerState, outcome: PeerOutcome) {
        self.balancer.on_release(index);

        if outcome == PeerOutcome::Failure {
            let backend = &self.group.backends()[index];
            backend.record_failure(self.clock.now_ms());
            tracing::debug!(
                upstream = %self.name(),
                backend = %backend.name,
                fails = backend.fails(),
                current_weight = backend.current_weight(),
                "Backend attempt failed"
            );
            metrics::record_backend_failure(self.name(), &backend.name);
        }

        if self.group.len() == 1 {
            state.clear_tries();
        } else {
            state.consume_try();
        }
    }

    /// Release without an outcome, for guards dropped before completion.
    pub(crate) fn abandon(&self, index: usize) {
        self.balancer.on_release(index);
    }
}

/// A worker's upstreams for one generation.
#[derive(Debug)]
pub struct UpstreamManager {
    generation: Generation,
    upstreams: HashMap<String, Arc<Upstream>>,
}

impl UpstreamManager {
    /// Build every configured upstream, acquiring counter blocks from the
    /// zone. An upstream that cannot get one runs on round robin instead.
    pub fn new(
        config: &FairConfig,
        generation: Generation,
        zone: &SharedZone,
        clock: SharedClock,
    ) -> Self {
        let mut upstreams = HashMap::new();

        for upstream in &config.upstreams {
            let backends: Vec<Backend> = upstream
                .backends
                .iter()
                .filter_map(|b| match Backend::from_config(b) {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        tracing::warn!(upstream = %upstream.name, address = %b.address, error = %e, "Invalid backend address");
                        None
                    }
                })
                .collect();

            if backends.is_empty() {
                tracing::warn!(upstream = %upstream.name, "Upstream has no usable backends, skipping");
                continue;
            }

            let group = Arc::new(
                BackendGroup::new(&upstream.name, generation, backends)
                    .with_no_rr(config.scheduler.no_rr),
            );
            let balancer = Self::balancer_for(&group, &config.scheduler, zone);
            tracing::debug!(
                upstream = %upstream.name,
                generation = %generation,
                balancer = balancer.name(),
                backends = group.len(),
                "Upstream initialised"
            );
            upstreams.insert(
                upstream.name.clone(),
                Arc::new(Upstream::new(group, balancer, clock.clone())),
            );
        }

        Self {
            generation,
            upstreams,
        }
    }

    fn balancer_for(
        group: &BackendGroup,
        scheduler: &SchedulerConfig,
        zone: &SharedZone,
    ) -> Box<dyn LoadBalancer> {
        if !scheduler.enabled {
            return Box::new(RoundRobin::new());
        }
        match zone.acquire(group.generation(), group.name(), group.len()) {
            Ok(counters) => Box::new(FairBalancer::new(
                counters,
                scheduler.score_params(),
                scheduler.weight_mode,
            )),
            Err(e) => {
                tracing::debug!(upstream = %group.name(), error = %e, "Fair scheduling unavailable, using round robin");
                metrics::record_fallback(group.name());
                Box::new(RoundRobin::new())
            }
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Look up an upstream by name.
    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).cloned()
    }

    pub fn upstreams(&self) -> impl Iterator<Item = &Arc<Upstream>> {
        self.upstreams.values()
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BackendConfig, UpstreamConfig};
    use crate::zone::ZoneSize;

    fn backend_config(port: u16) -> BackendConfig {
        BackendConfig {
            name: format!("b{}", port),
            address: format!("127.0.0.1:{}", port),
            ..BackendConfig::default()
        }
    }

    fn config(groups: &[(&str, usize)]) -> FairConfig {
        let mut config = FairConfig::default();
        let mut port = 9000;
        for (name, count) in groups {
            let backends = (0..*count)
                .map(|_| {
                    port += 1;
                    backend_config(port)
                })
                .collect();
            config.upstreams.push(UpstreamConfig {
                name: name.to_string(),
                backends,
            });
        }
        config
    }

    #[test]
    fn test_manager_builds_fair_upstreams() {
        let zone = SharedZone::new(ZoneSize::default());
        let clock: SharedClock = Arc::new(ManualClock::new(1_000));
        let manager = UpstreamManager::new(&config(&[("web", 3), ("api", 2)]), Generation(1), &zone, clock);

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get("web").unwrap().balancer_name(), "fair");
        assert_eq!(manager.get("api").unwrap().group().len(), 2);
        assert!(manager.get("missing").is_none());
        assert_eq!(zone.stats().entries, 2);
    }

    #[test]
    fn test_manager_falls_back_when_zone_is_full() {
        let zone = SharedZone::new(ZoneSize::default());
        let filler = (zone.capacity() - crate::zone::store::ENTRY_OVERHEAD) / crate::zone::counters::COUNTER_SIZE;
        let _full = zone.acquire(Generation(1), "filler", filler).unwrap();

        let clock: SharedClock = Arc::new(ManualClock::new(1_000));
        let manager = UpstreamManager::new(&config(&[("web", 3)]), Generation(1), &zone, clock);
        let web = manager.get("web").unwrap();
        assert_eq!(web.balancer_name(), "round_robin");

        let mut state = web.new_request();
        assert!(web.get_peer(&mut state).is_ok());
    }

    #[test]
    fn test_manager_skips_invalid_backends() {
        let zone = SharedZone::new(ZoneSize::default());
        let clock: SharedClock = Arc::new(ManualClock::new(1_000));
        let mut config = config(&[("web", 1)]);
        config.upstreams[0].backends.push(BackendConfig {
            address: "not-an-address".into(),
            ..BackendConfig::default()
        });
        config.upstreams.push(UpstreamConfig {
            name: "empty".into(),
            backends: vec![],
        });

        let manager = UpstreamManager::new(&config, Generation(1), &zone, clock);
        assert_eq!(manager.get("web").unwrap().group().len(), 1);
        assert!(manager.get("empty").is_none());
    }

    #[test]
    fn test_scheduler_disabled_uses_round_robin() {
        let zone = SharedZone::new(ZoneSize::default());
        let clock: SharedClock = Arc::new(ManualClock::new(1_000));
        let mut config = config(&[("web", 2)]);
        config.scheduler.enabled = false;

        let manager = UpstreamManager::new(&config, Generation(1), &zone, clock);
        assert_eq!(manager.get("web").unwrap().balancer_name(), "round_robin");
        assert_eq!(zone.stats().entries, 0);
    }

    #[test]
    fn test_no_rr_starts_from_first_backend() {
        let backends = (0..3)
            .map(|i| Backend::new(format!("127.0.0.1:{}", 9000 + i).parse().unwrap(), 1))
            .collect();
        let group = BackendGroup::new("web", Generation(1), backends).with_no_rr(true);
        for _ in 0..5 {
            let mut state = RequestPeerState::new(group.next_start(), group.len());
            state.advance(group.len());
            assert_eq!(state.current(), 0);
        }
    }
}
