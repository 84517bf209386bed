//! One simulated worker.
//!
//! Keeps up to `concurrency` requests in flight. Every request picks a peer,
//! holds it for the backend's latency, and retries on failure while the
//! request still has tries left.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{FairConfig, SimulationConfig};
use crate::lifecycle::{Shutdown, Worker};
use crate::load_balancer::{PeerOutcome, Upstream};
use crate::simulation::Tally;

/// How one simulated request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A backend answered; carries the number of failed attempts before it.
    Served { retries: u32 },
    /// No backend could be selected.
    Busy { retries: u32 },
    /// Every try failed.
    Failed { retries: u32 },
}

/// Counters of one worker, or the sum over all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub requests: u64,
    pub served: u64,
    pub busy: u64,
    pub failed: u64,
    pub retries: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: RequestOutcome) {
        self.requests += 1;
        let retries = match outcome {
            RequestOutcome::Served { retries } => {
                self.served += 1;
                retries
            }
            RequestOutcome::Busy { retries } => {
                self.busy += 1;
                retries
            }
            RequestOutcome::Failed { retries } => {
                self.failed += 1;
                retries
            }
        };
        self.retries += u64::from(retries);
    }

    pub fn merge(&mut self, other: &WorkerStats) {
        self.requests += other.requests;
        self.served += other.served;
        self.busy += other.busy;
        self.failed += other.failed;
        self.retries += other.retries;
    }
}

/// Simulated latencies of an upstream's backends, by index.
fn latencies(config: &FairConfig, upstream: &str) -> Arc<[u64]> {
    config
        .upstreams
        .iter()
        .find(|u| u.name == upstream)
        .map(|u| u.backends.iter().map(|b| b.latency_ms).collect())
        .unwrap_or_else(|| Arc::from(Vec::new()))
}

/// `base` with up to 20% jitter either way.
fn jittered(base: u64) -> Duration {
    let spread = base / 5;
    let ms = if spread == 0 {
        base
    } else {
        base - spread + rand::thread_rng().gen_range(0..=2 * spread)
    };
    Duration::from_millis(ms)
}

/// Route one request to completion.
pub async fn route_request(
    upstream: Arc<Upstream>,
    latencies: Arc<[u64]>,
    failure_rate: f64,
    tally: Arc<Tally>,
) -> RequestOutcome {
    let mut state = upstream.new_request();
    let mut retries = 0;

    loop {
        let guard = match upstream.get_peer(&mut state) {
            Ok(guard) => guard,
            Err(_) => return RequestOutcome::Busy { retries },
        };

        let base = latencies.get(guard.index()).copied().unwrap_or_default();
        tokio::time::sleep(jittered(base)).await;

        let failed = rand::thread_rng().gen_bool(failure_rate.clamp(0.0, 1.0));
        let key = (upstream.name().to_string(), guard.backend().name.clone());
        {
            let mut entry = tally.entry(key).or_default();
            if failed {
                entry.failures += 1;
            } else {
                entry.successes += 1;
            }
        }

        if !failed {
            guard.complete(&mut state, PeerOutcome::Success);
            return RequestOutcome::Served { retries };
        }

        tracing::debug!(backend = %guard.backend().name, tries_left = state.tries(), "Attempt failed");
        guard.complete(&mut state, PeerOutcome::Failure);
        if state.tries() == 0 {
            return RequestOutcome::Failed { retries };
        }
        retries += 1;
    }
}

/// Run one worker until its request quota is spent or shutdown is
/// triggered, then wait for its in-flight requests.
pub async fn run_worker(
    id: usize,
    mut worker: Worker,
    upstream: String,
    settings: SimulationConfig,
    tally: Arc<Tally>,
    shutdown: Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut in_flight = JoinSet::new();
    let mut latency_table = latencies(&worker.runtime().config(), &upstream);
    let concurrency = settings.concurrency.max(1);

    for _ in 0..settings.requests_per_worker {
        if shutdown.is_triggered() {
            tracing::info!(worker = id, "Stopping early on shutdown");
            break;
        }

        while in_flight.len() >= concurrency {
            if let Some(done) = in_flight.join_next().await {
                collect(&mut stats, done);
            }
        }

        if worker.refresh() {
            latency_table = latencies(&worker.runtime().config(), &upstream);
            tracing::info!(worker = id, generation = %worker.generation(), "Worker picked up new generation");
        }
        let Some(target) = worker.upstreams().get(&upstream) else {
            tracing::warn!(worker = id, upstream = %upstream, "Upstream missing from current generation");
            break;
        };

        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("request", worker = id, request_id = %request_id, upstream = %upstream);
        in_flight.spawn(
            route_request(target, latency_table.clone(), settings.failure_rate, tally.clone())
                .instrument(span),
        );
    }

    while let Some(done) = in_flight.join_next().await {
        collect(&mut stats, done);
    }

    tracing::debug!(worker = id, requests = stats.requests, served = stats.served, "Worker finished");
    stats
}

fn collect(stats: &mut WorkerStats, done: Result<RequestOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => stats.record(outcome),
        Err(e) => tracing::error!(error = %e, "Request task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record_and_merge() {
        let mut a = WorkerStats::default();
        a.record(RequestOutcome::Served { retries: 1 });
        a.record(RequestOutcome::Busy { retries: 0 });
        let mut b = WorkerStats::default();
        b.record(RequestOutcome::Failed { retries: 2 });

        a.merge(&b);
        assert_eq!(
            a,
            WorkerStats {
                requests: 3,
                served: 1,
                busy: 1,
                failed: 1,
                retries: 3,
            }
        );
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jittered(0), Duration::ZERO);
        assert_eq!(jittered(4), Duration::from_millis(4));
        for _ in 0..100 {
            let d = jittered(100).as_millis();
            assert!((80..=120).contains(&d));
        }
    }
}
