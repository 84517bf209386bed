//! Simulated dispatch layer.
//!
//! # Data Flow
//! ```text
//! Simulation::run
//!     → one tokio task per worker (worker.rs)
//!         → refresh generation → get_peer → sleep latency → complete
//!     → per-backend tally (DashMap)
//!     → Report (table or JSON)
//! ```
//!
//! # Design Decisions
//! - Each worker owns a `Worker` view of the runtime, the way each process
//!   of a multi-process server owns its upstream structures
//! - Workers only share the zone counters and the tally

pub mod worker;

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::config::{FairConfig, SimulationConfig};
use crate::lifecycle::{Runtime, Shutdown};

pub use worker::{run_worker, RequestOutcome, WorkerStats};

/// Error type for a simulation run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("upstream '{0}' is not configured")]
    UnknownUpstream(String),

    #[error("no upstreams configured")]
    NoUpstreams,

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Attempts seen by one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendTally {
    pub successes: u64,
    pub failures: u64,
}

/// Per-backend attempt counts keyed by (upstream, backend name).
pub type Tally = DashMap<(String, String), BackendTally>;

/// One row of the report.
#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    pub upstream: String,
    pub backend: String,
    pub successes: u64,
    pub failures: u64,
    /// Fraction of all successful attempts served by this backend.
    pub share: f64,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub upstream: String,
    pub workers: usize,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub totals: WorkerStats,
    pub backends: Vec<BackendReport>,
}

impl Report {
    fn new(upstream: String, workers: usize, elapsed: Duration, totals: WorkerStats, tally: &Tally) -> Self {
        let served: u64 = tally.iter().map(|e| e.value().successes).sum();
        let mut backends: Vec<BackendReport> = tally
            .iter()
            .map(|entry| {
                let (upstream, backend) = entry.key().clone();
                let counts = *entry.value();
                BackendReport {
                    upstream,
                    backend,
                    successes: counts.successes,
                    failures: counts.failures,
                    share: if served == 0 {
                        0.0
                    } else {
                        counts.successes as f64 / served as f64
                    },
                }
            })
            .collect();
        backends.sort_by(|a, b| (&a.upstream, &a.backend).cmp(&(&b.upstream, &b.backend)));

        Self {
            upstream,
            workers,
            elapsed_ms: elapsed.as_millis() as u64,
            totals,
            backends,
        }
    }

    /// Plain-text summary for the terminal.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "upstream {} | {} workers | {} requests in {} ms",
            self.upstream, self.workers, self.totals.requests, self.elapsed_ms
        );
        let _ = writeln!(
            out,
            "served {} | busy {} | failed {} | retries {}",
            self.totals.served, self.totals.busy, self.totals.failed, self.totals.retries
        );
        let _ = writeln!(out, "{:<24} {:>10} {:>10} {:>8}", "backend", "ok", "failed", "share");
        for row in &self.backends {
            let _ = writeln!(
                out,
                "{:<24} {:>10} {:>10} {:>7.1}%",
                row.backend,
                row.successes,
                row.failures,
                row.share * 100.0
            );
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives simulated traffic through a runtime.
#[derive(Debug)]
pub struct Simulation {
    runtime: Arc<Runtime>,
    shutdown: Shutdown,
}

impl Simulation {
    pub fn new(runtime: Arc<Runtime>, shutdown: Shutdown) -> Self {
        Self { runtime, shutdown }
    }

    /// Resolve the upstream traffic goes to.
    fn target(config: &FairConfig) -> Result<String, SimulationError> {
        let wanted = &config.simulation.upstream;
        if wanted.is_empty() {
            return config
                .upstreams
                .first()
                .map(|u| u.name.clone())
                .ok_or(SimulationError::NoUpstreams);
        }
        if config.upstreams.iter().any(|u| &u.name == wanted) {
            Ok(wanted.clone())
        } else {
            Err(SimulationError::UnknownUpstream(wanted.clone()))
        }
    }

    /// Run every worker to completion (or until shutdown) and collect the
    /// report.
    pub async fn run(&self) -> Result<Report, SimulationError> {
        let config = self.runtime.config();
        let upstream = Self::target(&config)?;
        let settings: SimulationConfig = config.simulation.clone();
        let tally: Arc<Tally> = Arc::new(DashMap::new());

        tracing::info!(
            upstream = %upstream,
            workers = settings.workers,
            requests_per_worker = settings.requests_per_worker,
            concurrency = settings.concurrency,
            "Simulation starting"
        );

        let start = Instant::now();
        let mut handles = Vec::with_capacity(settings.workers);
        for id in 0..settings.workers {
            handles.push(tokio::spawn(run_worker(
                id,
                self.runtime.worker(),
                upstream.clone(),
                settings.clone(),
                tally.clone(),
                self.shutdown.clone(),
            )));
        }

        let mut totals = WorkerStats::default();
        for handle in handles {
            totals.merge(&handle.await?);
        }

        let report = Report::new(upstream, settings.workers, start.elapsed(), totals, &tally);
        tracing::info!(
            served = report.totals.served,
            busy = report.totals.busy,
            failed = report.totals.failed,
            elapsed_ms = report.elapsed_ms,
            "Simulation finished"
        );
        Ok(report)
    }
}
