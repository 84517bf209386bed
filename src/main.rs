//! Fair upstream scheduler simulator.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ loader ──▶ Runtime ──────────────┐
//!        │                      │  (zone, generation) │
//!        ▼                      ▼                     ▼
//!     watcher ──reload──▶  generation N+1       worker tasks
//!                                                 │   get_peer
//!                                                 │   sleep(latency)
//!                                                 │   complete
//!                                                 ▼
//!                                          per-backend tally ──▶ report
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use upstream_fair::clock::SystemClock;
use upstream_fair::config::loader::load_config;
use upstream_fair::config::watcher::ConfigWatcher;
use upstream_fair::lifecycle::signals::spawn_signal_handler;
use upstream_fair::lifecycle::{Runtime, Shutdown};
use upstream_fair::observability::{logging, metrics};
use upstream_fair::simulation::Simulation;

#[derive(Parser)]
#[command(name = "upstream-fair")]
#[command(about = "Simulate load-aware peer selection over configured upstreams", long_about = None)]
struct Cli {
    /// Path to the TOML configuration.
    #[arg(short, long)]
    config: PathBuf,

    /// Override `simulation.workers`.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override `simulation.requests_per_worker`.
    #[arg(short, long)]
    requests: Option<usize>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Reload the configuration when the file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let file_config = load_config(&cli.config)?;
    let mut config = file_config.clone();
    if let Some(workers) = cli.workers {
        config.simulation.workers = workers;
    }
    if let Some(requests) = cli.requests {
        config.simulation.requests_per_worker = requests;
    }

    logging::init(&config.observability);
    tracing::info!(path = ?cli.config, "upstream-fair v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let runtime = Runtime::start(config, Arc::new(SystemClock))?;
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    // The watcher must stay alive for as long as reloads are wanted.
    let _watcher = if cli.watch {
        let (watcher, mut updates) = ConfigWatcher::new(&cli.config, file_config);
        let watcher = watcher.run()?;
        let runtime = runtime.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(new_config) = updates.recv() => {
                        if let Err(e) = runtime.reload(new_config) {
                            tracing::error!(error = %e, "Reload rejected");
                        }
                    }
                    _ = stop.recv() => break,
                    else => break,
                }
            }
        });
        Some(watcher)
    } else {
        None
    };

    let report = Simulation::new(runtime.clone(), shutdown.clone()).run().await?;
    shutdown.trigger();
    runtime.shutdown();

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_table());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
