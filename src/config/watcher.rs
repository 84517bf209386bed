//! Configuration file watcher for hot reload.
//!
//! Every accepted change becomes a new generation, so the watcher only
//! forwards configurations that differ from the last one it sent. Editors
//! commonly emit several write events per save.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::FairConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    current: FairConfig,
    update_tx: mpsc::UnboundedSender<FairConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher seeded with the configuration in use.
    ///
    /// Returns the watcher and a receiver for validated, changed configs.
    pub fn new(path: &Path, current: FairConfig) -> (Self, mpsc::UnboundedReceiver<FairConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut current,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(new_config) if new_config == current => {
                            tracing::debug!("Config file touched without changes");
                        }
                        Ok(new_config) => {
                            tracing::info!(path = ?path, "Config file change detected, reloading");
                            current = new_config.clone();
                            let _ = update_tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to reload config: {}. Keeping current configuration.",
                                e
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
