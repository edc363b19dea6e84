//! Rows-file watcher: a change to the store file triggers a refresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::governance::PolicyRefresher;

/// Watches the directory holding the rows file, so editors that replace the
/// file by rename are still seen.
pub struct StoreWatcher {
    path: PathBuf,
    refresher: Arc<PolicyRefresher>,
}

impl StoreWatcher {
    pub fn new(path: &Path, refresher: Arc<PolicyRefresher>) -> Self {
        Self {
            path: path.to_path_buf(),
            refresher,
        }
    }

    /// Start watching. Events arrive on notify's own thread; the returned
    /// watcher stops when dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let refresher = self.refresher;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!("Store file change detected, refreshing policy");
                        refresher.trigger();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Store watcher started");
        Ok(watcher)
    }

    /// Watch until shutdown.
    pub async fn run_until(self, mut shutdown: broadcast::Receiver<()>) {
        let path = self.path.clone();
        match self.run() {
            Ok(watcher) => {
                let _ = shutdown.recv().await;
                drop(watcher);
                tracing::info!(path = ?path, "Store watcher stopped");
            }
            Err(e) => tracing::error!(path = ?path, error = %e, "Failed to watch store file"),
        }
    }
}
