//! Configuration file watcher for hot route reload.
//!
//! The parent directory is watched rather than the file itself so editors
//! that save by rename still trigger a reload. A reload is only forwarded
//! when the route list actually changed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{AppConfig, RouteConfig};

/// Watches one configuration file and sends validated configs.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<AppConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<AppConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let path = self.path.clone();
        let tx = self.update_tx;
        let mut current_routes = load_config(&path).ok().map(|config| config.routes);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                let touches_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_config || !is_write(&event.kind) {
                    return;
                }

                match load_config(&path) {
                    Ok(config) if routes_changed(current_routes.as_deref(), &config.routes) => {
                        tracing::info!(routes = config.routes.len(), "Config change detected, reloading routes");
                        current_routes = Some(config.routes.clone());
                        forward(&tx, config);
                    }
                    Ok(_) => tracing::debug!("Config changed without route changes"),
                    Err(e) => tracing::error!(error = %e, "Failed to reload config, keeping current routes"),
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn forward(tx: &mpsc::UnboundedSender<AppConfig>, config: AppConfig) -> bool {
    match tx.send(config) {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!("Route reload receiver closed, update dropped");
            false
        }
    }
}

fn is_write(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn routes_changed(current: Option<&[RouteConfig]>, next: &[RouteConfig]) -> bool {
    current != Some(next)
}
