//! Configuration file watcher for reloads.
//!
//! Watches the file's parent directory so editors that replace the file
//! (write to a temp file, then rename) are still observed.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::FailoverConfig;

/// Monitors one configuration file and publishes validated reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<Arc<FailoverConfig>>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Arc<FailoverConfig>>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let reloader = Reloader::new(self.path.clone(), self.update_tx);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event, file_name.as_deref()) {
                        reloader.on_change();
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Reloads the file and publishes it when its content changed.
struct Reloader {
    path: PathBuf,
    last_seen: Mutex<Option<String>>,
    tx: mpsc::UnboundedSender<Arc<FailoverConfig>>,
}

impl Reloader {
    fn new(path: PathBuf, tx: mpsc::UnboundedSender<Arc<FailoverConfig>>) -> Self {
        let last_seen = Mutex::new(std::fs::read_to_string(&path).ok());
        Self { path, last_seen, tx }
    }

    fn on_change(&self) {
        // Several events arrive per save; reload only on new content.
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return;
        };
        {
            let mut last = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
            if last.as_deref() == Some(content.as_str()) {
                return;
            }
            *last = Some(content);
        }
        tracing::info!(path = ?self.path, "Config file change detected, reloading");
        match load_config(&self.path) {
            Ok(config) => {
                let _ = self.tx.send(Arc::new(config));
            }
            Err(ConfigError::Validation(errors)) => {
                for e in errors {
                    tracing::error!(error = %e, "Rejected reloaded config");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config; keeping current configuration");
            }
        }
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    kind_matches
        && file_name.is_some_and(|name| event.paths.iter().any(|p| p.file_name() == Some(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn filters_events_by_file_and_kind() {
        let name = std::ffi::OsStr::new("client.toml");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/etc/svc/client.toml"));
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/svc/client.toml"));
        let other = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/etc/svc/other.toml"));
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/etc/svc/client.toml"));

        assert!(is_relevant(&modify, Some(name)));
        assert!(is_relevant(&create, Some(name)));
        assert!(!is_relevant(&other, Some(name)));
        assert!(!is_relevant(&removed, Some(name)));
    }

    fn service_toml(uris: &str) -> String {
        format!("[service]\nname = \"svc\"\nuris = [{uris}]\n")
    }

    #[test]
    fn publishes_only_new_valid_content() {
        let path = std::env::temp_dir().join(format!("host-failover-watch-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, service_toml(r#""https://a:8443""#)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reloader = Reloader::new(path.clone(), tx);

        // Unchanged since startup.
        reloader.on_change();
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, service_toml(r#""https://a:8443", "https://b:8443""#)).unwrap();
        reloader.on_change();
        assert_eq!(rx.try_recv().unwrap().service.uris.len(), 2);

        // Repeated events for the same save.
        reloader.on_change();
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, service_toml("")).unwrap();
        reloader.on_change();
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, service_toml(r#""https://c:8443""#)).unwrap();
        reloader.on_change();
        assert_eq!(rx.try_recv().unwrap().service.uris, vec!["https://c:8443".to_string()]);

        let _ = std::fs::remove_file(path);
    }
}
