//! Configuration hot reload
//!
//! The config file is polled for a changed modification time. A changed
//! file is loaded with the same overrides as at startup, validated and
//! swapped into the [`ConfigHandle`]. A broken file is logged and the
//! previous configuration stays active.

use crate::config::{ConfigChanges, ConfigHandle, ConfigOverrides, ConfigSource, GatewayConfig};
use crate::error::FetchError;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one poll
#[derive(Debug)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded(ConfigChanges),
    Failed(FetchError),
}

/// Watches the config file and reloads it on change
pub struct ConfigWatcher {
    source: ConfigSource,
    overrides: ConfigOverrides,
    handle: ConfigHandle,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Create a watcher whose baseline is the file as it is now
    pub async fn new(source: ConfigSource, overrides: ConfigOverrides, handle: ConfigHandle) -> Self {
        let last_modified = modified(&source).await;
        ConfigWatcher {
            source,
            overrides,
            handle,
            last_modified,
        }
    }

    /// Reload the file if its modification time changed since the last poll
    ///
    /// A file that disappears counts as a change: an explicit config then
    /// fails to load, a default one falls back to built-in defaults.
    pub async fn check(&mut self) -> ReloadOutcome {
        let current = modified(&self.source).await;
        if current == self.last_modified {
            return ReloadOutcome::Unchanged;
        }
        self.last_modified = current;

        let path = self.source.path().display().to_string();
        let loaded = GatewayConfig::load(&self.source, &self.overrides)
            .and_then(|config| self.handle.replace(config));

        match loaded {
            Ok(changes) => {
                if changes.has_changes() {
                    info!(path = %path, changed = ?changes.summary(), "configuration reloaded");
                } else {
                    debug!(path = %path, "config file touched, nothing changed");
                }
                if changes.requires_restart() {
                    warn!(path = %path, "some configuration changes only take effect after a restart");
                }
                ReloadOutcome::Reloaded(changes)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "config reload failed, keeping previous configuration");
                ReloadOutcome::Failed(e)
            }
        }
    }

    /// Poll in the background
    ///
    /// The interval is re-read from the active configuration before every
    /// poll; an interval of zero stops the watcher.
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let secs = self.handle.snapshot().reload_interval_secs;
                if secs == 0 {
                    info!("config reload disabled");
                    return;
                }
                tokio::time::sleep(Duration::from_secs(secs)).await;
                self.check().await;
            }
        })
    }
}

async fn modified(source: &ConfigSource) -> Option<SystemTime> {
    fs::metadata(source.path())
        .await
        .and_then(|metadata| metadata.modified())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_config(path: &Path, content: &str, mtime: SystemTime) {
        std::fs::write(path, content).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    async fn watcher_for(path: &Path) -> ConfigWatcher {
        let source = ConfigSource::Explicit(path.to_path_buf());
        let overrides = ConfigOverrides::default();
        let config = GatewayConfig::load(&source, &overrides).unwrap();
        ConfigWatcher::new(source, overrides, ConfigHandle::new(config)).await
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "ttl: 10\n", SystemTime::now() - Duration::from_secs(60));

        let mut watcher = watcher_for(&path).await;
        assert!(matches!(watcher.check().await, ReloadOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_changed_file_is_swapped_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "ttl: 10\n", SystemTime::now() - Duration::from_secs(60));

        let mut watcher = watcher_for(&path).await;
        let before = watcher.handle.snapshot();

        write_config(&path, "ttl: 20\n", SystemTime::now());
        match watcher.check().await {
            ReloadOutcome::Reloaded(changes) => {
                assert!(changes.ttl_changed);
                assert!(!changes.requires_restart());
            }
            other => panic!("expected reload, got {:?}", other),
        }

        assert_eq!(before.ttl, Some(10));
        assert_eq!(watcher.handle.snapshot().ttl, Some(20));
    }

    #[tokio::test]
    async fn test_broken_file_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "ttl: 10\n", SystemTime::now() - Duration::from_secs(60));

        let mut watcher = watcher_for(&path).await;

        write_config(&path, "ttl: [not, a, number\n", SystemTime::now());
        assert!(matches!(watcher.check().await, ReloadOutcome::Failed(_)));
        assert_eq!(watcher.handle.snapshot().ttl, Some(10));

        // Same broken file is not retried until it changes again
        assert!(matches!(watcher.check().await, ReloadOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_overrides_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "ttl: 10\n", SystemTime::now() - Duration::from_secs(60));

        let source = ConfigSource::Explicit(path.clone());
        let overrides = ConfigOverrides {
            org: Some(9),
            ..Default::default()
        };
        let config = GatewayConfig::load(&source, &overrides).unwrap();
        let handle = ConfigHandle::new(config);
        let mut watcher = ConfigWatcher::new(source, overrides, handle.clone()).await;

        write_config(&path, "ttl: 30\norg: 2\n", SystemTime::now());
        assert!(matches!(watcher.check().await, ReloadOutcome::Reloaded(_)));
        assert_eq!(handle.snapshot().org, Some(9));
        assert_eq!(handle.snapshot().ttl, Some(30));
    }
}
