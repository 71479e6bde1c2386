//! Catalog Store
//!
//! Holds the active [`CatalogSnapshot`] behind an atomically swapped `Arc`.
//! Readers clone the `Arc` and never observe a half-loaded catalog; a failed
//! reload leaves the previous snapshot in place.

use super::events::CatalogEvent;
use super::snapshot::CatalogSnapshot;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Catalog store configuration
#[derive(Debug, Clone)]
pub struct CatalogStoreConfig {
    /// Catalog file
    pub path: PathBuf,
    /// Root for relative chart paths (catalog directory when `None`)
    pub charts_root: Option<PathBuf>,
    /// Poll interval for change detection
    pub reload_interval: Duration,
}

impl Default for CatalogStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("modules.yaml"),
            charts_root: None,
            reload_interval: Duration::from_secs(10),
        }
    }
}

/// Source of truth for module definitions
pub struct CatalogStore {
    config: Option<CatalogStoreConfig>,
    current: RwLock<Arc<CatalogSnapshot>>,
    last_modified: Mutex<Option<SystemTime>>,
    event_sender: broadcast::Sender<CatalogEvent>,
}

impl CatalogStore {
    /// Load the catalog file and build a store that can reload it
    pub fn open(config: CatalogStoreConfig) -> Result<Arc<Self>> {
        let snapshot = CatalogSnapshot::load(&config.path, config.charts_root.as_deref())?;
        let modified = modified_time(&config.path);

        info!(
            "Loaded catalog {} with {} modules",
            config.path.display(),
            snapshot.len()
        );

        let (event_sender, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            config: Some(config),
            current: RwLock::new(Arc::new(snapshot)),
            last_modified: Mutex::new(modified),
            event_sender,
        }))
    }

    /// Store over a fixed snapshot; [`reload`](Self::reload) is unavailable
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(64);
        Arc::new(Self {
            config: None,
            current: RwLock::new(Arc::new(snapshot)),
            last_modified: Mutex::new(None),
            event_sender,
        })
    }

    /// Subscribe to reload events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.event_sender.subscribe()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.read().clone()
    }

    /// Install a snapshot directly
    pub fn replace(&self, snapshot: CatalogSnapshot) {
        let module_count = snapshot.len();
        let source = snapshot.source().to_string();
        *self.current.write() = Arc::new(snapshot);
        let _ = self.event_sender.send(CatalogEvent::Reloaded {
            source,
            module_count,
        });
    }

    /// Re-read the catalog file and swap it in if it is valid
    pub async fn reload(&self) -> Result<Arc<CatalogSnapshot>> {
        let config = self.config.as_ref().ok_or_else(|| {
            Error::Configuration("catalog store has no backing file".to_string())
        })?;
        let source = config.path.display().to_string();

        let loaded = match tokio::fs::read_to_string(&config.path).await {
            Ok(text) => {
                let root = config
                    .charts_root
                    .clone()
                    .or_else(|| config.path.parent().map(PathBuf::from))
                    .unwrap_or_default();
                CatalogSnapshot::from_yaml(&text, &source, &root)
            }
            Err(e) => Err(Error::CatalogParse {
                source_name: source.clone(),
                reason: e.to_string(),
            }),
        };

        *self.last_modified.lock() = modified_time(&config.path);

        match loaded {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write() = snapshot.clone();
                info!("Reloaded catalog {} ({} modules)", source, snapshot.len());
                let _ = self.event_sender.send(CatalogEvent::Reloaded {
                    source,
                    module_count: snapshot.len(),
                });
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Catalog reload failed, keeping previous snapshot: {}", e);
                let _ = self.event_sender.send(CatalogEvent::ReloadFailed {
                    source,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Reload when the file's modification time changed. Returns true if a
    /// new snapshot was installed.
    ///
    /// A missing file counts as a state of its own, so a deleted or broken
    /// catalog fails once per change instead of once per poll.
    pub async fn reload_if_changed(&self) -> Result<bool> {
        let Some(config) = self.config.as_ref() else {
            return Ok(false);
        };

        let modified = modified_time(&config.path);
        if modified == *self.last_modified.lock() {
            return Ok(false);
        }

        debug!("Catalog {} changed on disk", config.path.display());
        self.reload().await.map(|_| true)
    }

    /// Poll the catalog file until `shutdown` fires
    pub fn spawn_watcher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        let interval = store
            .config
            .as_ref()
            .map(|c| c.reload_interval)
            .unwrap_or(Duration::from_secs(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Catalog watcher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        // failures are already logged and broadcast
                        let _ = store.reload_if_changed().await;
                    }
                }
            }
        })
    }
}

fn modified_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
