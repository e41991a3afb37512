//! Sync backend trait definition.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use settingsync_common::{Category, Result, Snapshot};
use settingsync_host::{ConfigStore, SyncConfiguration};

/// Everything a backend factory may need to build a backend.
#[derive(Clone)]
pub struct BackendContext {
    /// Configuration read for the current operation.
    pub config: SyncConfiguration,
    /// Store the configuration came from, for persisting new document ids.
    pub store: Arc<dyn ConfigStore>,
    /// Live host directories a local backend must never write into.
    pub protected_dirs: Vec<PathBuf>,
}

impl BackendContext {
    pub fn new(config: SyncConfiguration, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            config,
            store,
            protected_dirs: Vec::new(),
        }
    }

    pub fn with_protected_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.protected_dirs.push(dir.into());
        self
    }
}

/// Persistence target for snapshots.
///
/// Every backend stores one document per [`Category`] and presents the same
/// contract whether it writes to disk or talks to a remote API.
/// Implementations must store settings as the raw text they were given.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Get the backend name (e.g., "local", "gist", "repository").
    fn name(&self) -> &str;

    /// Persist a snapshot.
    ///
    /// # Postconditions
    /// - The category's document is created or replaced
    /// - Returns a locator (path or URL) for the written document
    ///
    /// # Errors
    /// - Configuration errors (e.g., self-clobber guard)
    /// - Network/I/O errors
    /// - Authentication errors
    async fn export(&self, snapshot: &Snapshot) -> Result<String>;

    /// Read back the snapshot for a category.
    ///
    /// # Errors
    /// - Nothing has been exported for this category
    /// - Network/I/O errors
    /// - Malformed document
    async fn import(&self, category: Category) -> Result<Snapshot>;

    /// Verify the backend is usable, reporting why when it is not.
    async fn check(&self) -> Result<()>;

    /// Verify the backend is usable.
    async fn test(&self) -> bool {
        match self.check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("{} backend check failed: {}", self.name(), e);
                false
            }
        }
    }
}
