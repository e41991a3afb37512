//! Backend registry for resolving the configured export method.

use std::collections::HashMap;
use std::sync::Arc;

use settingsync_common::{Credential, Error, Result};
use settingsync_host::{ExportMethod, SyncConfiguration};

use crate::github::{GistBackend, GitHubClient, RepositoryBackend};
use crate::local::LocalBackend;
use crate::provider::{BackendContext, SyncBackend};

/// Factory function type for creating backends.
pub type BackendFactory =
    Box<dyn Fn(&BackendContext) -> Result<Arc<dyn SyncBackend>> + Send + Sync>;

/// Registry for backend factories keyed by export method name.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build the backend selected by the context's `exportMethod`.
    ///
    /// # Errors
    /// - Unknown export method
    /// - No factory registered for the method
    /// - Factory rejected the configuration
    pub fn resolve(&self, ctx: &BackendContext) -> Result<Arc<dyn SyncBackend>> {
        let method = ctx.config.method()?;
        self.resolve_named(method.as_str(), ctx)
    }

    /// Build a backend by registered name.
    pub fn resolve_named(&self, name: &str, ctx: &BackendContext) -> Result<Arc<dyn SyncBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::Configuration(format!("Backend '{}' is not registered", name))
        })?;
        factory(ctx)
    }

    /// Get list of registered backend names.
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_token(config: &SyncConfiguration) -> Result<Credential> {
    config
        .remote_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Configuration("Remote token is not configured".to_string()))
}

fn local_backend(ctx: &BackendContext) -> Result<Arc<dyn SyncBackend>> {
    let root = ctx.config.local_path.as_ref().ok_or_else(|| {
        Error::Configuration("Local export path is not configured".to_string())
    })?;
    Ok(Arc::new(LocalBackend::new(root, &ctx.protected_dirs)?))
}

fn gist_backend(ctx: &BackendContext) -> Result<Arc<dyn SyncBackend>> {
    let client = GitHubClient::new(require_token(&ctx.config)?)?;
    Ok(Arc::new(GistBackend::new(
        client,
        ctx.config.remote_doc_id.clone(),
        ctx.store.clone(),
    )))
}

fn repository_backend(ctx: &BackendContext) -> Result<Arc<dyn SyncBackend>> {
    let client = GitHubClient::new(require_token(&ctx.config)?)?;
    let repo = ctx.config.repository_name.clone().ok_or_else(|| {
        Error::Configuration("Repository name is not configured".to_string())
    })?;
    Ok(Arc::new(RepositoryBackend::new(
        client,
        repo,
        ctx.config.repository_branch.clone(),
    )?))
}

/// Create a registry with the local, gist and repository backends.
pub fn create_default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    let factories: [(ExportMethod, BackendFactory); 3] = [
        (ExportMethod::Local, Box::new(local_backend)),
        (ExportMethod::Gist, Box::new(gist_backend)),
        (ExportMethod::Repository, Box::new(repository_backend)),
    ];

    for (method, factory) in factories {
        // Distinct names into an empty registry; registration cannot collide.
        let _ = registry.register(method.as_str(), factory);
    }

    registry
}
