//! In-memory sync backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use settingsync_common::{Category, Error, Result, Snapshot};

use crate::provider::SyncBackend;

/// In-memory sync backend.
///
/// Documents are kept as the serialized text a real backend would store, so
/// an export followed by an import goes through the same document format.
/// All data is lost on drop.
pub struct MemoryBackend {
    documents: RwLock<HashMap<Category, String>>,
    transient_failures: AtomicUsize,
    exports: AtomicUsize,
    imports: AtomicUsize,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            transient_failures: AtomicUsize::new(0),
            exports: AtomicUsize::new(0),
            imports: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` imports and checks with a network error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Raw stored document for a category.
    pub async fn document(&self, category: Category) -> Option<String> {
        self.documents.read().await.get(&category).cloned()
    }

    /// Store a raw document as if it had been exported elsewhere.
    pub async fn put_document(&self, category: Category, text: impl Into<String>) {
        self.documents.write().await.insert(category, text.into());
    }

    pub fn export_count(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<()> {
        let consumed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(Error::Network("Simulated transient failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn export(&self, snapshot: &Snapshot) -> Result<String> {
        let category = snapshot.category();
        let document = snapshot.to_document()?;
        self.documents.write().await.insert(category, document);
        self.exports.fetch_add(1, Ordering::SeqCst);
        Ok(format!("memory://{}", category.remote_file_name()))
    }

    async fn import(&self, category: Category) -> Result<Snapshot> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let documents = self.documents.read().await;
        let text = documents
            .get(&category)
            .ok_or_else(|| Error::NotFound(format!("No {} document stored", category)))?;
        Snapshot::from_document(category, text)
    }

    async fn check(&self) -> Result<()> {
        self.take_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settingsync_common::SettingsSnapshot;

    #[tokio::test]
    async fn test_export_import() {
        let backend = MemoryBackend::new();
        let raw = "{ // keep\n \"a\": 1 }";
        backend
            .export(&Snapshot::Settings(SettingsSnapshot::new(
                Some(raw.to_string()),
                None,
            )))
            .await
            .unwrap();

        assert_eq!(backend.document(Category::Settings).await.as_deref(), Some(raw));
        let back = backend
            .import(Category::Settings)
            .await
            .unwrap()
            .into_settings()
            .unwrap();
        assert_eq!(back.user_raw.as_deref(), Some(raw));
        assert_eq!(backend.export_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_document() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.import(Category::Snippets).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let backend = MemoryBackend::new().with_transient_failures(2);
        assert!(!backend.test().await);
        assert!(backend.check().await.is_err());
        assert!(backend.test().await);
    }
}
