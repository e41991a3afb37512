//! Local filesystem sync backend.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use settingsync_common::{
    Category, Error, Result, SettingsSnapshot, SnippetFile, SnippetSnapshot, Snapshot,
    SNIPPET_EXTENSIONS,
};

use crate::provider::SyncBackend;

const SETTINGS_FILE: &str = "settings.json";
const WORKSPACE_SETTINGS_FILE: &str = "workspace-settings.json";

/// Local filesystem backend.
///
/// Stores each category under `<root>/<category>/`.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend rooted at `root`.
    ///
    /// Nothing is created on disk until the first export.
    ///
    /// # Errors
    /// - `root` resolves to one of the `protected` live host directories
    pub fn new(root: impl AsRef<Path>, protected: &[PathBuf]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let resolved = normalize_path(&root);

        if let Some(dir) = protected.iter().find(|p| normalize_path(p) == resolved) {
            return Err(Error::Configuration(format!(
                "Local sync path {} is the editor's live configuration directory {}",
                root.display(),
                dir.display()
            )));
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.as_str())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::FileSystem(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write_file(path: &Path, content: &str) -> Result<()> {
        fs::write(path, content).await.map_err(|e| {
            Error::FileSystem(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    async fn export_settings(dir: &Path, settings: &SettingsSnapshot) -> Result<()> {
        let user = settings.user_raw.as_deref().unwrap_or("{}");
        Self::write_file(&dir.join(SETTINGS_FILE), user).await?;

        let workspace_path = dir.join(WORKSPACE_SETTINGS_FILE);
        match &settings.workspace_raw {
            Some(raw) => Self::write_file(&workspace_path, raw).await?,
            None => {
                if fs::try_exists(&workspace_path).await.unwrap_or(false) {
                    fs::remove_file(&workspace_path).await?;
                }
            }
        }
        Ok(())
    }

    async fn export_snippets(dir: &Path, snippets: &SnippetSnapshot) -> Result<()> {
        // Full replace: drop snippet files from earlier exports first.
        for (path, _) in list_snippet_files(dir).await? {
            fs::remove_file(&path).await?;
        }

        snippets.validate()?;
        for (name, file) in &snippets.snippets {
            let path = dir.join(format!("{}{}", name, file.extension));
            Self::write_file(&path, &file.content).await?;
        }
        Ok(())
    }

    async fn import_snippets(dir: &Path) -> Result<Snapshot> {
        let mut snippets = BTreeMap::new();
        for (path, extension) in list_snippet_files(dir).await? {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            let name = file_name[..file_name.len() - extension.len()].to_string();
            let content = fs::read_to_string(&path).await.map_err(|e| {
                Error::FileSystem(format!("Failed to read {}: {}", path.display(), e))
            })?;
            snippets.insert(
                name,
                SnippetFile {
                    content,
                    extension: extension.to_string(),
                },
            );
        }
        Ok(Snapshot::Snippets(SnippetSnapshot::new(snippets)))
    }
}

/// Snippet files in `dir` with their matched extension.
async fn list_snippet_files(dir: &Path) -> Result<Vec<(PathBuf, &'static str)>> {
    let mut found = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        // `.code-snippets` first so `x.code-snippets` never matches as `.json`.
        let matched = SNIPPET_EXTENSIONS
            .iter()
            .rev()
            .find(|ext| name.len() > ext.len() && name.ends_with(*ext));
        if let Some(ext) = matched {
            found.push((entry.path(), *ext));
        }
    }
    found.sort();
    Ok(found)
}

/// Resolve `path` to an absolute form for comparison.
///
/// Existing paths are canonicalized; otherwise `.` and `..` are folded lexically.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl SyncBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn export(&self, snapshot: &Snapshot) -> Result<String> {
        let category = snapshot.category();
        let dir = self.category_dir(category);
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::FileSystem(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        match snapshot {
            Snapshot::Settings(settings) => Self::export_settings(&dir, settings).await?,
            Snapshot::Snippets(snippets) => Self::export_snippets(&dir, snippets).await?,
            other => {
                let path = dir.join(category.remote_file_name());
                Self::write_file(&path, &other.to_document()?).await?;
            }
        }

        info!("Exported {} to {}", category, dir.display());
        Ok(dir.display().to_string())
    }

    async fn import(&self, category: Category) -> Result<Snapshot> {
        let dir = self.category_dir(category);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "No exported {} found in {}",
                category,
                self.root.display()
            )));
        }

        let snapshot = match category {
            Category::Settings => {
                let user = Self::read_optional(&dir.join(SETTINGS_FILE)).await?;
                let workspace = Self::read_optional(&dir.join(WORKSPACE_SETTINGS_FILE)).await?;
                if user.is_none() && workspace.is_none() {
                    return Err(Error::NotFound(format!(
                        "No settings files in {}",
                        dir.display()
                    )));
                }
                Snapshot::Settings(SettingsSnapshot::new(user, workspace))
            }
            Category::Snippets => Self::import_snippets(&dir).await?,
            _ => {
                let path = dir.join(category.remote_file_name());
                let text = Self::read_optional(&path).await?.ok_or_else(|| {
                    Error::NotFound(format!("{} does not exist", path.display()))
                })?;
                Snapshot::from_document(category, &text)?
            }
        };

        debug!("Imported {} from {}", category, dir.display());
        Ok(snapshot)
    }

    async fn check(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::FileSystem(format!("Cannot create {}: {}", self.root.display(), e))
        })?;

        let marker = self.root.join(format!(".settingsync-check-{}", Uuid::new_v4()));
        fs::write(&marker, b"check").await.map_err(|e| {
            Error::FileSystem(format!("{} is not writable: {}", self.root.display(), e))
        })?;
        fs::remove_file(&marker).await?;
        Ok(())
    }
}
