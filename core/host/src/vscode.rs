//! Filesystem-backed editor host.
//!
//! Works against an editor install from the outside: add-ons are read from
//! the extensions directory, the disabled list from the editor's state
//! database, and installs go through the editor's command-line launcher.
//! Toggling, reloading and opening views need a running editor, so those
//! capabilities are reported as unavailable.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use settingsync_common::{compare_versions, from_jsonc, AddOnId, Error, Result};

use crate::config::{ConfigStore, JsonFileStore};
use crate::env::EditorEnvironment;
use crate::host::{Host, HostCapabilities, InstalledAddOn, ManifestEntry, ThemeContributions};

/// Key in the state database holding disabled add-ons.
const DISABLED_STATE_KEY: &str = "extensionsIdentifiers/disabled";

/// Subset of an add-on's `package.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddOnManifest {
    name: String,
    publisher: String,
    version: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_builtin: bool,
    #[serde(default)]
    contributes: ThemeContributions,
}

impl AddOnManifest {
    fn into_installed(self, location: PathBuf) -> Result<InstalledAddOn> {
        let id = AddOnId::new(format!("{}.{}", self.publisher, self.name))?;
        // Localized manifests carry `%placeholder%` names.
        let display_name = self
            .display_name
            .filter(|n| !n.is_empty() && !n.starts_with('%'))
            .unwrap_or_else(|| self.name.clone());
        let description = self
            .description
            .filter(|d| !d.starts_with('%'))
            .unwrap_or_default();

        Ok(InstalledAddOn {
            id,
            display_name,
            version: self.version,
            publisher: self.publisher,
            description,
            active: false,
            builtin: self.is_builtin,
            location: Some(location),
            contributes: self.contributes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ManifestIdentifier {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawManifestEntry {
    identifier: ManifestIdentifier,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct DisabledEntry {
    id: String,
}

/// Editor host operating on the editor's files.
pub struct VscodeHost {
    env: EditorEnvironment,
    cli: String,
    workspace_folders: Vec<PathBuf>,
    settings: Arc<JsonFileStore>,
}

impl VscodeHost {
    /// Create a host for a resolved environment.
    pub fn new(env: EditorEnvironment) -> Self {
        let settings = Arc::new(JsonFileStore::new(env.settings_path(), None));
        Self {
            cli: env.edition().cli_command().to_string(),
            env,
            workspace_folders: Vec::new(),
            settings,
        }
    }

    pub fn with_workspace_folders(mut self, folders: Vec<PathBuf>) -> Self {
        self.workspace_folders = folders;
        self
    }

    /// Use a different launcher for host-side installs.
    pub fn with_cli_command(mut self, cli: impl Into<String>) -> Self {
        self.cli = cli.into();
        self
    }

    pub fn environment(&self) -> &EditorEnvironment {
        &self.env
    }

    /// Directory names the editor has scheduled for deletion.
    async fn obsolete_dirs(&self) -> HashSet<String> {
        let path = self.env.obsolete_path();
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(_) => return HashSet::new(),
        };
        match from_jsonc::<HashMap<String, bool>>(&text) {
            Ok(map) => map
                .into_iter()
                .filter(|(_, pending)| *pending)
                .map(|(name, _)| name)
                .collect(),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                HashSet::new()
            }
        }
    }

    /// Scan the extensions directory, keeping the newest version per id.
    async fn scan(&self) -> Result<Vec<InstalledAddOn>> {
        let dir = self.env.extensions_dir();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Extensions directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::FileSystem(format!(
                    "Failed to read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let obsolete = self.obsolete_dirs().await;
        let mut by_id: HashMap<AddOnId, InstalledAddOn> = HashMap::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || obsolete.contains(&name) {
                continue;
            }
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let manifest_path = entry.path().join("package.json");
            let text = match fs::read_to_string(&manifest_path).await {
                Ok(text) => text,
                Err(_) => {
                    debug!("No package.json in {}", entry.path().display());
                    continue;
                }
            };
            let manifest: AddOnManifest = match from_jsonc(&text) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Skipping {}: {}", manifest_path.display(), e);
                    continue;
                }
            };

            let addon = match manifest.into_installed(entry.path()) {
                Ok(addon) => addon,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            let newer = by_id
                .get(&addon.id)
                .map(|existing| {
                    compare_versions(&addon.version, &existing.version) == Ordering::Greater
                })
                .unwrap_or(true);
            if newer {
                by_id.insert(addon.id.clone(), addon);
            }
        }

        let mut list: Vec<InstalledAddOn> = by_id.into_values().collect();
        list.sort_by_key(|a| a.id.key());
        Ok(list)
    }
}

fn read_disabled_from_state(path: &Path) -> Result<Vec<String>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::FileSystem(format!("Failed to open {}: {}", path.display(), e)))?;

    let raw = conn.query_row(
        "SELECT value FROM ItemTable WHERE key = ?1",
        [DISABLED_STATE_KEY],
        |row| {
            Ok(match row.get_ref(0)? {
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    String::from_utf8_lossy(bytes).into_owned()
                }
                _ => String::new(),
            })
        },
    );

    let raw = match raw {
        Ok(raw) => raw,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::FileSystem(format!(
                "Failed to query {}: {}",
                path.display(),
                e
            )))
        }
    };

    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<DisabledEntry> = serde_json::from_str(&raw)?;
    Ok(entries.into_iter().map(|e| e.id).collect())
}

async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[async_trait]
impl Host for VscodeHost {
    fn name(&self) -> &str {
        "vscode"
    }

    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities::default()
    }

    fn user_dir(&self) -> PathBuf {
        self.env.user_dir()
    }

    fn user_settings_path(&self) -> PathBuf {
        self.env.settings_path()
    }

    fn snippets_dir(&self) -> PathBuf {
        self.env.snippets_dir()
    }

    fn extensions_dir(&self) -> PathBuf {
        self.env.extensions_dir().to_path_buf()
    }

    fn workspace_folders(&self) -> Vec<PathBuf> {
        self.workspace_folders.clone()
    }

    fn settings(&self) -> Arc<dyn ConfigStore> {
        self.settings.clone()
    }

    async fn installed_addons(&self) -> Result<Vec<InstalledAddOn>> {
        self.scan().await
    }

    async fn disabled_addons(&self) -> Result<Vec<String>> {
        let path = self.env.state_db_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        tokio::task::spawn_blocking(move || read_disabled_from_state(&path))
            .await
            .map_err(|e| Error::FileSystem(format!("State reader task failed: {}", e)))?
    }

    async fn manifest_entries(&self) -> Result<Vec<ManifestEntry>> {
        let path = self.env.manifest_path();
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::FileSystem(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let raw: Vec<RawManifestEntry> = from_jsonc(&text)?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| match AddOnId::new(&entry.identifier.id) {
                Ok(id) => Some(ManifestEntry {
                    id,
                    version: entry.version,
                }),
                Err(e) => {
                    warn!("Skipping manifest entry: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn install_addon(&self, id: &AddOnId) -> Result<()> {
        info!("Installing {} with '{}'", id, self.cli);
        let output = Command::new(&self.cli)
            .arg("--extensions-dir")
            .arg(self.env.extensions_dir())
            .arg("--install-extension")
            .arg(id.as_str())
            .arg("--force")
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Extension(format!("Editor command '{}' is not on PATH", self.cli))
                } else {
                    Error::Extension(format!("Failed to run '{}': {}", self.cli, e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Extension(format!(
                "'{} --install-extension {}' failed: {}",
                self.cli,
                id,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn uninstall_addon(&self, id: &AddOnId) -> Result<()> {
        let installed = self.scan().await?;
        let Some(location) = installed
            .into_iter()
            .find(|a| &a.id == id)
            .and_then(|a| a.location)
        else {
            debug!("{} is not installed, nothing to remove", id);
            return Ok(());
        };

        fs::remove_dir_all(&location).await.map_err(|e| {
            Error::Extension(format!("Failed to remove {}: {}", location.display(), e))
        })?;
        info!("Removed {}", location.display());
        Ok(())
    }

    async fn set_addon_enabled(&self, _id: &AddOnId, _enabled: bool) -> Result<()> {
        Err(Error::NotSupported(
            "Enabling or disabling add-ons requires a running editor".to_string(),
        ))
    }

    async fn refresh_addon_index(&self) -> Result<()> {
        remove_if_exists(&self.env.manifest_path()).await;
        remove_if_exists(&self.env.obsolete_path()).await;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Err(Error::NotSupported(
            "Reloading requires a running editor".to_string(),
        ))
    }

    async fn open_addon_view(&self) -> Result<()> {
        Err(Error::NotSupported(
            "The add-on view requires a running editor".to_string(),
        ))
    }
}
