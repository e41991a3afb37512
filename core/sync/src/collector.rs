//! Reads the host's current state into snapshots.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

use settingsync_common::{
    ActiveThemes, AddOnRecord, AddOnSnapshot, Category, OriginSource, Result, SettingsSnapshot,
    SnippetFile, SnippetSnapshot, Snapshot, ThemeProvider, ThemeSnapshot, SNIPPET_EXTENSIONS,
    WORKSPACE_SNIPPET_PREFIX,
};
use settingsync_host::{host_keys, Host, SyncConfiguration};

use crate::ignore::IgnoreSet;

/// Workspace-local editor directory.
pub(crate) const WORKSPACE_DIR: &str = ".vscode";
const WORKSPACE_SNIPPETS_DIR: &str = "snippets";

/// Collects snapshots from a [`Host`].
pub struct Collector {
    host: Arc<dyn Host>,
}

impl Collector {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    /// Collect one category using the given configuration.
    pub async fn collect(&self, category: Category, config: &SyncConfiguration) -> Result<Snapshot> {
        let snapshot = match category {
            Category::Extensions => {
                let ignore = IgnoreSet::new(&config.ignored_extensions);
                Snapshot::Extensions(
                    self.addons(&ignore, config.sync_disabled_extensions)
                        .await?,
                )
            }
            Category::Settings => Snapshot::Settings(self.settings().await?),
            Category::Themes => Snapshot::Themes(self.themes().await?),
            Category::Snippets => Snapshot::Snippets(self.snippets().await?),
        };
        Ok(snapshot)
    }

    /// Installed add-ons, minus built-ins and ignored ids.
    ///
    /// With `include_manifest_only`, add-ons listed only in the host's
    /// manifest file are added as disabled, inactive records.
    pub async fn addons(&self, ignore: &IgnoreSet, include_manifest_only: bool) -> Result<AddOnSnapshot> {
        let installed = self.host.installed_addons().await?;
        let disabled = self.disabled_keys().await;

        let mut seen = HashSet::new();
        let mut list = Vec::new();

        for addon in installed {
            if addon.builtin || ignore.is_ignored(&addon.id) || !seen.insert(addon.id.key()) {
                continue;
            }
            let enabled = !disabled.contains(&addon.id.key());
            list.push(AddOnRecord {
                id: addon.id,
                display_name: addon.display_name,
                version: addon.version,
                publisher: addon.publisher,
                description: addon.description,
                active: addon.active,
                enabled,
                origin_source: OriginSource::Api,
            });
        }

        if include_manifest_only {
            match self.host.manifest_entries().await {
                Ok(entries) => {
                    for entry in entries {
                        if ignore.is_ignored(&entry.id) || !seen.insert(entry.id.key()) {
                            continue;
                        }
                        debug!("Including manifest-only add-on {}", entry.id);
                        let mut record = AddOnRecord::new(entry.id, entry.version);
                        record.enabled = false;
                        record.origin_source = OriginSource::ManifestOnly;
                        list.push(record);
                    }
                }
                Err(e) => warn!("Failed to read add-on manifest: {}", e),
            }
        }

        debug!("Collected {} add-ons", list.len());
        Ok(AddOnSnapshot::new(list))
    }

    /// Lowercased ids from both disabled lists. Unreadable lists count as empty.
    async fn disabled_keys(&self) -> HashSet<String> {
        let mut keys = HashSet::new();

        match self
            .host
            .settings()
            .get_string_list(host_keys::DISABLED_EXTENSIONS)
            .await
        {
            Ok(ids) => keys.extend(ids.iter().map(|id| id.to_ascii_lowercase())),
            Err(e) => warn!("Could not read disabled list from settings: {}", e),
        }

        match self.host.disabled_addons().await {
            Ok(ids) => keys.extend(ids.iter().map(|id| id.to_ascii_lowercase())),
            Err(e) => warn!("Could not read disabled list from host state: {}", e),
        }

        keys
    }

    /// Raw user settings text plus the first workspace folder's settings.
    pub async fn settings(&self) -> Result<SettingsSnapshot> {
        let user_raw = read_optional(&self.host.user_settings_path()).await?;
        let workspace_raw = match self.host.workspace_folders().first() {
            Some(folder) => {
                read_optional(&folder.join(WORKSPACE_DIR).join("settings.json")).await?
            }
            None => None,
        };
        Ok(SettingsSnapshot::new(user_raw, workspace_raw))
    }

    pub async fn themes(&self) -> Result<ThemeSnapshot> {
        let settings = self.host.settings();
        let current = ActiveThemes {
            color_theme: settings.get_string(host_keys::COLOR_THEME).await?,
            icon_theme: settings.get_string(host_keys::ICON_THEME).await?,
            product_icon_theme: settings.get_string(host_keys::PRODUCT_ICON_THEME).await?,
        };

        let available = self
            .host
            .installed_addons()
            .await?
            .into_iter()
            .filter(|a| !a.contributes.is_empty())
            .map(|a| ThemeProvider {
                id: a.id,
                name: a.display_name,
                themes: a.contributes.themes,
                icon_themes: a.contributes.icon_themes,
                product_icon_themes: a.contributes.product_icon_themes,
            })
            .collect();

        Ok(ThemeSnapshot::new(current, available))
    }

    /// User snippet files plus those in each workspace's `.vscode/snippets`.
    pub async fn snippets(&self) -> Result<SnippetSnapshot> {
        let mut snippets = BTreeMap::new();

        for (name, file) in read_snippet_dir(&self.host.snippets_dir(), &SNIPPET_EXTENSIONS).await? {
            snippets.insert(name, file);
        }

        for folder in self.host.workspace_folders() {
            let dir = folder.join(WORKSPACE_DIR).join(WORKSPACE_SNIPPETS_DIR);
            for (name, file) in read_snippet_dir(&dir, &SNIPPET_EXTENSIONS).await? {
                snippets.insert(format!("{}{}", WORKSPACE_SNIPPET_PREFIX, name), file);
            }
        }

        debug!("Collected {} snippet files", snippets.len());
        Ok(SnippetSnapshot::new(snippets))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Snippet files in `dir` keyed by base name. A missing directory is empty.
async fn read_snippet_dir(dir: &Path, extensions: &[&str]) -> Result<Vec<(String, SnippetFile)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(ext) = extensions.iter().find(|ext| file_name.ends_with(**ext)) else {
            continue;
        };
        let name = file_name[..file_name.len() - ext.len()].to_string();
        if name.is_empty() {
            continue;
        }
        let content = fs::read_to_string(entry.path()).await?;
        files.push((
            name,
            SnippetFile {
                content,
                extension: ext.to_string(),
            },
        ));
    }
    Ok(files)
}
