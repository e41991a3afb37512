//! Capability interfaces onto the editor host and the user.
//!
//! The sync core never talks to an editor directly. Everything it needs
//! from the host (add-on enumeration, configuration, install commands)
//! goes through [`Host`], and everything it shows the user goes through
//! [`Interaction`]. Both have in-memory implementations in
//! [`crate::memory`] for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use settingsync_common::{AddOnId, Result};

use crate::config::ConfigStore;

/// Theme contributions declared by an add-on manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeContributions {
    #[serde(default)]
    pub themes: Vec<Value>,
    #[serde(default)]
    pub icon_themes: Vec<Value>,
    #[serde(default)]
    pub product_icon_themes: Vec<Value>,
}

impl ThemeContributions {
    pub fn is_empty(&self) -> bool {
        self.themes.is_empty() && self.icon_themes.is_empty() && self.product_icon_themes.is_empty()
    }
}

/// An add-on as reported by the live host.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledAddOn {
    pub id: AddOnId,
    pub display_name: String,
    pub version: String,
    pub publisher: String,
    pub description: String,
    /// Runtime activation state.
    pub active: bool,
    /// Shipped with the editor; never synchronized.
    pub builtin: bool,
    /// Install directory, when the host knows it.
    pub location: Option<PathBuf>,
    pub contributes: ThemeContributions,
}

impl InstalledAddOn {
    pub fn new(id: AddOnId, version: impl Into<String>) -> Self {
        Self {
            display_name: id.as_str().to_string(),
            id,
            version: version.into(),
            publisher: String::new(),
            description: String::new(),
            active: false,
            builtin: false,
            location: None,
            contributes: ThemeContributions::default(),
        }
    }
}

/// An add-on listed in the host's installed-add-on manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub id: AddOnId,
    pub version: String,
}

/// Optional host commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Enable and disable add-ons by id.
    pub toggle_addons: bool,
    /// Reload the running editor window.
    pub reload: bool,
    /// Open the add-on management view.
    pub addon_view: bool,
}

/// Well-known keys in the host's own configuration store.
pub mod host_keys {
    pub const DISABLED_EXTENSIONS: &str = "extensions.disabled";
    pub const AUTO_UPDATE_IGNORE_LIST: &str = "extensions.autoUpdate.ignoreList";
    pub const COLOR_THEME: &str = "workbench.colorTheme";
    pub const ICON_THEME: &str = "workbench.iconTheme";
    pub const PRODUCT_ICON_THEME: &str = "workbench.productIconTheme";
}

/// The editor host as seen by the sync core.
#[async_trait]
pub trait Host: Send + Sync {
    /// Get the host name (for logging).
    fn name(&self) -> &str;

    fn capabilities(&self) -> HostCapabilities;

    /// The live user configuration directory.
    fn user_dir(&self) -> PathBuf;

    /// User-scope raw preference file.
    fn user_settings_path(&self) -> PathBuf {
        self.user_dir().join("settings.json")
    }

    fn snippets_dir(&self) -> PathBuf {
        self.user_dir().join("snippets")
    }

    /// Directory holding installed add-ons.
    fn extensions_dir(&self) -> PathBuf;

    /// Open workspace folders, first one is primary.
    fn workspace_folders(&self) -> Vec<PathBuf>;

    /// The host's configuration store, global scope.
    fn settings(&self) -> Arc<dyn ConfigStore>;

    /// All installed add-ons, built-ins included.
    async fn installed_addons(&self) -> Result<Vec<InstalledAddOn>>;

    /// Ids disabled according to the host's on-disk state.
    async fn disabled_addons(&self) -> Result<Vec<String>>;

    /// Entries of the installed-add-on manifest file.
    async fn manifest_entries(&self) -> Result<Vec<ManifestEntry>>;

    /// Install the latest available version through the host's own installer.
    async fn install_addon(&self, id: &AddOnId) -> Result<()>;

    /// Remove the installed files of an add-on.
    async fn uninstall_addon(&self, id: &AddOnId) -> Result<()>;

    /// Enable or disable an add-on. Requires `toggle_addons`.
    async fn set_addon_enabled(&self, id: &AddOnId, enabled: bool) -> Result<()>;

    /// Drop cached add-on indexes after files were placed directly on disk.
    async fn refresh_addon_index(&self) -> Result<()>;

    /// Reload the running window. Requires `reload`.
    async fn reload(&self) -> Result<()>;

    /// Show the add-on management view. Requires `addon_view`.
    async fn open_addon_view(&self) -> Result<()>;
}

/// Severity of a user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Notifications, prompts and progress shown to the user.
#[async_trait]
pub trait Interaction: Send + Sync {
    /// Non-modal notification.
    fn notify(&self, level: NoticeLevel, message: &str);

    /// Modal prompt. Returns the chosen action, or `None` when dismissed.
    async fn prompt(&self, message: &str, actions: &[&str]) -> Option<String>;

    /// Advance progress by `increment` percent.
    fn progress(&self, increment: f64, message: &str);

    /// Show a longer text document such as a report.
    fn show_document(&self, title: &str, body: &str);
}
