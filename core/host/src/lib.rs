//! Host abstraction for settingsync.
//!
//! This module provides:
//! - Capability interfaces onto the editor ([`Host`]) and the user ([`Interaction`])
//! - Configuration stores and the validated [`SyncConfiguration`]
//! - Editor edition and path detection
//! - A filesystem-backed editor host and an in-memory host for testing

pub mod config;
pub mod env;
pub mod host;
pub mod memory;
pub mod vscode;

pub use config::{
    expand_home, is_valid_repository_name, keys, ConfigStore, ExportMethod, JsonFileStore,
    MemoryConfigStore, SyncConfiguration, ValidationResult, CONFIG_NAMESPACE,
};
pub use env::{EditorEnvironment, Edition};
pub use host::{
    host_keys, Host, HostCapabilities, InstalledAddOn, Interaction, ManifestEntry, NoticeLevel,
    ThemeContributions,
};
pub use memory::{HostCommand, MemoryHost, ScriptedInteraction};
pub use vscode::VscodeHost;
