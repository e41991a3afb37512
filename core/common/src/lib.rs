//! Common utilities and types shared across settingsync modules.
//!
//! This module provides the error type, add-on identifiers, sync categories,
//! and the snapshot records that flow between the collector, the backends
//! and the reconciler.

pub mod error;
pub mod jsonc;
pub mod snapshot;
pub mod types;
pub mod version;

pub use error::{Error, ErrorKind, Result};
pub use jsonc::{from_jsonc, parse_jsonc, set_top_level_key};
pub use snapshot::{
    is_plain_file_name, ActiveThemes, AddOnRecord, AddOnSnapshot, SettingsSnapshot, SnippetFile,
    SnippetSnapshot, Snapshot, ThemeProvider, ThemeSnapshot, SNIPPET_EXTENSIONS,
    WORKSPACE_SNIPPET_PREFIX,
};
pub use types::{AddOnId, Category, Credential, OriginSource};
pub use version::{compare_versions, validate_version};
