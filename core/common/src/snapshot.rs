//! Snapshot records captured from the host and exchanged with backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{AddOnId, Category, OriginSource};
use crate::version::validate_version;
use crate::{Error, Result};

fn default_true() -> bool {
    true
}

/// One installed or remotely described add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOnRecord {
    /// `publisher.name`, compared case-insensitively.
    pub id: AddOnId,
    #[serde(alias = "name", default)]
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub description: String,
    /// Runtime activation state as reported by the host.
    #[serde(alias = "isActive", default)]
    pub active: bool,
    /// False when the add-on appears in any disabled list.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "OriginSource::is_api")]
    pub origin_source: OriginSource,
}

impl AddOnRecord {
    /// Create an enabled, live record.
    pub fn new(id: AddOnId, version: impl Into<String>) -> Self {
        Self {
            display_name: id.as_str().to_string(),
            id,
            version: version.into(),
            publisher: String::new(),
            description: String::new(),
            active: false,
            enabled: true,
            origin_source: OriginSource::Api,
        }
    }

    /// Name for messages: the display name, or the id when it has none.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.id.as_str()
        } else {
            &self.display_name
        }
    }
}

/// Set of add-ons captured at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOnSnapshot {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub list: Vec<AddOnRecord>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl AddOnSnapshot {
    pub fn new(list: Vec<AddOnRecord>) -> Self {
        Self {
            count: list.len(),
            list,
            timestamp: Utc::now(),
        }
    }

    /// Every version must be usable as a path component.
    pub fn validate(&self) -> Result<()> {
        for record in &self.list {
            validate_version(&record.version).map_err(|_| {
                Error::InvalidInput(format!(
                    "Add-on {} has invalid version '{}'",
                    record.id, record.version
                ))
            })?;
        }
        Ok(())
    }
}

/// Raw preference text. Never parsed, so comments and layout survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    #[serde(default)]
    pub user_raw: Option<String>,
    #[serde(default)]
    pub workspace_raw: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SettingsSnapshot {
    pub fn new(user_raw: Option<String>, workspace_raw: Option<String>) -> Self {
        Self {
            user_raw,
            workspace_raw,
            timestamp: Utc::now(),
        }
    }
}

/// The three active theme identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveThemes {
    #[serde(default)]
    pub color_theme: Option<String>,
    #[serde(default)]
    pub icon_theme: Option<String>,
    #[serde(default)]
    pub product_icon_theme: Option<String>,
}

/// An add-on that contributes themes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeProvider {
    pub id: AddOnId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub themes: Vec<Value>,
    #[serde(default)]
    pub icon_themes: Vec<Value>,
    #[serde(default)]
    pub product_icon_themes: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeSnapshot {
    #[serde(default)]
    pub current: ActiveThemes,
    #[serde(default)]
    pub available: Vec<ThemeProvider>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ThemeSnapshot {
    pub fn new(current: ActiveThemes, available: Vec<ThemeProvider>) -> Self {
        Self {
            current,
            available,
            timestamp: Utc::now(),
        }
    }
}

/// Content of one snippet file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetFile {
    pub content: String,
    /// `.json` or `.code-snippets`.
    #[serde(alias = "ext")]
    pub extension: String,
}

impl SnippetFile {
    pub fn has_known_extension(&self) -> bool {
        SNIPPET_EXTENSIONS.contains(&self.extension.as_str())
    }
}

/// Snippet files keyed by base name. Workspace files carry a `workspace-` prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetSnapshot {
    #[serde(default)]
    pub snippets: BTreeMap<String, SnippetFile>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SnippetSnapshot {
    pub fn new(snippets: BTreeMap<String, SnippetFile>) -> Self {
        Self {
            snippets,
            timestamp: Utc::now(),
        }
    }

    /// Reject entries that would not land as a plain snippet file.
    pub fn validate(&self) -> Result<()> {
        for (name, file) in &self.snippets {
            if !is_plain_file_name(name) || !file.has_known_extension() {
                return Err(Error::InvalidInput(format!(
                    "Invalid snippet file name '{}{}'",
                    name, file.extension
                )));
            }
        }
        Ok(())
    }
}

/// True for a single path component other than `.` and `..`.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

/// Prefix marking snippet files read from a workspace folder.
pub const WORKSPACE_SNIPPET_PREFIX: &str = "workspace-";

/// Snippet file extensions that are collected and restored.
pub const SNIPPET_EXTENSIONS: [&str; 2] = [".json", ".code-snippets"];

/// A snapshot of any category.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Extensions(AddOnSnapshot),
    Settings(SettingsSnapshot),
    Themes(ThemeSnapshot),
    Snippets(SnippetSnapshot),
}

impl Snapshot {
    pub fn category(&self) -> Category {
        match self {
            Snapshot::Extensions(_) => Category::Extensions,
            Snapshot::Settings(_) => Category::Settings,
            Snapshot::Themes(_) => Category::Themes,
            Snapshot::Snippets(_) => Category::Snippets,
        }
    }

    /// Encode as the single-file document stored by remote backends.
    ///
    /// Settings are stored as the raw user preference text.
    pub fn to_document(&self) -> Result<String> {
        let text = match self {
            Snapshot::Settings(settings) => settings
                .user_raw
                .clone()
                .unwrap_or_else(|| "{}".to_string()),
            Snapshot::Extensions(s) => serde_json::to_string_pretty(s)?,
            Snapshot::Themes(s) => serde_json::to_string_pretty(s)?,
            Snapshot::Snippets(s) => serde_json::to_string_pretty(s)?,
        };
        Ok(text)
    }

    /// Decode a single-file document.
    pub fn from_document(category: Category, text: &str) -> Result<Self> {
        let snapshot = match category {
            Category::Settings => {
                Snapshot::Settings(SettingsSnapshot::new(Some(text.to_string()), None))
            }
            Category::Extensions => {
                let addons: AddOnSnapshot = decode(category, text)?;
                addons.validate()?;
                Snapshot::Extensions(addons)
            }
            Category::Themes => Snapshot::Themes(decode(category, text)?),
            Category::Snippets => {
                let snippets: SnippetSnapshot = decode(category, text)?;
                snippets.validate()?;
                Snapshot::Snippets(snippets)
            }
        };
        Ok(snapshot)
    }

    /// Unwrap an add-on snapshot or report a category mismatch.
    pub fn into_addons(self) -> Result<AddOnSnapshot> {
        match self {
            Snapshot::Extensions(s) => Ok(s),
            other => Err(mismatch(Category::Extensions, other.category())),
        }
    }

    pub fn into_settings(self) -> Result<SettingsSnapshot> {
        match self {
            Snapshot::Settings(s) => Ok(s),
            other => Err(mismatch(Category::Settings, other.category())),
        }
    }

    pub fn into_themes(self) -> Result<ThemeSnapshot> {
        match self {
            Snapshot::Themes(s) => Ok(s),
            other => Err(mismatch(Category::Themes, other.category())),
        }
    }

    pub fn into_snippets(self) -> Result<SnippetSnapshot> {
        match self {
            Snapshot::Snippets(s) => Ok(s),
            other => Err(mismatch(Category::Snippets, other.category())),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(category: Category, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        Error::Serialization(format!("Malformed {} document: {}", category, e))
    })
}

fn mismatch(expected: Category, found: Category) -> Error {
    Error::InvalidInput(format!("Expected {} snapshot, found {}", expected, found))
}
