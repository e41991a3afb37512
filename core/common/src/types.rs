//! Common types used throughout settingsync.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identifier of an add-on, `publisher.name`.
///
/// Equality and hashing ignore ASCII case, so `Foo.Bar` and `foo.bar`
/// name the same add-on. The original spelling is kept for display.
#[derive(Debug, Clone, Eq)]
pub struct AddOnId(String);

impl AddOnId {
    /// Create a new AddOnId.
    ///
    /// # Errors
    /// - Returns error if id is empty after trimming
    /// - Returns error unless the id is `publisher.name`, each half starting
    ///   with an ASCII letter or digit and otherwise holding only letters,
    ///   digits, `-` and `_`
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Add-on id cannot be empty".to_string(),
            ));
        }
        let valid = match id.split_once('.') {
            Some((publisher, name)) => is_id_part(publisher) && is_id_part(name),
            None => false,
        };
        if !valid {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid add-on id '{}' (expected publisher.name)",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the id as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used as a lookup key.
    pub fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Split into `(publisher, name)`.
    ///
    /// Returns `None` when either half is missing.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let (publisher, name) = self.0.split_once('.')?;
        if publisher.is_empty() || name.is_empty() {
            None
        } else {
            Some((publisher, name))
        }
    }
}

fn is_id_part(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        _ => false,
    }
}

impl PartialEq for AddOnId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for AddOnId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for AddOnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AddOnId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl Serialize for AddOnId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AddOnId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AddOnId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// A synchronized configuration category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Extensions,
    Settings,
    Themes,
    Snippets,
}

impl Category {
    /// All categories in sync order.
    pub const ALL: [Category; 4] = [
        Category::Extensions,
        Category::Settings,
        Category::Themes,
        Category::Snippets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Extensions => "extensions",
            Category::Settings => "settings",
            Category::Themes => "themes",
            Category::Snippets => "snippets",
        }
    }

    /// File name used for this category in a remote document.
    pub fn remote_file_name(&self) -> String {
        format!("vscode-{}.json", self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extensions" | "addons" | "add-ons" => Ok(Category::Extensions),
            "settings" => Ok(Category::Settings),
            "themes" => Ok(Category::Themes),
            "snippets" => Ok(Category::Snippets),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown category '{}'",
                other
            ))),
        }
    }
}

/// Where an add-on record was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginSource {
    /// Reported by the live host enumeration.
    #[default]
    Api,
    /// Only present in a stale manifest file.
    ManifestOnly,
}

impl OriginSource {
    pub fn is_api(&self) -> bool {
        matches!(self, OriginSource::Api)
    }
}

/// Access token for a remote backend. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// First four characters followed by a mask.
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{}****", prefix)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}
