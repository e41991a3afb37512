//! Configuration stores and the sync configuration read from them.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use settingsync_common::{parse_jsonc, set_top_level_key, Credential, Error, Result};

/// Keys recognized in the sync tool's own namespace.
pub mod keys {
    pub const EXPORT_METHOD: &str = "exportMethod";
    pub const LOCAL_PATH: &str = "localPath";
    pub const REMOTE_TOKEN: &str = "remoteToken";
    pub const REMOTE_DOC_ID: &str = "remoteDocId";
    pub const REPOSITORY_NAME: &str = "repositoryName";
    pub const REPOSITORY_BRANCH: &str = "repositoryBranch";
    pub const IGNORED_EXTENSIONS: &str = "ignoredExtensions";
    pub const SYNC_DISABLED_EXTENSIONS: &str = "syncDisabledExtensions";

    /// Every key, for listing and `config set` validation.
    pub const ALL: [&str; 8] = [
        EXPORT_METHOD,
        LOCAL_PATH,
        REMOTE_TOKEN,
        REMOTE_DOC_ID,
        REPOSITORY_NAME,
        REPOSITORY_BRANCH,
        IGNORED_EXTENSIONS,
        SYNC_DISABLED_EXTENSIONS,
    ];
}

/// Namespace under which the sync tool stores its keys.
pub const CONFIG_NAMESPACE: &str = "settingsync";

/// A key-value configuration store with global write scope.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a key. Missing keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a key. Writing `Value::Null` removes it.
    async fn update(&self, key: &str, value: Value) -> Result<()>;

    /// Read a non-blank string.
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty()))
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get(key).await?.and_then(|v| v.as_bool()))
    }

    /// Read a list of strings, skipping non-string entries.
    async fn get_string_list(&self, key: &str) -> Result<Vec<String>> {
        let list = match self.get(key).await? {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(list)
    }
}

/// Configuration persisted as a flat JSON object in a file.
///
/// Keys are stored the way editor settings are, `namespace.key`. The file
/// may contain comments and trailing commas; updates edit only the member
/// for the key, so comments and key order survive.
pub struct JsonFileStore {
    path: PathBuf,
    namespace: Option<String>,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store over `path`. The file is created on first update.
    pub fn new(path: impl Into<PathBuf>, namespace: Option<&str>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.map(str::to_string),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn full_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, key),
            None => key.to_string(),
        }
    }

    async fn read_text(&self) -> Result<String> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::FileSystem(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match parse_jsonc(&self.read_text().await?)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::Serialization(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let map = self.load().await?;
        Ok(map.get(&self.full_key(key)).cloned())
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let full_key = self.full_key(key);
        let text = set_top_level_key(&self.read_text().await?, &full_key, &value)
            .map_err(|e| {
                Error::Serialization(format!("Cannot update {}: {}", self.path.display(), e))
            })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!("Updated configuration key {} in {}", full_key, self.path.display());
        Ok(())
    }
}

/// In-memory configuration store for testing.
#[derive(Default)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seed for tests.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.values.get_mut().insert(key.to_string(), value);
        self
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().await;
        if value.is_null() {
            values.remove(key);
        } else {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }
}

/// Persistence target selected by `exportMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportMethod {
    Local,
    Gist,
    Repository,
}

impl ExportMethod {
    pub const ALL: [ExportMethod; 3] =
        [ExportMethod::Local, ExportMethod::Gist, ExportMethod::Repository];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMethod::Local => "local",
            ExportMethod::Gist => "gist",
            ExportMethod::Repository => "repository",
        }
    }
}

impl fmt::Display for ExportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(ExportMethod::Local),
            "gist" => Ok(ExportMethod::Gist),
            "repository" => Ok(ExportMethod::Repository),
            other => Err(Error::Configuration(format!(
                "Invalid export method '{}' (expected local, gist or repository)",
                other
            ))),
        }
    }
}

/// Outcome of [`SyncConfiguration::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a `Configuration` error when invalid.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::Configuration(self.errors.join("; ")))
        }
    }
}

/// Sync configuration, read fresh from a [`ConfigStore`] for every operation.
#[derive(Debug, Clone)]
pub struct SyncConfiguration {
    pub export_method: String,
    pub local_path: Option<PathBuf>,
    pub remote_token: Option<Credential>,
    pub remote_doc_id: Option<String>,
    pub repository_name: Option<String>,
    pub repository_branch: String,
    pub ignored_extensions: Vec<String>,
    pub sync_disabled_extensions: bool,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            export_method: ExportMethod::Local.as_str().to_string(),
            local_path: None,
            remote_token: None,
            remote_doc_id: None,
            repository_name: None,
            repository_branch: "main".to_string(),
            ignored_extensions: Vec::new(),
            sync_disabled_extensions: false,
        }
    }
}

impl SyncConfiguration {
    /// Load every key from the store, applying defaults for missing ones.
    pub async fn load(store: &dyn ConfigStore) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            export_method: store
                .get_string(keys::EXPORT_METHOD)
                .await?
                .unwrap_or(defaults.export_method),
            local_path: store.get_string(keys::LOCAL_PATH).await?.map(expand_home),
            remote_token: store
                .get_string(keys::REMOTE_TOKEN)
                .await?
                .map(Credential::new),
            remote_doc_id: store.get_string(keys::REMOTE_DOC_ID).await?,
            repository_name: store.get_string(keys::REPOSITORY_NAME).await?,
            repository_branch: store
                .get_string(keys::REPOSITORY_BRANCH)
                .await?
                .unwrap_or(defaults.repository_branch),
            ignored_extensions: store.get_string_list(keys::IGNORED_EXTENSIONS).await?,
            sync_disabled_extensions: store
                .get_bool(keys::SYNC_DISABLED_EXTENSIONS)
                .await?
                .unwrap_or(false),
        })
    }

    /// The parsed export method.
    pub fn method(&self) -> Result<ExportMethod> {
        self.export_method.parse()
    }

    /// Check every method-dependent rule, collecting all failures.
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        let method = match self.method() {
            Ok(method) => method,
            Err(e) => {
                errors.push(e.to_string());
                return ValidationResult { errors };
            }
        };

        let has_token = self
            .remote_token
            .as_ref()
            .map(|t| !t.is_empty())
            .unwrap_or(false);

        match method {
            ExportMethod::Local => {
                if self.local_path.is_none() {
                    errors.push("Local export path is not configured".to_string());
                }
            }
            ExportMethod::Gist => {
                if !has_token {
                    errors.push("Remote token is not configured".to_string());
                }
            }
            ExportMethod::Repository => {
                if !has_token {
                    errors.push("Remote token is not configured".to_string());
                }
                match &self.repository_name {
                    None => errors.push("Repository name is not configured".to_string()),
                    Some(name) if !is_valid_repository_name(name) => errors.push(format!(
                        "Repository name '{}' must have the form owner/repo",
                        name
                    )),
                    Some(_) => {}
                }
            }
        }

        ValidationResult { errors }
    }
}

/// `owner/repo`, each side made of alphanumerics, `.`, `_` or `-`.
pub fn is_valid_repository_name(name: &str) -> bool {
    Regex::new(r"^[a-zA-Z0-9._-]+/[a-zA-Z0-9._-]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: impl AsRef<str>) -> PathBuf {
    let path = path.as_ref().trim();
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
