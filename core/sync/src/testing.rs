//! Shared test doubles.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use settingsync_common::{AddOnId, AddOnRecord, Error, Result};
use settingsync_package::PackageSource;

/// Package source that "installs" by writing a `package.json` marker.
#[derive(Default)]
pub(crate) struct FakePackages {
    unavailable: HashSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl FakePackages {
    /// Fetches of these ids fail with a network error.
    pub(crate) fn without(ids: &[&str]) -> Self {
        Self {
            unavailable: ids.iter().map(|s| s.to_ascii_lowercase()).collect(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageSource for FakePackages {
    async fn fetch(&self, id: &AddOnId, version: &str) -> Result<PathBuf> {
        self.fetched.lock().unwrap().push(format!("{}@{}", id, version));
        if self.unavailable.contains(&id.key()) {
            return Err(Error::Network(format!("404 for {}", id)));
        }
        Ok(PathBuf::from(format!("{}.vsix", id)))
    }

    async fn unpack(&self, artifact: &Path, install_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(install_dir)?;
        std::fs::write(
            install_dir.join("package.json"),
            artifact.to_string_lossy().as_bytes(),
        )?;
        Ok(install_dir.to_path_buf())
    }
}

pub(crate) fn record(id: &str, version: &str, enabled: bool) -> AddOnRecord {
    let mut r = AddOnRecord::new(AddOnId::new(id).unwrap(), version);
    r.enabled = enabled;
    r
}
