//! Package source trait definition.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use settingsync_common::{validate_version, AddOnId, Result};

/// Where packaged add-ons come from.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Download the package for `id` at `version`.
    ///
    /// # Postconditions
    /// - Returns the path of a complete, non-empty artifact on local disk
    ///
    /// # Errors
    /// - `id` is not of the form `publisher.name`
    /// - Every candidate location failed
    async fn fetch(&self, id: &AddOnId, version: &str) -> Result<PathBuf>;

    /// Install a downloaded artifact into `install_dir`.
    ///
    /// # Postconditions
    /// - `install_dir` holds exactly the package payload
    /// - The artifact and any staging files are removed, on success or failure
    async fn unpack(&self, artifact: &Path, install_dir: &Path) -> Result<PathBuf>;
}

/// Directory name an add-on version is installed under.
///
/// # Errors
/// - `version` is not a plain dotted version
pub fn install_dir_name(id: &AddOnId, version: &str) -> Result<String> {
    validate_version(version)?;
    Ok(format!("{}-{}", id.key(), version))
}
