//! Package archive extraction.

use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use settingsync_common::{Error, Result};

/// Archive directory that holds the installable payload.
const PAYLOAD_DIR: &str = "extension";

/// Removes the downloaded artifact when dropped.
struct ArtifactGuard<'a>(&'a Path);

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(self.0) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove artifact {}: {}", self.0.display(), e);
            }
        }
    }
}

/// Extract `artifact` and replace `install_dir` with its payload.
///
/// `label` names the staging directory, usually the add-on id.
/// The artifact and the staging directory are removed on every exit path.
pub async fn unpack_artifact(artifact: &Path, install_dir: &Path, label: &str) -> Result<PathBuf> {
    let artifact = artifact.to_path_buf();
    let install_dir = install_dir.to_path_buf();
    let label = label.to_string();

    tokio::task::spawn_blocking(move || unpack_blocking(&artifact, &install_dir, &label))
        .await
        .map_err(|e| Error::Extension(format!("Unpack task failed: {}", e)))?
}

fn unpack_blocking(artifact: &Path, install_dir: &Path, label: &str) -> Result<PathBuf> {
    let _guard = ArtifactGuard(artifact);

    let staging = tempfile::Builder::new()
        .prefix(&format!(
            "settingsync-extract-{}-{}-",
            label,
            Utc::now().timestamp_millis()
        ))
        .tempdir()?;

    extract_zip(artifact, staging.path())?;

    let payload = staging.path().join(PAYLOAD_DIR);
    if !payload.is_dir() {
        return Err(Error::Extension(format!(
            "Package {} has no {}/ directory",
            artifact.display(),
            PAYLOAD_DIR
        )));
    }

    if install_dir.exists() {
        fs::remove_dir_all(install_dir)?;
    }
    if let Err(e) = copy_dir_recursive(&payload, install_dir) {
        let _ = fs::remove_dir_all(install_dir);
        return Err(Error::Extension(format!(
            "Failed to install into {}: {}",
            install_dir.display(),
            e
        )));
    }

    debug!("Installed {} into {}", label, install_dir.display());
    Ok(install_dir.to_path_buf())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::Extension(format!("Failed to open archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::Extension(format!("Failed to read archive entry: {}", e)))?;

        // Entries escaping the archive root are dropped.
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

/// Recursively copy a directory.
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}
