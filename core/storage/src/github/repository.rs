//! Repository sync backend.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info};

use settingsync_common::{Category, Error, Result, Snapshot};
use settingsync_host::is_valid_repository_name;

use super::client::{GitHubClient, RepoContent};
use crate::provider::SyncBackend;

/// Commits one file per category to a branch of a GitHub repository.
///
/// Writes are conditional on the blob sha read just before, so a file
/// changed in between is rejected by the API instead of overwritten.
pub struct RepositoryBackend {
    client: GitHubClient,
    repo: String,
    branch: String,
}

impl RepositoryBackend {
    /// # Errors
    /// - `repo` is not of the form `owner/name`
    pub fn new(client: GitHubClient, repo: String, branch: String) -> Result<Self> {
        if !is_valid_repository_name(&repo) {
            return Err(Error::Configuration(format!(
                "Repository name '{}' must look like owner/repo",
                repo
            )));
        }
        let branch = if branch.trim().is_empty() {
            "main".to_string()
        } else {
            branch
        };
        Ok(Self {
            client,
            repo,
            branch,
        })
    }

    fn locator(&self, file_name: &str) -> String {
        format!(
            "https://github.com/{}/blob/{}/{}",
            self.repo, self.branch, file_name
        )
    }

    async fn read_text(&self, file: &RepoContent) -> Result<String> {
        let inline = file
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty() && file.encoding.as_deref() != Some("none"));

        if let Some(encoded) = inline {
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = BASE64.decode(compact).map_err(|e| {
                Error::Serialization(format!("Invalid base64 file content: {}", e))
            })?;
            return String::from_utf8(bytes)
                .map_err(|e| Error::Serialization(format!("File is not UTF-8: {}", e)));
        }

        match &file.download_url {
            Some(url) => self.client.get_raw(url).await,
            None => Err(Error::Network(
                "File content is not inline and has no download URL".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SyncBackend for RepositoryBackend {
    fn name(&self) -> &str {
        "repository"
    }

    async fn export(&self, snapshot: &Snapshot) -> Result<String> {
        let category = snapshot.category();
        let file_name = category.remote_file_name();
        let encoded = BASE64.encode(snapshot.to_document()?);

        let existing = self
            .client
            .get_contents(&self.repo, &file_name, &self.branch)
            .await?;
        let sha = existing.as_ref().map(|f| f.sha.as_str());

        let message = format!("auto sync config: {}", category);
        let new_sha = self
            .client
            .put_contents(&self.repo, &file_name, &self.branch, &message, &encoded, sha)
            .await?;

        info!(
            "Committed {} to {}@{} ({})",
            file_name, self.repo, self.branch, new_sha
        );
        Ok(self.locator(&file_name))
    }

    async fn import(&self, category: Category) -> Result<Snapshot> {
        let file_name = category.remote_file_name();
        let file = self
            .client
            .get_contents(&self.repo, &file_name, &self.branch)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{} not found on {}@{}",
                    file_name, self.repo, self.branch
                ))
            })?;

        let text = self.read_text(&file).await?;
        debug!("Read {} from {}@{}", file_name, self.repo, self.branch);
        Snapshot::from_document(category, &text)
    }

    async fn check(&self) -> Result<()> {
        let user = self.client.current_user().await?;
        debug!("Authenticated to GitHub as {}", user.login);
        Ok(())
    }
}
