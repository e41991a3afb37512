//! GitHub REST API client shared by the gist and repository backends.

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use settingsync_common::{Credential, Error, Result};

/// GitHub API base URL.
const GITHUB_API_BASE: &str = "https://api.github.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated user returned by `GET /user`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// One file inside a gist.
#[derive(Debug, Clone, Deserialize)]
pub struct GistFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Set when `content` was cut short by the API.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub raw_url: Option<String>,
}

/// Gist resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Gist {
    pub id: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, GistFile>,
}

/// File content payload used when creating or updating a gist.
#[derive(Debug, Clone, Serialize)]
pub struct GistFileContent {
    pub content: String,
}

#[derive(Debug, Serialize)]
struct CreateGistRequest<'a> {
    description: &'a str,
    public: bool,
    files: &'a BTreeMap<String, GistFileContent>,
}

#[derive(Debug, Serialize)]
struct UpdateGistRequest<'a> {
    files: &'a BTreeMap<String, GistFileContent>,
}

/// Repository file returned by the contents API.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoContent {
    pub sha: String,
    /// Base64 with embedded newlines. Empty for files over the inline limit.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: &'a str,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentResponse {
    content: PutContentFile,
}

#[derive(Debug, Deserialize)]
struct PutContentFile {
    sha: String,
}

/// GitHub API client.
pub struct GitHubClient {
    http: Client,
    base_url: String,
    token: Credential,
}

impl GitHubClient {
    /// Create a new client authenticating with `token`.
    ///
    /// # Errors
    /// - HTTP client could not be built
    pub fn new(token: Credential) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let http = Client::builder()
            .user_agent(concat!("settingsync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: GITHUB_API_BASE.to_string(),
            token,
        })
    }

    /// Point the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.token.expose())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Get the authenticated user.
    pub async fn current_user(&self) -> Result<GitHubUser> {
        let response = self
            .http
            .get(self.url("/user"))
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get user: {}", e)))?;

        self.handle_response(response).await
    }

    /// Get a gist by ID.
    pub async fn get_gist(&self, id: &str) -> Result<Gist> {
        let response = self
            .http
            .get(self.url(&format!("/gists/{}", id)))
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get gist: {}", e)))?;

        self.handle_response(response).await
    }

    /// Create a private gist.
    pub async fn create_gist(
        &self,
        description: &str,
        files: &BTreeMap<String, GistFileContent>,
    ) -> Result<Gist> {
        let body = CreateGistRequest {
            description,
            public: false,
            files,
        };

        let response = self
            .http
            .post(self.url("/gists"))
            .header(header::AUTHORIZATION, self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create gist: {}", e)))?;

        self.handle_response(response).await
    }

    /// Replace the given files in an existing gist.
    pub async fn update_gist(
        &self,
        id: &str,
        files: &BTreeMap<String, GistFileContent>,
    ) -> Result<Gist> {
        let response = self
            .http
            .patch(self.url(&format!("/gists/{}", id)))
            .header(header::AUTHORIZATION, self.auth_header())
            .json(&UpdateGistRequest { files })
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to update gist: {}", e)))?;

        self.handle_response(response).await
    }

    /// Download raw text from an absolute URL returned by the API.
    pub async fn get_raw(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to download {}: {}", url, e)))?;

        let response = Self::check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))
    }

    /// Get a file from a repository branch, or `None` if it does not exist.
    pub async fn get_contents(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<RepoContent>> {
        let response = self
            .http
            .get(self.url(&format!("/repos/{}/contents/{}", repo, path)))
            .header(header::AUTHORIZATION, self.auth_header())
            .query(&[("ref", branch)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get contents: {}", e)))?;

        match self.handle_response(response).await {
            Ok(content) => Ok(Some(content)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or update a file on a branch. Returns the new blob sha.
    ///
    /// `sha` must be the current blob sha when the file already exists.
    pub async fn put_contents(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        message: &str,
        content_base64: &str,
        sha: Option<&str>,
    ) -> Result<String> {
        let body = PutContentRequest {
            message,
            content: content_base64,
            branch,
            sha,
        };

        let response = self
            .http
            .put(self.url(&format!("/repos/{}/contents/{}", repo, path)))
            .header(header::AUTHORIZATION, self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to write contents: {}", e)))?;

        let written: PutContentResponse = self.handle_response(response).await?;
        Ok(written.content.sha)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound("Resource not found".to_string()))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(Error::Authentication(
                "Invalid or expired token".to_string(),
            ))
        } else if status == StatusCode::FORBIDDEN {
            Err(Error::PermissionDenied("Access denied".to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("API error: {} - {}", status, body)))
        }
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
    }
}
