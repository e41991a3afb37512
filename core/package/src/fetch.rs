//! Marketplace package fetcher.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, redirect, Client};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use settingsync_common::{validate_version, AddOnId, Error, Result};

use crate::source::PackageSource;
use crate::unpack::unpack_artifact;

/// Download locations tried in order.
///
/// `{publisher}`, `{name}` and `{version}` are substituted per add-on.
pub const DEFAULT_CANDIDATES: [&str; 2] = [
    "https://marketplace.visualstudio.com/_apis/public/gallery/publishers/{publisher}/vsextensions/{name}/{version}/vspackage",
    "https://{publisher}.gallery.vsassets.io/_apis/public/gallery/publisher/{publisher}/extension/{name}/{version}/assetbyname/Microsoft.VisualStudio.Services.VSIXPackage",
];

/// HTTP limits for one download attempt.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_redirects: usize,
    /// Overall limit for one candidate, body included.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Body encoding announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Identity,
    Gzip,
    Deflate,
}

impl Encoding {
    fn from_header(value: Option<&str>) -> Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Ok(Encoding::Identity),
            Some("gzip") | Some("x-gzip") => Ok(Encoding::Gzip),
            Some("deflate") => Ok(Encoding::Deflate),
            Some(other) => Err(Error::Network(format!(
                "Unsupported content encoding '{}'",
                other
            ))),
        }
    }
}

/// Downloads add-on packages from the marketplace.
pub struct MarketplaceFetcher {
    http: Client,
    candidates: Vec<String>,
    download_dir: PathBuf,
}

impl MarketplaceFetcher {
    /// Create a fetcher with the default limits and candidates.
    pub fn new() -> Result<Self> {
        Self::with_options(FetchOptions::default())
    }

    pub fn with_options(options: FetchOptions) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(
            header::ACCEPT_ENCODING,
            header::HeaderValue::from_static("gzip, deflate"),
        );

        // Bodies are decoded here, after the length check, so the client
        // must hand over the bytes exactly as sent.
        let http = Client::builder()
            .user_agent(concat!("settingsync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .redirect(redirect::Policy::limited(options.max_redirects))
            .timeout(options.timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            candidates: DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
            download_dir: std::env::temp_dir().join("settingsync-downloads"),
        })
    }

    /// Replace the candidate URL templates.
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Expand the candidate templates for one add-on version.
    pub fn candidate_urls(&self, id: &AddOnId, version: &str) -> Result<Vec<String>> {
        let (publisher, name) = id.parts().ok_or_else(|| {
            Error::InvalidInput(format!("'{}' is not a publisher.name identifier", id))
        })?;
        validate_version(version)?;

        Ok(self
            .candidates
            .iter()
            .map(|template| {
                template
                    .replace("{publisher}", publisher)
                    .replace("{name}", name)
                    .replace("{version}", version)
            })
            .collect())
    }

    /// Download one candidate into `dest`. Returns the final size.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("Server returned {}", status)));
        }

        let encoding = Encoding::from_header(
            response
                .headers()
                .get(header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        )?;
        let expected = response.content_length();

        let part = dest.with_extension("part");
        let received = Self::write_body(response, &part).await;
        let received = match received {
            Ok(n) => n,
            Err(e) => {
                remove_if_exists(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = check_length(expected, received) {
            remove_if_exists(&part).await;
            return Err(e);
        }

        let size = match decode_into(encoding, &part, dest).await {
            Ok(size) => size,
            Err(e) => {
                remove_if_exists(&part).await;
                return Err(e);
            }
        };
        remove_if_exists(&part).await;

        if size == 0 {
            return Err(Error::Network("Downloaded package is empty".to_string()));
        }
        Ok(size)
    }

    async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64> {
        let mut file = fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Network(format!("Download interrupted: {}", e)))?;
            received += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(received)
    }
}

/// Compare the bytes received against the declared content length.
fn check_length(expected: Option<u64>, received: u64) -> Result<()> {
    match expected {
        Some(expected) if expected > 0 && expected != received => Err(Error::Network(format!(
            "Incomplete download: expected {} bytes, got {}",
            expected, received
        ))),
        _ => Ok(()),
    }
}

/// Decode `src` into `dest`. Returns the decoded size.
async fn decode_into(encoding: Encoding, src: &Path, dest: &Path) -> Result<u64> {
    if encoding == Encoding::Identity {
        fs::rename(src, dest).await?;
        return Ok(fs::metadata(dest).await?.len());
    }

    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<u64> {
        let input = std::fs::File::open(&src)?;
        let mut output = std::fs::File::create(&dest)?;
        let copied = match encoding {
            Encoding::Gzip => io::copy(&mut flate2::read::GzDecoder::new(input), &mut output),
            Encoding::Deflate => io::copy(&mut flate2::read::ZlibDecoder::new(input), &mut output),
            Encoding::Identity => io::copy(&mut io::BufReader::new(input), &mut output),
        };
        copied.map_err(|e| {
            let _ = std::fs::remove_file(&dest);
            Error::Network(format!("Failed to decompress download: {}", e))
        })
    })
    .await
    .map_err(|e| Error::Network(format!("Decompression task failed: {}", e)))?
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl PackageSource for MarketplaceFetcher {
    async fn fetch(&self, id: &AddOnId, version: &str) -> Result<PathBuf> {
        let urls = self.candidate_urls(id, version)?;
        fs::create_dir_all(&self.download_dir).await.map_err(|e| {
            Error::FileSystem(format!(
                "Cannot create {}: {}",
                self.download_dir.display(),
                e
            ))
        })?;

        let dest = self
            .download_dir
            .join(format!("{}-{}.vsix", id.as_str(), version));
        info!("Downloading {} v{}", id, version);

        let mut last_error = None;
        for url in &urls {
            debug!("Trying {}", url);
            match self.download(url, &dest).await {
                Ok(size) => {
                    info!("Downloaded {} v{} ({} bytes)", id, version, size);
                    return Ok(dest);
                }
                Err(e) => {
                    warn!("Download from {} failed: {}", url, e);
                    remove_if_exists(&dest).await;
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Network(format!(
            "All {} candidate URLs failed for {} v{}; last error: {}",
            urls.len(),
            id,
            version,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidates configured".to_string())
        )))
    }

    async fn unpack(&self, artifact: &Path, install_dir: &Path) -> Result<PathBuf> {
        let label = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "package".to_string());
        unpack_artifact(artifact, install_dir, &label).await
    }
}
