//! Artifact download, checksum verification and extraction.

use super::ArtifactDescriptor;
use crate::constants::ARTIFACT_DOWNLOAD_TIMEOUT_SECS;
use crate::observability::metrics;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Component, Path};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to download artifact from {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("artifact download from {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("partial download detected: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("downloaded artifact is empty")]
    Empty,

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported digest {0}")]
    UnsupportedDigest(String),

    #[error("invalid file format: expected tar.gz, got magic bytes {0}")]
    NotGzip(String),

    #[error("archive entry {0} escapes the extraction root")]
    UnsafePath(String),

    #[error("failed to extract artifact: {0}")]
    Extract(#[from] std::io::Error),
}

/// A verified artifact: the raw tarball plus its extracted tree
#[derive(Debug)]
pub struct FetchedArtifact {
    pub revision: String,
    pub tarball: Vec<u8>,
    pub dir: TempDir,
}

/// Downloads the artifact a descriptor points at
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, artifact: &ArtifactDescriptor) -> Result<FetchedArtifact, ArtifactError>;
}

/// Checks `bytes` against an `algorithm:hex` digest
pub fn verify_digest(bytes: &[u8], digest: &str) -> Result<(), ArtifactError> {
    let Some(expected_hex) = digest.strip_prefix("sha256:") else {
        return Err(ArtifactError::UnsupportedDigest(digest.to_string()));
    };
    let actual_hex = format!("{:x}", Sha256::digest(bytes));
    if !actual_hex.eq_ignore_ascii_case(expected_hex) {
        return Err(ArtifactError::ChecksumMismatch {
            expected: digest.to_string(),
            actual: format!("sha256:{}", actual_hex),
        });
    }
    Ok(())
}

/// Unpacks a tar.gz into `dest`, refusing entries that would land outside it
pub fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<(), ArtifactError> {
    if bytes.len() < 2 || bytes[..2] != GZIP_MAGIC {
        let magic: String = bytes.iter().take(2).map(|b| format!("{:02x}", b)).collect();
        return Err(ArtifactError::NotGzip(magic));
    }

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ArtifactError::UnsafePath(path.display().to_string()));
        }
        if !entry.unpack_in(dest)? {
            return Err(ArtifactError::UnsafePath(path.display().to_string()));
        }
    }
    Ok(())
}

/// Verifies size and digest, then extracts into a fresh temporary directory.
/// Nothing touches the filesystem unless verification passes.
pub fn verify_and_extract(
    bytes: Vec<u8>,
    artifact: &ArtifactDescriptor,
) -> Result<FetchedArtifact, ArtifactError> {
    if bytes.is_empty() {
        return Err(ArtifactError::Empty);
    }
    let actual = bytes.len() as u64;
    if let Some(expected) = artifact.size {
        if expected != actual {
            return Err(ArtifactError::SizeMismatch { expected, actual });
        }
    }
    match artifact.digest.as_deref() {
        Some(digest) => {
            if let Err(e) = verify_digest(&bytes, digest) {
                if matches!(e, ArtifactError::ChecksumMismatch { .. }) {
                    metrics::increment_artifact_checksum_failures();
                }
                return Err(e);
            }
            debug!("Checksum verified: {}", digest);
        }
        None => debug!("Artifact {} has no digest, skipping checksum", artifact.url),
    }

    let dir = tempfile::Builder::new().prefix("tf-source-").tempdir()?;
    extract_tarball(&bytes, dir.path())?;

    Ok(FetchedArtifact {
        revision: artifact.revision.clone(),
        tarball: bytes,
        dir,
    })
}

/// Rewrites the URL host (and port) to `host_override`, e.g. `localhost:9090`
fn override_host(url: &str, host_override: &str) -> Result<String, ArtifactError> {
    let download_err = |reason: String| ArtifactError::Download {
        url: url.to_string(),
        reason,
    };
    let mut parsed = reqwest::Url::parse(url).map_err(|e| download_err(e.to_string()))?;
    let (host, port) = match host_override.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| download_err(format!("invalid override port in {}", host_override)))?;
            (host, Some(port))
        }
        None => (host_override, None),
    };
    parsed
        .set_host(Some(host))
        .map_err(|e| download_err(e.to_string()))?;
    parsed
        .set_port(port)
        .map_err(|()| download_err(format!("cannot set port on {}", url)))?;
    Ok(parsed.to_string())
}

/// Fetches artifacts from the source controller over HTTP
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    host_override: Option<String>,
}

impl HttpArtifactFetcher {
    pub fn new(host_override: Option<String>) -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ARTIFACT_DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| ArtifactError::Download {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            host_override,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        let download_err = |e: reqwest::Error| ArtifactError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(|e| {
            error!("Failed to download artifact from {}: {}", url, e);
            download_err(e)
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            error!("Artifact download returned HTTP {} from {}", status, url);
            return Err(ArtifactError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let expected_size = response.content_length();
        let mut bytes = Vec::with_capacity(
            expected_size
                .and_then(|s| usize::try_from(s).ok())
                .unwrap_or_default(),
        );
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.map_err(download_err)?);
        }

        if let Some(expected) = expected_size {
            let actual = bytes.len() as u64;
            if expected != actual {
                return Err(ArtifactError::SizeMismatch { expected, actual });
            }
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, artifact: &ArtifactDescriptor) -> Result<FetchedArtifact, ArtifactError> {
        let url = match self.host_override.as_deref() {
            Some(host) => override_host(&artifact.url, host)?,
            None => artifact.url.clone(),
        };

        let span = info_span!(
            "artifact.download",
            artifact.url = url.as_str(),
            artifact.revision = artifact.revision.as_str()
        );
        async move {
            let start = Instant::now();
            metrics::increment_artifact_downloads();
            info!("Downloading artifact from {} (revision: {})", url, artifact.revision);

            let bytes = self.download(&url).await?;
            let size = bytes.len();
            let fetched = verify_and_extract(bytes, artifact)?;

            info!(
                "Extracted artifact to {} ({} bytes in {:?})",
                fetched.dir.path().display(),
                size,
                start.elapsed()
            );
            Ok(fetched)
        }
        .instrument(span)
        .await
    }
}
