//! Model artifact fetcher.
//!
//! Runs once at startup and copies the serialized model from object storage
//! to local ephemeral disk. Any failure here aborts startup.

use crate::config::{ArtifactConfig, ArtifactSourceKind};
use crate::gcp::GcpContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// A place the model artifact can be downloaded from
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Human-readable location, used in logs and errors
    fn location(&self) -> String;

    /// Write the artifact to `dest`, returning the number of bytes written
    async fn download(&self, dest: &Path) -> Result<u64>;
}

/// Object in a Google Cloud Storage bucket
pub struct GcsArtifact {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    object: String,
    gcp: Arc<GcpContext>,
}

impl GcsArtifact {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        bucket: &str,
        object: &str,
        gcp: Arc<GcpContext>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
            gcp,
        }
    }

    /// JSON API media URL for the object
    pub fn media_url(&self) -> Result<Url> {
        object_media_url(&self.endpoint, &self.bucket, &self.object)
    }
}

fn object_media_url(endpoint: &str, bucket: &str, object: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).context("Invalid storage endpoint")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Storage endpoint {} cannot take a path", endpoint))?
        .pop_if_empty()
        .extend(["storage", "v1", "b", bucket, "o", object]);
    url.query_pairs_mut().append_pair("alt", "media");
    Ok(url)
}

#[async_trait]
impl ArtifactSource for GcsArtifact {
    fn location(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object)
    }

    async fn download(&self, dest: &Path) -> Result<u64> {
        let token = self.gcp.tokens.token().await?;
        let mut response = self
            .client
            .get(self.media_url()?)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", self.location()))?;

        if response.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("Artifact {} does not exist", self.location());
        }
        if !response.status().is_success() {
            anyhow::bail!(
                "Downloading {} failed with status {}",
                self.location(),
                response.status()
            );
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Download of {} interrupted", self.location()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// File in a local directory
pub struct LocalArtifact {
    path: PathBuf,
}

impl LocalArtifact {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ArtifactSource for LocalArtifact {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn download(&self, dest: &Path) -> Result<u64> {
        tokio::fs::copy(&self.path, dest)
            .await
            .with_context(|| format!("Failed to copy artifact {}", self.location()))
    }
}

/// Download an artifact into `dest`, creating parent directories
pub async fn fetch(source: &dyn ArtifactSource, dest: &Path) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    info!(source = %source.location(), dest = %dest.display(), "Downloading model artifact");
    let bytes = source.download(dest).await?;

    if bytes == 0 {
        anyhow::bail!("Artifact {} is empty", source.location());
    }

    info!(source = %source.location(), bytes = bytes, "Model artifact downloaded");
    Ok(dest.to_path_buf())
}

/// Build the configured artifact source.
///
/// `gcp` must be present for the `gcs` source.
pub fn source_from_config(
    config: &ArtifactConfig,
    client: reqwest::Client,
    gcp: Option<Arc<GcpContext>>,
) -> Result<Box<dyn ArtifactSource>> {
    match config.source {
        ArtifactSourceKind::Gcs => {
            let gcp = gcp.context("GCS artifact source requires Google Cloud credentials")?;
            Ok(Box::new(GcsArtifact::new(
                client,
                &config.storage_endpoint,
                &config.bucket,
                &config.object,
                gcp,
            )))
        }
        ArtifactSourceKind::Local => Ok(Box::new(LocalArtifact::new(
            Path::new(&config.bucket).join(&config.object),
        ))),
    }
}
