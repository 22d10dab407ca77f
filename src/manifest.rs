//! Release manifest
//!
//! The manifest is a JSON array describing, in flashing order, every image
//! of a release. It is fetched once per session and never modified.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Error, Result};
use crate::utils::format_size;
use crate::{log_debug, log_error, log_info};

const MODULE: &str = "manifest";

/// One flashable image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Partition name, without slot suffix
    pub name: String,
    /// Download location of the (usually compressed) image
    #[serde(default)]
    pub url: String,
    /// Size of the unpacked image in bytes
    pub size: u64,
    /// Sparse images are erased before they are flashed
    #[serde(default)]
    pub sparse: bool,
    /// SHA-256 of the unpacked image, lowercase hex
    #[serde(alias = "hash_raw")]
    pub checksum: String,
    /// Size of the download, when known ahead of time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
}

impl Image {
    /// Cache file stem, unique per image content
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.name, self.checksum)
    }
}

/// Ordered, non-empty list of images
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    images: Vec<Image>,
}

impl Manifest {
    /// Wrap an image list, rejecting an empty one
    pub fn new(images: Vec<Image>) -> Result<Self> {
        if images.is_empty() {
            return Err(Error::EmptyManifest);
        }
        Ok(Self { images })
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Unpacked sizes in manifest order, used as progress weights
    pub fn weights(&self) -> Vec<f64> {
        self.images.iter().map(|image| image.size as f64).collect()
    }

    pub fn total_size(&self) -> u64 {
        self.images.iter().map(|image| image.size).sum()
    }
}

/// Parse manifest text into the ordered image list
pub fn parse(text: &str) -> Result<Manifest> {
    let images: Vec<Image> = serde_json::from_str(text)?;
    let manifest = Manifest::new(images)?;

    log_info!(
        MODULE,
        "Manifest has {} images ({})",
        manifest.len(),
        format_size(manifest.total_size())
    );
    for image in manifest.images() {
        log_debug!(
            MODULE,
            "  - {} ({}, sparse: {})",
            image.name,
            format_size(image.size),
            image.sparse
        );
    }

    Ok(manifest)
}

/// Where the manifest text comes from
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Fetches the manifest over HTTP
pub struct HttpManifestSource {
    client: Client,
    url: String,
}

impl HttpManifestSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::app::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self) -> Result<String> {
        log_info!(MODULE, "Fetching manifest from {}", self.url);

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            log_error!(MODULE, "Failed to fetch manifest: {}", e);
            e
        })?;

        if !response.status().is_success() {
            log_error!(
                MODULE,
                "Manifest request failed with status: {}",
                response.status()
            );
            return Err(Error::ManifestStatus(response.status()));
        }

        Ok(response.text().await?)
    }
}
