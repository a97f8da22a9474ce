//! The asset catalog: which files the VM needs and what they must hash to.
//!
//! ```json
//! {"items": [{"url": "https://…/cfdev-efi.iso", "name": "cfdev-efi.iso", "md5": "…"}]}
//! ```
//!
//! A catalog comes from a URL, a file, or an inline JSON document (usually
//! `CFDEV_CATALOG`). Fetching is attempted once; retries are up to the
//! caller.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One downloadable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub url: String,
    /// File name inside the cache directory.
    pub name: String,
    /// Lowercase hex MD5 digest of the file contents.
    pub md5: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub items: Vec<Item>,
}

impl Catalog {
    pub fn parse(document: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(document)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable from {location}: {source}")]
    Unavailable {
        location: String,
        #[source]
        source: BoxError,
    },
    #[error("malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid catalog source {0:?}")]
    InvalidSource(String),
}

/// Where to read the catalog from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Url(Url),
    File(PathBuf),
    /// The JSON document itself.
    Inline(String),
}

impl FromStr for CatalogSource {
    type Err = CatalogError;

    /// `{…}` is an inline document, `http(s)://` a URL, `file://` or
    /// anything else a path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CatalogError::InvalidSource(s.to_string()));
        }
        if trimmed.starts_with('{') {
            return Ok(Self::Inline(trimmed.to_string()));
        }
        match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Url(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::File)
                .map_err(|()| CatalogError::InvalidSource(s.to_string())),
            _ => Ok(Self::File(PathBuf::from(trimmed))),
        }
    }
}

/// Fetches and parses catalogs.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, source: &CatalogSource) -> Result<Catalog, CatalogError> {
        let document = match source {
            CatalogSource::Inline(document) => document.clone(),
            CatalogSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                CatalogError::Unavailable {
                    location: path.display().to_string(),
                    source: e.into(),
                }
            })?,
            CatalogSource::Url(url) => self.get(url).await.map_err(|e| CatalogError::Unavailable {
                location: url.to_string(),
                source: e.into(),
            })?,
        };

        let catalog = Catalog::parse(&document)?;
        debug!(items = catalog.items.len(), "catalog parsed");
        Ok(catalog)
    }

    async fn get(&self, url: &Url) -> reqwest::Result<String> {
        self.http
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}
