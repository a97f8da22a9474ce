//! Downloads catalog items into the cache directory and verifies them.
//!
//! ## Trust
//!
//! `cache/<name>` only ever holds bytes whose MD5 matched the catalog.
//! Each download streams into its own staging file
//! `cache/.<name>.<random>.part` while being hashed, and the staging file
//! is renamed over `cache/<name>` only after the digest matches. Staging
//! files are unique per download, so catalog items sharing a name never
//! trample each other; the last verified one wins. On a mismatch the
//! staging file and any previous `cache/<name>` are deleted.
//!
//! ## Fail fast
//!
//! Items download concurrently, but the first error of any kind ends the
//! run: the remaining downloads are dropped mid-flight, which deletes
//! their staging files, and the error is returned. A boot asset that failed
//! verification is a hard stop; teardown's collect-everything policy does
//! not apply here.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use futures_util::StreamExt;
use futures_util::stream;
use md5::{Digest, Md5};
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::catalog::{Catalog, Item};
use crate::cancel::CancelFlag;
use crate::config::Config;

const PART_SUFFIX: &str = ".part";

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid asset name {0:?}: must be a single file name")]
    InvalidName(String),
    #[error("failed to download {name} from {url}: {source}")]
    Download {
        name: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("md5 mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("provisioning cancelled")]
    Cancelled,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProvisionError + '_ {
    move |source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What happened to each item of a successful run, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub downloaded: Vec<String>,
    /// Already present with the right digest; not fetched again.
    pub cached: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetched {
    Downloaded,
    Cached,
}

/// The verified asset cache.
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
    http: reqwest::Client,
    concurrency: usize,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>, http: reqwest::Client, concurrency: usize) -> Self {
        Self {
            dir: dir.into(),
            http,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        Self::new(&config.paths.cache, http, config.download_concurrency)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `cache/<name>`, refusing names that would escape the directory.
    pub fn entry_path(&self, item: &Item) -> Result<PathBuf, ProvisionError> {
        let mut components = Path::new(&item.name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single || item.name.contains(['/', '\\']) {
            return Err(ProvisionError::InvalidName(item.name.clone()));
        }
        Ok(self.dir.join(&item.name))
    }

    /// Make every catalog item present and verified in the cache.
    pub async fn provision(
        &self,
        catalog: &Catalog,
        cancel: &CancelFlag,
    ) -> Result<ProvisionReport, ProvisionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;
        for item in &catalog.items {
            self.entry_path(item)?;
        }

        let mut report = ProvisionReport::default();
        let outcome = {
            let mut pending = stream::iter(&catalog.items)
                .map(|item| async move {
                    if cancel.is_cancelled() {
                        return Err(ProvisionError::Cancelled);
                    }
                    self.fetch_item(item).await.map(|fetched| (item, fetched))
                })
                .buffer_unordered(self.concurrency);

            let mut outcome = Ok(());
            while let Some(result) = pending.next().await {
                match result {
                    Ok((item, Fetched::Downloaded)) => report.downloaded.push(item.name.clone()),
                    Ok((item, Fetched::Cached)) => report.cached.push(item.name.clone()),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            // Dropping `pending` abandons every download still in flight and
            // deletes their staging files.
            outcome
        };

        if let Err(e) = outcome {
            error!(error = %e, "provisioning aborted");
            return Err(e);
        }

        info!(
            downloaded = report.downloaded.len(),
            cached = report.cached.len(),
            "provisioning finished"
        );
        Ok(report)
    }

    async fn fetch_item(&self, item: &Item) -> Result<Fetched, ProvisionError> {
        let dest = self.entry_path(item)?;

        if let Some(existing) = file_md5(&dest).await.map_err(io_error(&dest))? {
            if existing == item.md5 {
                debug!(name = %item.name, "asset already cached");
                return Ok(Fetched::Cached);
            }
            debug!(name = %item.name, "cached asset is stale, downloading again");
        }

        let (file, staged) = self.stage(item)?;
        let actual = self.download(item, file, &staged).await?;

        if actual != item.md5 {
            // `staged` is deleted on drop.
            remove_if_present(&dest).await;
            return Err(ProvisionError::ChecksumMismatch {
                name: item.name.clone(),
                expected: item.md5.clone(),
                actual,
            });
        }

        staged
            .persist(&dest)
            .map_err(|e| io_error(&dest)(e.error))?;
        info!(name = %item.name, md5 = %actual, "asset verified");
        Ok(Fetched::Downloaded)
    }

    /// Create a fresh staging file for `item` inside the cache directory.
    ///
    /// The returned path deletes the file when dropped unless it has been
    /// persisted.
    fn stage(&self, item: &Item) -> Result<(tokio::fs::File, TempPath), ProvisionError> {
        let prefix = format!(".{}.", item.name);
        let staged = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(PART_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(io_error(&self.dir))?;
        let (file, path) = staged.into_parts();
        Ok((tokio::fs::File::from_std(file), path))
    }

    /// Stream `item` into `file`, returning the hex MD5 of what was written.
    async fn download(
        &self,
        item: &Item,
        mut file: tokio::fs::File,
        part: &Path,
    ) -> Result<String, ProvisionError> {
        let download_error = |source| ProvisionError::Download {
            name: item.name.clone(),
            url: item.url.clone(),
            source,
        };

        info!(name = %item.name, url = %item.url, "downloading asset");
        let response = self
            .http
            .get(&item.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(download_error)?;

        let mut hasher = Md5::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(download_error)?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(io_error(part))?;
        }
        file.flush().await.map_err(io_error(part))?;
        file.sync_all().await.map_err(io_error(part))?;

        Ok(hex::encode(hasher.finalize()))
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

/// Hex MD5 of the file at `path`, or `None` if it does not exist.
pub async fn file_md5(path: &Path) -> std::io::Result<Option<String>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hex::encode(hasher.finalize())))
}
