//! Boot asset provisioning: fetch the catalog, then download and verify
//! every item into the cache directory.

use std::time::Duration;

pub mod cache;
pub mod catalog;

/// HTTP client shared by catalog fetches and asset downloads.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("cfdev/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()
}

pub use cache::{AssetCache, ProvisionError, ProvisionReport};
pub use catalog::{Catalog, CatalogClient, CatalogError, CatalogSource, Item};
