//! End-to-end tests for catalog fetching and asset provisioning against a
//! local HTTP server.

use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use cfdev::assets::{
    AssetCache, Catalog, CatalogClient, CatalogError, CatalogSource, Item, ProvisionError,
};
use cfdev::cancel::CancelFlag;
use md5::{Digest, Md5};

const SOME_CONTENT_MD5: &str = "ad60407c083b4ecc372614b8fcd9f305";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serve each `(path, body)` pair on an ephemeral port; returns the base URL.
async fn serve(routes: Vec<(&'static str, &'static str)>) -> String {
    let mut router = Router::new();
    for (path, body) in routes {
        router = router.route(path, get(move || async move { body }));
    }
    serve_router(router).await
}

async fn serve_router(router: Router) -> String {
    let router = router.route("/missing", get(|| async { StatusCode::NOT_FOUND }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn item(base: &str, path: &str, name: &str, md5: &str) -> Item {
    Item {
        url: format!("{base}{path}"),
        name: name.to_string(),
        md5: md5.to_string(),
    }
}

fn cache_in(dir: &Path, concurrency: usize) -> AssetCache {
    AssetCache::new(dir, reqwest::Client::new(), concurrency)
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn downloads_verified_asset() {
    let base = serve(vec![("/some-asset", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("cache");
    let catalog = Catalog {
        items: vec![item(&base, "/some-asset", "some-asset", SOME_CONTENT_MD5)],
    };

    let report = cache_in(&cache_dir, 4)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded, vec!["some-asset".to_string()]);
    assert_eq!(listing(&cache_dir), vec!["some-asset".to_string()]);
    assert_eq!(
        std::fs::read_to_string(cache_dir.join("some-asset")).unwrap(),
        "some-content"
    );
}

#[tokio::test]
async fn checksum_mismatch_fails_and_leaves_nothing_trusted() {
    let base = serve(vec![("/some-asset", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        items: vec![item(&base, "/some-asset", "some-asset", "incorrect-md5")],
    };

    let err = cache_in(tmp.path(), 4)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap_err();

    match err {
        ProvisionError::ChecksumMismatch {
            name,
            expected,
            actual,
        } => {
            assert_eq!(name, "some-asset");
            assert_eq!(expected, "incorrect-md5");
            assert_eq!(actual, SOME_CONTENT_MD5);
        }
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
    assert!(listing(tmp.path()).is_empty());
}

#[tokio::test]
async fn digest_comparison_is_exact() {
    let base = serve(vec![("/some-asset", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    let upper = SOME_CONTENT_MD5.to_uppercase();
    let catalog = Catalog {
        items: vec![item(&base, "/some-asset", "some-asset", &upper)],
    };

    let err = cache_in(tmp.path(), 1)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::ChecksumMismatch { .. }), "got {err:?}");
}

#[tokio::test]
async fn mismatch_aborts_remaining_items() {
    let base = serve(vec![("/bad", "tampered"), ("/good", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        items: vec![
            item(&base, "/bad", "bad-asset", SOME_CONTENT_MD5),
            item(&base, "/good", "good-asset", SOME_CONTENT_MD5),
        ],
    };

    let err = cache_in(tmp.path(), 1)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::ChecksumMismatch { ref name, .. } if name == "bad-asset"));
    assert!(listing(tmp.path()).is_empty());
}

#[tokio::test]
async fn stale_cache_entry_is_replaced() {
    let base = serve(vec![("/some-asset", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("some-asset"), "old bytes").unwrap();
    let catalog = Catalog {
        items: vec![item(&base, "/some-asset", "some-asset", SOME_CONTENT_MD5)],
    };

    let report = cache_in(tmp.path(), 2)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded, vec!["some-asset".to_string()]);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("some-asset")).unwrap(),
        "some-content"
    );
}

#[tokio::test]
async fn unverified_previous_entry_is_removed_on_mismatch() {
    let base = serve(vec![("/some-asset", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("some-asset"), "old bytes").unwrap();
    let catalog = Catalog {
        items: vec![item(&base, "/some-asset", "some-asset", "incorrect-md5")],
    };

    cache_in(tmp.path(), 2)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(listing(tmp.path()).is_empty());
}

#[tokio::test]
async fn http_error_is_a_download_failure() {
    let base = serve(vec![]).await;
    let tmp = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        items: vec![item(&base, "/missing", "some-asset", SOME_CONTENT_MD5)],
    };

    let err = cache_in(tmp.path(), 2)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Download { .. }), "got {err:?}");
    assert!(listing(tmp.path()).is_empty());
}

#[tokio::test]
async fn many_items_download_concurrently() {
    let base = serve(vec![("/a", "some-content"), ("/b", "some-content"), ("/c", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        items: vec![
            item(&base, "/a", "a", SOME_CONTENT_MD5),
            item(&base, "/b", "b", SOME_CONTENT_MD5),
            item(&base, "/c", "c", SOME_CONTENT_MD5),
        ],
    };

    let report = cache_in(tmp.path(), 3)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded.len(), 3);
    assert_eq!(listing(tmp.path()), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn mismatch_does_not_wait_for_in_flight_downloads() {
    let router = Router::new()
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "some-content"
            }),
        )
        .route("/bad", get(|| async { "tampered" }));
    let base = serve_router(router).await;
    let tmp = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        items: vec![
            item(&base, "/slow", "slow-asset", SOME_CONTENT_MD5),
            item(&base, "/bad", "bad-asset", SOME_CONTENT_MD5),
        ],
    };

    let cache = cache_in(tmp.path(), 2);
    let err = tokio::time::timeout(
        Duration::from_secs(10),
        cache.provision(&catalog, &CancelFlag::new()),
    )
    .await
    .expect("provisioning should fail without waiting for the slow download")
    .unwrap_err();

    assert!(matches!(err, ProvisionError::ChecksumMismatch { ref name, .. } if name == "bad-asset"));
    assert!(listing(tmp.path()).is_empty(), "got {:?}", listing(tmp.path()));
}

#[tokio::test]
async fn duplicate_names_share_one_cache_entry() {
    let body: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let md5 = hex::encode(Md5::digest(&body));
    let router = Router::new().route(
        "/asset",
        get(move || {
            let body = body.clone();
            async move { body }
        }),
    );
    let base = serve_router(router).await;
    let catalog = Catalog {
        items: vec![
            item(&base, "/asset", "asset", &md5),
            item(&base, "/asset", "asset", &md5),
        ],
    };

    for _ in 0..5 {
        let tmp = tempfile::tempdir().unwrap();

        let report = cache_in(tmp.path(), 4)
            .provision(&catalog, &CancelFlag::new())
            .await
            .unwrap();

        assert!(!report.downloaded.is_empty());
        assert_eq!(report.downloaded.len() + report.cached.len(), 2);
        assert_eq!(listing(tmp.path()), vec!["asset".to_string()]);
        assert_eq!(
            cfdev::assets::cache::file_md5(&tmp.path().join("asset"))
                .await
                .unwrap()
                .as_deref(),
            Some(md5.as_str())
        );
    }
}

#[tokio::test]
async fn name_with_part_suffix_is_an_ordinary_asset() {
    let base = serve(vec![("/x", "some-content"), ("/x-part", "some-content")]).await;
    let tmp = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        items: vec![
            item(&base, "/x", "x", SOME_CONTENT_MD5),
            item(&base, "/x-part", "x.part", SOME_CONTENT_MD5),
        ],
    };

    cache_in(tmp.path(), 2)
        .provision(&catalog, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(listing(tmp.path()), vec!["x".to_string(), "x.part".to_string()]);
}

// ---------------------------------------------------------------------------
// Catalog fetching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catalog_fetched_from_url() {
    let base = serve(vec![(
        "/catalog.json",
        r#"{"items":[{"url":"http://example.invalid/x","name":"x","md5":"00"}]}"#,
    )])
    .await;
    let source: CatalogSource = format!("{base}/catalog.json").parse().unwrap();

    let catalog = CatalogClient::new(reqwest::Client::new())
        .fetch(&source)
        .await
        .unwrap();

    assert_eq!(catalog.items.len(), 1);
    assert_eq!(catalog.items[0].name, "x");
}

#[tokio::test]
async fn catalog_http_errors_are_unavailable() {
    let base = serve(vec![]).await;
    let source: CatalogSource = format!("{base}/missing").parse().unwrap();

    let err = CatalogClient::new(reqwest::Client::new())
        .fetch(&source)
        .await
        .unwrap_err();

    assert!(matches!(err, CatalogError::Unavailable { .. }), "got {err:?}");
}

#[tokio::test]
async fn malformed_catalog_document() {
    let base = serve(vec![("/catalog.json", "<html>not a catalog</html>")]).await;
    let source: CatalogSource = format!("{base}/catalog.json").parse().unwrap();

    let err = CatalogClient::new(reqwest::Client::new())
        .fetch(&source)
        .await
        .unwrap_err();

    assert!(matches!(err, CatalogError::Malformed(_)), "got {err:?}");
}
