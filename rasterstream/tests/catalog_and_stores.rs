//! Catalogs and stores backed by files on disk.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{expected, fixture, pixel_bounds, tile, ORIGIN_LAT, ORIGIN_LON, PIXEL_DEG, TILE_PX};
use rasterstream::config::{ConfigError, FetchConfig, StreamingConfig};
use rasterstream::coord::{Crs, GeoTransform};
use rasterstream::decode::DecoderRegistry;
use rasterstream::directory::{DirectoryCache, HeaderProbe};
use rasterstream::fetch::{
    FetchError, LocalObjectStore, MemoryObjectStore, ObjectStore, RangeFetcher, RetryPolicy,
};
use rasterstream::index::{BandId, Catalog, CatalogError, ManifestCatalog, ProbingCatalog};
use rasterstream::telemetry::StreamMetrics;
use rasterstream::{Parcel, StreamingOrchestrator};
use tempfile::TempDir;

fn write(root: &Path, key: &str, bytes: &[u8]) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Georeferenced fixture for tile column `index`.
fn georeferenced(index: u32, seed: u32) -> Vec<u8> {
    let lon = ORIGIN_LON + f64::from(index * TILE_PX) * PIXEL_DEG;
    fixture()
        .georeferenced(
            Crs::WGS84,
            GeoTransform::north_up(lon, ORIGIN_LAT, PIXEL_DEG, PIXEL_DEG),
        )
        .seed(seed)
        .pixel_offset(0, index * TILE_PX)
        .build()
}

fn probing_catalog(store: Arc<dyn ObjectStore>, prefix: &str) -> ProbingCatalog {
    let fetch = FetchConfig::default().with_retry(RetryPolicy::None);
    let metrics = Arc::new(StreamMetrics::new());
    let fetcher = RangeFetcher::new(Arc::clone(&store), &fetch, Arc::clone(&metrics));
    let directories = DirectoryCache::new(
        fetcher,
        DecoderRegistry::default(),
        HeaderProbe::from(&fetch),
        64,
        metrics,
    );
    ProbingCatalog::new(store, directories, prefix).unwrap()
}

#[tokio::test]
async fn test_probing_catalog_over_local_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    // An older acquisition of 33TUM with different pixels
    write(root, "2023-06/33TUM_20230601_B04.tif", &georeferenced(0, 7));
    write(root, "2023-06/33TUM_20230614_B04.tif", &georeferenced(0, 0));
    write(root, "2023-06/33TUM_20230614_B08.tif", &georeferenced(0, 1));
    write(root, "2023-06/33TUN_20230614_B04.tif", &georeferenced(1, 0));
    write(root, "2023-06/33TUN_20230614_B08.tif", &georeferenced(1, 1));
    write(root, "2023-06/README.txt", b"not a tile");
    write(root, "2023-07/33TUM_20230702_B04.tif", &georeferenced(0, 9));

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(root));
    let catalog = Arc::new(probing_catalog(Arc::clone(&store), "2023-06/"));

    let everywhere = pixel_bounds(0..64, 0..128);
    let tiles = catalog.list_tiles(&everywhere).await.unwrap();
    let ids: Vec<&str> = tiles.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["33TUM", "33TUN"]);
    assert_eq!(tiles[0].crs(), Crs::WGS84);
    assert_eq!(tiles[0].location.bands(), vec![BandId::from("B04"), BandId::from("B08")]);
    assert_eq!(tiles[0].acquired_at.format("%Y%m%d").to_string(), "20230614");

    let orch = StreamingOrchestrator::new(
        StreamingConfig::default().with_retry(RetryPolicy::None),
        catalog,
        store,
    )
    .unwrap();
    let parcel = Parcel::from_bounds("field", pixel_bounds(40..44, 60..70));
    let result = orch
        .resolve(&parcel, &[BandId::from("B04"), BandId::from("B08")])
        .await
        .unwrap()
        .into_resolved()
        .unwrap();

    assert_eq!(result.band(&"B04".into()).unwrap().data, expected(40..44, 60..70, 0));
    assert_eq!(result.band(&"B08".into()).unwrap().data, expected(40..44, 60..70, 1));
    assert!(result.is_complete());
}

#[tokio::test]
async fn test_probing_catalog_retries_after_store_failure() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("p/33TUM_20230614_B04.tif", georeferenced(0, 0));
    store.fail_next(
        "p/33TUM_20230614_B04.tif",
        FetchError::Transient {
            location: "p/33TUM_20230614_B04.tif".into(),
            reason: "connection reset".into(),
        },
    );
    let catalog = probing_catalog(Arc::clone(&store) as Arc<dyn ObjectStore>, "p/");
    let region = pixel_bounds(0..64, 0..64);

    let first = catalog.list_tiles(&region).await;
    assert!(matches!(first, Err(CatalogError::Store(FetchError::Transient { .. }))));
    assert_eq!(catalog.indexed_len(), None);

    let tiles = catalog.list_tiles(&region).await.unwrap();
    let ids: Vec<&str> = tiles.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["33TUM"]);
}

#[tokio::test]
async fn test_probing_catalog_lists_only_intersecting_tiles() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("p/33TUM_20230614_B04.tif", georeferenced(0, 0));
    store.insert("p/33TUN_20230614_B04.tif", georeferenced(1, 0));
    let catalog = probing_catalog(Arc::clone(&store) as Arc<dyn ObjectStore>, "p/");

    let east = catalog.list_tiles(&pixel_bounds(10..20, 70..80)).await.unwrap();
    let ids: Vec<&str> = east.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["33TUN"]);
    assert_eq!(catalog.indexed_len(), Some(2));
}

#[tokio::test]
async fn test_manifest_file_drives_local_reads() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let t = tile("T1", 0, &["B04"]);
    write(root, "T1_B04.tif", &fixture().deflate().build());

    let manifest = ManifestCatalog::new(vec![t.clone()]);
    let manifest_path = root.join("tiles.json");
    std::fs::write(&manifest_path, manifest.to_json_string().unwrap()).unwrap();

    let loaded = ManifestCatalog::load(&manifest_path).unwrap();
    assert_eq!(loaded.tiles(), &[t][..]);

    let orch = StreamingOrchestrator::new(
        StreamingConfig::default(),
        Arc::new(loaded),
        Arc::new(LocalObjectStore::new(root)),
    )
    .unwrap();
    let parcel = Parcel::from_bounds("field", pixel_bounds(5..9, 50..60));
    let result = orch
        .resolve(&parcel, &[BandId::from("B04")])
        .await
        .unwrap()
        .into_resolved()
        .unwrap();
    assert_eq!(result.band(&"B04".into()).unwrap().data, expected(5..9, 50..60, 0));
}

#[tokio::test]
async fn test_local_store_reads_ranges_past_end() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a/b.bin", b"0123456789");
    let store = LocalObjectStore::new(dir.path());
    let location = "a/b.bin".into();

    let head = store
        .get_range(&location, rasterstream::fetch::ByteRange::new(6, 100))
        .await
        .unwrap();
    assert_eq!(head.as_ref(), b"6789");

    let listed = store.list("a/").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, 10);
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rasterstream.ini");
    std::fs::write(
        &path,
        "[cache]\nmax_size = 512MB\n\n\
         [fetch]\nmax_attempts = 2\ninitial_backoff_ms = 10\nheader_probe = 16KB\n\n\
         [streaming]\nfull_fetch_threshold = 0.7\nwait_timeout_secs = 5\nworker_pool_size = 3\n",
    )
    .unwrap();

    let config = StreamingConfig::load(&path).unwrap();
    assert_eq!(config.cache.max_size_bytes, 512 * 1024 * 1024);
    assert_eq!(config.fetch.header_probe_bytes, 16 * 1024);
    assert_eq!(config.fetch.retry.max_attempts(), 2);
    assert_eq!(config.streaming.full_fetch_threshold, 0.7);
    assert_eq!(config.streaming.wait_timeout, Duration::from_secs(5));
    assert_eq!(config.streaming.worker_pool_size, 3);
    assert_eq!(config.fetch.max_header_bytes, FetchConfig::default().max_header_bytes);
}

#[test]
fn test_config_file_with_bad_value_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.ini");
    std::fs::write(&path, "[streaming]\nfull_fetch_threshold = 1.5\n").unwrap();

    let err = StreamingConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert!(StreamingConfig::load(dir.path().join("missing.ini")).is_err());
}
