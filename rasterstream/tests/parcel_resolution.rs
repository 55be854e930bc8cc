//! End-to-end parcel resolution over fixture tiles.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{expected, fixture, orchestrator, pixel_bounds, store_tile, tile, ORIGIN_LAT};
use geo::{polygon, MultiPolygon};
use rasterstream::config::FetchConfig;
use rasterstream::coord::{Crs, GeoTransform, RasterGrid};
use rasterstream::directory::SampleType;
use rasterstream::fetch::{MemoryObjectStore, ObjectLocation, RecordedRequest, RetryPolicy};
use rasterstream::index::{BandId, TileDescriptor, TileLocation};
use rasterstream::orchestrator::{ContributionOutcome, TileFailure};
use rasterstream::testing::TiffBuilder;
use rasterstream::{Parcel, ParcelOutcome, ParcelWindowResult, ResolveError, StreamingConfig};

fn config() -> StreamingConfig {
    StreamingConfig::default().with_retry(RetryPolicy::None)
}

fn bands(names: &[&str]) -> Vec<BandId> {
    names.iter().map(|b| BandId::from(*b)).collect()
}

fn resolved(outcome: Result<ParcelOutcome, ResolveError>) -> ParcelWindowResult {
    outcome
        .expect("parcel resolves")
        .into_resolved()
        .expect("parcel has source data")
}

#[tokio::test]
async fn test_parcel_outside_all_tiles_has_no_source_data() {
    let store = Arc::new(MemoryObjectStore::new());
    let t = tile("T1", 0, &["B04"]);
    store_tile(&store, &t, 0, &fixture());
    let orch = orchestrator(Arc::clone(&store), vec![t], config());

    let far = Parcel::from_bounds("far", pixel_bounds(0..4, 200..204));
    let outcome = orch.resolve(&far, &bands(&["B04"])).await.unwrap();

    assert!(outcome.is_no_source_data());
    assert_eq!(store.total_requests(), 0);
}

#[tokio::test]
async fn test_parcel_across_two_tiles_is_seamless() {
    let store = Arc::new(MemoryObjectStore::new());
    let tiles = vec![tile("T1", 0, &["B04", "B08"]), tile("T2", 1, &["B04", "B08"])];
    for (i, t) in tiles.iter().enumerate() {
        store_tile(&store, t, i as u32, &fixture());
    }
    let orch = orchestrator(store, tiles, config());

    let parcel = Parcel::from_bounds("edge", pixel_bounds(10..18, 58..70));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04", "B08"])).await);

    assert_eq!((result.width(), result.height()), (12, 8));
    assert_eq!(result.band(&"B04".into()).unwrap().data, expected(10..18, 58..70, 0));
    assert_eq!(result.band(&"B08".into()).unwrap().data, expected(10..18, 58..70, 1));
    assert!(result.is_complete());
    assert!(result.coverage_gap.is_none());
    assert_eq!(result.contributing_tiles().len(), 2);
    let pixels: Vec<u64> = result
        .contributions
        .iter()
        .map(|c| match c.outcome {
            ContributionOutcome::Contributed { pixels } => pixels,
            ContributionOutcome::Failed(_) => 0,
        })
        .collect();
    assert_eq!(pixels, vec![6 * 8, 6 * 8]);
}

#[tokio::test]
async fn test_unparseable_header_falls_back_to_full_read() {
    let store = Arc::new(MemoryObjectStore::new());
    let tiles = vec![tile("T1", 0, &["B04"]), tile("T2", 1, &["B04"])];
    store_tile(&store, &tiles[0], 0, &fixture());
    store_tile(&store, &tiles[1], 1, &fixture().ifd_at_end());
    let config = config().with_fetch(
        FetchConfig::default()
            .with_retry(RetryPolicy::None)
            .with_header_probe_bytes(512)
            .with_max_header_bytes(1024),
    );
    let orch = orchestrator(Arc::clone(&store), tiles, config);

    let parcel = Parcel::from_bounds("p", pixel_bounds(0..6, 60..68));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04"])).await);

    assert_eq!(result.band(&"B04".into()).unwrap().data, expected(0..6, 60..68, 0));
    assert_eq!(store.full_requests(), 1);
    let t1 = store.requests_for(&ObjectLocation::from("T1_B04.tif"));
    assert!(t1.iter().all(|r| matches!(r, RecordedRequest::Range(..))));
    assert_eq!(orch.metrics().parse_failures, 1);
}

#[tokio::test]
async fn test_parcel_past_last_tile_reports_coverage_gap() {
    let store = Arc::new(MemoryObjectStore::new());
    let t = tile("T1", 0, &["B04"]);
    store_tile(&store, &t, 0, &fixture());
    let orch = orchestrator(store, vec![t], config());

    let parcel = Parcel::from_bounds("gap", pixel_bounds(20..25, 60..68));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04"])).await);

    let gap = result.coverage_gap.as_ref().expect("gap reported");
    assert_eq!(gap.uncovered_pixels, 4 * 5);
    assert_eq!(gap.total_pixels, 8 * 5);
    assert!((gap.fraction() - 0.5).abs() < 1e-12);
    assert!(!result.is_complete());
    assert_eq!(result.valid_count(), 4 * 5);

    let b04 = result.band(&"B04".into()).unwrap();
    assert_eq!(b04.get(0, 3), Some(expected(20..21, 63..64, 0)[0]));
    assert!(b04.get(0, 4).unwrap().is_nan());
}

#[tokio::test]
async fn test_tile_on_other_lattice_is_reported_not_merged() {
    let store = Arc::new(MemoryObjectStore::new());
    let fine = tile("T1", 0, &["B04"]);
    store_tile(&store, &fine, 0, &fixture());

    // Quarter-degree pixels starting where T1 ends
    let coarse_grid = RasterGrid::new(
        Crs::WGS84,
        GeoTransform::north_up(18.0, ORIGIN_LAT, 0.25, 0.25),
        32,
        32,
    );
    let objects = [(BandId::from("B04"), ObjectLocation::from("T2_B04.tif"))]
        .into_iter()
        .collect();
    let coarse = TileDescriptor::new(
        "T2".into(),
        coarse_grid,
        DateTime::<Utc>::UNIX_EPOCH,
        TileLocation::PerBand(objects),
    );
    store.insert("T2_B04.tif", TiffBuilder::new(32, 32).tiled(16, 16).build());
    let orch = orchestrator(Arc::clone(&store), vec![fine, coarse], config());

    let parcel = Parcel::from_bounds("mixed", pixel_bounds(0..8, 60..68));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04"])).await);

    let failed = result.failed_tiles();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].tile.as_str(), "T2");
    assert!(matches!(failed[0].failure(), Some(TileFailure::GridMismatch(_))));
    // The coarse tile still counts as coverage
    assert!(result.coverage_gap.is_none());
    assert_eq!(result.valid_count(), 4 * 8);
    assert!(store
        .requests_for(&ObjectLocation::from("T2_B04.tif"))
        .is_empty());
}

#[tokio::test]
async fn test_planar_tile_serves_every_band() {
    let store = Arc::new(MemoryObjectStore::new());
    let reference = tile("P1", 0, &["B04"]);
    let planar = TileDescriptor::new(
        "P1".into(),
        reference.grid,
        reference.acquired_at,
        TileLocation::Planar {
            object: ObjectLocation::from("P1.tif"),
            bands: bands(&["B02", "B03", "B04"]),
        },
    );
    store.insert("P1.tif", fixture().bands(3).build());
    let orch = orchestrator(Arc::clone(&store), vec![planar], config());

    let parcel = Parcel::from_bounds("rgb", pixel_bounds(30..40, 5..12));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04", "B02"])).await);

    assert_eq!(result.band(&"B02".into()).unwrap().data, expected(30..40, 5..12, 0));
    assert_eq!(result.band(&"B04".into()).unwrap().data, expected(30..40, 5..12, 2));
    assert!(result.band(&"B03".into()).is_none());
    assert_eq!(orch.metrics().directories_parsed, 2);
}

#[tokio::test]
async fn test_encoding_variants_decode_identically() {
    let variants: Vec<(&str, TiffBuilder)> = vec![
        ("striped", fixture().striped(7)),
        ("bigtiff", fixture().bigtiff()),
        ("big endian", fixture().big_endian()),
        ("deflate", fixture().deflate()),
        ("deflate with predictor", fixture().deflate().predictor()),
        ("u8", fixture().sample_type(SampleType::U8)),
        ("i32", fixture().sample_type(SampleType::I32)),
        ("f32", fixture().sample_type(SampleType::F32).deflate()),
        ("f64 big endian", fixture().sample_type(SampleType::F64).big_endian()),
        ("odd tiles", TiffBuilder::new(64, 64).tiled(48, 48)),
    ];

    for (name, builder) in variants {
        let store = Arc::new(MemoryObjectStore::new());
        let t = tile("T1", 0, &["B04"]);
        store_tile(&store, &t, 0, &builder);
        let orch = orchestrator(store, vec![t], config());

        let parcel = Parcel::from_bounds(name, pixel_bounds(3..21, 5..31));
        let result = resolved(orch.resolve(&parcel, &bands(&["B04"])).await);
        assert_eq!(
            result.band(&"B04".into()).unwrap().data,
            expected(3..21, 5..31, 0),
            "variant {name}"
        );
    }
}

#[tokio::test]
async fn test_sparse_block_reads_as_nodata() {
    let store = Arc::new(MemoryObjectStore::new());
    let t = tile("T1", 0, &["B04"]);
    store_tile(&store, &t, 0, &fixture().nodata(9999.0).sparse_block(0));
    let orch = orchestrator(store, vec![t], config());

    let parcel = Parcel::from_bounds("sparse", pixel_bounds(14..18, 14..18));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04"])).await);

    let b04 = result.band(&"B04".into()).unwrap();
    assert_eq!(b04.nodata, Some(9999.0));
    assert_eq!(b04.get(0, 0), Some(9999.0));
    assert_eq!(b04.get(1, 1), Some(9999.0));
    assert_eq!(b04.get(2, 2), Some(expected(16..17, 16..17, 0)[0]));
}

#[tokio::test]
async fn test_polygon_mask_follows_geometry() {
    let store = Arc::new(MemoryObjectStore::new());
    let t = tile("T1", 0, &["B04"]);
    store_tile(&store, &t, 0, &fixture());
    let orch = orchestrator(store, vec![t], config());

    // Right triangle over an 8 x 8 pixel square, hypotenuse from NW to SE
    let b = pixel_bounds(8..16, 8..16);
    let triangle = polygon![
        (x: b.min_x, y: b.max_y),
        (x: b.min_x, y: b.min_y),
        (x: b.max_x, y: b.min_y),
        (x: b.min_x, y: b.max_y),
    ];
    let parcel = Parcel::new("tri", MultiPolygon::new(vec![triangle]));
    let result = resolved(orch.resolve(&parcel, &bands(&["B04"])).await);

    assert_eq!((result.width(), result.height()), (8, 8));
    let mask = &result.polygon_mask;
    // Pixel centres strictly below the diagonal
    let inside = (0..8u32)
        .flat_map(|r| (0..8u32).map(move |c| (r, c)))
        .filter(|&(r, c)| c < r)
        .count();
    assert_eq!(mask.iter().filter(|m| **m).count(), inside);
    assert!(mask[(7 * 8) as usize]);
    assert!(!mask[7]);

    let masked = result.band(&"B04".into()).unwrap().masked(mask);
    assert_eq!(masked.len(), inside);
}

#[tokio::test]
async fn test_batch_shares_directories_and_keeps_order() {
    let store = Arc::new(MemoryObjectStore::new());
    let t = tile("T1", 0, &["B04"]);
    store_tile(&store, &t, 0, &fixture());
    let orch = orchestrator(store, vec![t], config().with_worker_pool_size(4));

    let parcels: Vec<Parcel> = (0..12u32)
        .map(|i| Parcel::from_bounds(format!("p{i}"), pixel_bounds(i * 4..i * 4 + 3, i..i + 5)))
        .chain(std::iter::once(Parcel::from_bounds(
            "outside",
            pixel_bounds(0..2, 300..302),
        )))
        .collect();
    let reports = orch.resolve_batch(&parcels, &bands(&["B04"])).await;

    let ids: Vec<&str> = reports.iter().map(|r| r.parcel_id.as_str()).collect();
    let expected_ids: Vec<&str> = parcels.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, expected_ids);

    for (i, report) in reports.iter().take(12).enumerate() {
        let i = i as u32;
        let result = report.outcome.as_ref().unwrap().resolved().unwrap();
        assert_eq!(
            result.band(&"B04".into()).unwrap().data,
            expected(i * 4..i * 4 + 3, i..i + 5, 0)
        );
    }
    assert!(matches!(
        reports[12].outcome,
        Ok(ParcelOutcome::NoSourceData)
    ));
    assert_eq!(orch.metrics().directories_parsed, 1);
}

#[tokio::test]
async fn test_missing_objects_fail_the_parcel() {
    let store = Arc::new(MemoryObjectStore::new());
    let t = tile("T1", 0, &["B04"]);
    let orch = orchestrator(store, vec![t], config());

    let parcel = Parcel::from_bounds("ghost", pixel_bounds(0..4, 0..4));
    let err = orch.resolve(&parcel, &bands(&["B04"])).await.unwrap_err();

    match err {
        ResolveError::AllTilesFailed { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0].failure(), Some(TileFailure::Cache(_))));
        }
        other => panic!("unexpected error: {other}"),
    }
}
