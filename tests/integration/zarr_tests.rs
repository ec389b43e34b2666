//! Zarr multiscale stores: OME-NGFF groups, bioformats2raw and bare arrays.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use multiscale_pixels::zarr::BIOFORMATS2RAW_METADATA_KEY;
use multiscale_pixels::{
    open_zarr, MemoryStore, OpenOptions, PixelSource, Pyramid, Selection, SourceError,
};

use super::test_utils::{add_zarr_array, as_u32, ome_xml};

fn level0(index: &[u64]) -> u16 {
    (index[0] * 1000 + index[1] * 30 + index[2]) as u16
}

fn level1(index: &[u64]) -> u16 {
    5000 + (index[0] * 1000 + index[1] * 15 + index[2]) as u16
}

/// Two-channel OME-NGFF group with two levels of 8x8 chunks.
fn ngff_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    let attrs = serde_json::json!({
        "multiscales": [{
            "version": "0.4",
            "name": "fixture",
            "axes": [
                {"name": "c", "type": "channel"},
                {"name": "y", "type": "space", "unit": "micrometer"},
                {"name": "x", "type": "space", "unit": "micrometer"}
            ],
            "datasets": [
                {"path": "0", "coordinateTransformations": [{"type": "scale", "scale": [1.0, 0.5, 0.5]}]},
                {"path": "1", "coordinateTransformations": [{"type": "scale", "scale": [1.0, 1.0, 1.0]}]}
            ]
        }],
        "omero": {
            "channels": [
                {"label": "DAPI", "color": "0000FF"},
                {"label": "GFP", "color": "00FF00"}
            ]
        }
    });
    store.insert(".zattrs", attrs.to_string());
    add_zarr_array(&mut store, "0", &[2, 20, 30], &[1, 8, 8], level0);
    add_zarr_array(&mut store, "1", &[2, 10, 15], &[1, 8, 8], level1);
    store
}

async fn open(store: MemoryStore) -> Result<Pyramid, SourceError> {
    open_zarr(Arc::new(store), &OpenOptions::default(), &CancellationToken::new()).await
}

fn expected(value: fn(&[u64]) -> u16, c: u64, x0: u64, y0: u64, w: u64, h: u64) -> Vec<u32> {
    let mut out = Vec::new();
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            out.push(value(&[c, y, x]) as u32);
        }
    }
    out
}

#[tokio::test]
async fn test_ngff_levels_and_edge_tiles() {
    let pyramid = open(ngff_store()).await.unwrap();
    let cancel = CancellationToken::new();

    assert_eq!(pyramid.level_count(), 2);
    let base = pyramid.base();
    assert_eq!(base.labels().as_slice(), ["c", "y", "x"]);
    assert_eq!(base.shape(), &[2, 20, 30]);
    assert_eq!(base.tile_size(), 8);

    // Last column and row: 30 % 8 = 6 wide, 20 % 8 = 4 high
    let tile = base
        .get_tile(3, 2, &Selection::new().with("c", 1), &cancel)
        .await
        .unwrap();
    assert_eq!((tile.width, tile.height), (6, 4));
    assert_eq!(as_u32(&tile.data), expected(level0, 1, 24, 16, 6, 4));

    let raster = pyramid
        .lowest()
        .get_raster(&Selection::new(), &cancel)
        .await
        .unwrap();
    assert_eq!((raster.width, raster.height), (15, 10));
    assert_eq!(as_u32(&raster.data), expected(level1, 0, 0, 0, 15, 10));

    assert!(base
        .get_tile(4, 0, &Selection::new(), &cancel)
        .await
        .unwrap_err()
        .is_tile_bounds());
}

#[tokio::test]
async fn test_ngff_metadata() {
    let pyramid = open(ngff_store()).await.unwrap();
    assert!(pyramid.manifest().is_none());

    let meta = pyramid.base().meta().unwrap();
    assert_eq!(meta.physical_sizes["x"].size, 0.5);
    assert_eq!(meta.physical_sizes["y"].unit, "micrometer");
    assert!(!meta.physical_sizes.contains_key("z"));
    assert_eq!(meta.channels.len(), 2);
    assert_eq!(meta.channels[1].name.as_deref(), Some("GFP"));
    assert_eq!(meta.channels[0].color, Some([0, 0, 255, 255]));
}

#[tokio::test]
async fn test_cancelled_chunk_read_can_be_repeated() {
    let pyramid = open(ngff_store()).await.unwrap();
    let selection = Selection::new().with("c", 1);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = pyramid
        .base()
        .get_tile(0, 0, &selection, &cancelled)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let tile = pyramid
        .base()
        .get_tile(0, 0, &selection, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(as_u32(&tile.data), expected(level0, 1, 0, 0, 8, 8));
}

// =============================================================================
// bioformats2raw
// =============================================================================

fn bioformats2raw_store(stored_width: u64) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert(".zattrs", r#"{"bioformats2raw.layout": 3}"#);
    store.insert(
        BIOFORMATS2RAW_METADATA_KEY,
        ome_xml("XYZCT", "uint16", [16, 12, 1, 2, 1], ""),
    );
    store.insert(
        "0/.zattrs",
        r#"{"multiscales": [{"datasets": [{"path": "0"}]}]}"#,
    );
    add_zarr_array(
        &mut store,
        "0/0",
        &[1, 2, 1, 12, stored_width],
        &[1, 1, 1, 12, 16],
        |i| (i[1] * 1000 + i[3] * 16 + i[4]) as u16,
    );
    store
}

#[tokio::test]
async fn test_bioformats2raw_series() {
    let pyramid = open(bioformats2raw_store(16)).await.unwrap();
    let cancel = CancellationToken::new();

    let base = pyramid.base();
    assert_eq!(base.labels().as_slice(), ["t", "c", "z", "y", "x"]);
    assert_eq!(base.shape(), &[1, 2, 1, 12, 16]);
    assert_eq!(pyramid.manifest().unwrap().size_c, 2);
    assert_eq!(base.meta().unwrap().physical_sizes["x"].size, 0.25);

    let raster = base
        .get_raster(&Selection::tcz(0, 1, 0), &cancel)
        .await
        .unwrap();
    let values = as_u32(&raster.data);
    assert_eq!(values.len(), 16 * 12);
    assert_eq!(values[0], 1000);
    assert_eq!(values[16 * 11 + 15], 1000 + 11 * 16 + 15);
}

#[tokio::test]
async fn test_bioformats2raw_size_mismatch() {
    let result = open(bioformats2raw_store(20)).await;
    assert!(matches!(
        result,
        Err(SourceError::DimensionMismatch { ref axis, expected: 16, actual: 20 }) if axis == "x"
    ));
}

#[tokio::test]
async fn test_missing_series_is_malformed() {
    let store = bioformats2raw_store(16);
    let options = OpenOptions::default().with_image_index(1);
    let result = open_zarr(Arc::new(store), &options, &CancellationToken::new()).await;
    assert!(result.is_err());
}

// =============================================================================
// Bare arrays
// =============================================================================

#[tokio::test]
async fn test_array_without_multiscales() {
    let mut store = MemoryStore::new();
    add_zarr_array(&mut store, "", &[6, 10], &[4, 4], |i| (i[0] * 10 + i[1]) as u16);

    let pyramid = open(store).await.unwrap();
    let base = pyramid.base();
    assert_eq!(pyramid.level_count(), 1);
    assert_eq!(base.labels().as_slice(), ["y", "x"]);
    assert_eq!(base.tile_size(), 4);

    let tile = base
        .get_tile(2, 1, &Selection::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!((tile.width, tile.height), (2, 2));
    assert_eq!(as_u32(&tile.data), vec![48, 49, 58, 59]);
}

#[tokio::test]
async fn test_empty_store_is_malformed() {
    assert!(matches!(
        open(MemoryStore::new()).await,
        Err(SourceError::MalformedMetadata(_))
    ));
}
