//! TIFF-backed pyramids: SubIFD, legacy, companion and stack layouts.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use multiscale_pixels::error::IoError;
use multiscale_pixels::{
    open_companion, open_multi_tiff, open_ome_tiff, FileSource, MemoryFileSource,
    MemoryRangeReader, OpenOptions, PixelSource, Pyramid, Selection, SourceError, TileOutcome,
};

use super::test_utils::{as_u32, build_tiff, ifd_offsets, ome_xml, TestImage, TrackingMockReader};

// =============================================================================
// Fixtures
// =============================================================================

const TWO_CHANNELS: &str = r#"<Channel ID="Channel:0:0" Name="DAPI" Color="65535" SamplesPerPixel="1"/>
      <Channel ID="Channel:0:1" Name="GFP" Color="-16776961" SamplesPerPixel="1"/>"#;

/// Two-channel 40x30 OME-TIFF with two SubIFD levels per plane.
fn subifd_images() -> Vec<TestImage> {
    let xml = ome_xml("XYZCT", "uint16", [40, 30, 1, 2, 1], TWO_CHANNELS);
    vec![
        TestImage::new(40, 30, 0)
            .with_description(xml)
            .with_sub_images(vec![TestImage::new(20, 15, 10000), TestImage::new(10, 7, 20000)]),
        TestImage::new(40, 30, 30000)
            .with_sub_images(vec![TestImage::new(20, 15, 40000), TestImage::new(10, 7, 50000)]),
    ]
}

/// The same image with every resolution stored as top-level IFDs.
fn legacy_images() -> Vec<TestImage> {
    let xml = ome_xml("XYZCT", "uint16", [40, 30, 1, 2, 1], TWO_CHANNELS);
    vec![
        TestImage::new(40, 30, 0).with_description(xml),
        TestImage::new(40, 30, 30000),
        TestImage::new(20, 15, 10000),
        TestImage::new(20, 15, 40000),
    ]
}

async fn open_memory(images: &[TestImage], options: &OpenOptions) -> Result<Pyramid, SourceError> {
    let reader = MemoryRangeReader::new(build_tiff(images), "mem://image.ome.tif");
    open_ome_tiff(reader, options, &CancellationToken::new()).await
}

/// File source that records every open.
#[derive(Clone, Default)]
struct CountingSource {
    inner: MemoryFileSource,
    opened: Arc<Mutex<Vec<String>>>,
}

impl CountingSource {
    fn with_file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.inner = self.inner.with_file(name, data);
        self
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileSource for CountingSource {
    type Reader = MemoryRangeReader;

    async fn open(&self, name: &str) -> Result<Self::Reader, IoError> {
        self.opened.lock().unwrap().push(name.to_string());
        self.inner.open(name).await
    }
}

// =============================================================================
// Single-file OME-TIFF
// =============================================================================

#[tokio::test]
async fn test_subifd_pyramid_levels_and_tiles() {
    let images = subifd_images();
    let pyramid = open_memory(&images, &OpenOptions::default()).await.unwrap();
    let cancel = CancellationToken::new();

    assert_eq!(pyramid.level_count(), 3);
    let base = pyramid.base();
    assert_eq!(base.labels().as_slice(), ["t", "c", "z", "y", "x"]);
    assert_eq!(base.shape(), &[1, 2, 1, 30, 40]);
    assert_eq!(pyramid.level(1).unwrap().shape(), &[1, 2, 1, 15, 20]);
    assert_eq!(pyramid.lowest().shape(), &[1, 2, 1, 7, 10]);
    assert_eq!(base.tile_size(), 16);

    // Edge tile of the second channel: 40 % 16 = 8 wide, 30 % 16 = 14 high
    let tile = base
        .get_tile(2, 1, &Selection::new().with("c", 1), &cancel)
        .await
        .unwrap();
    assert_eq!((tile.width, tile.height), (8, 14));
    assert_eq!(as_u32(&tile.data), images[1].expected(32, 16, 8, 14));

    let tile = pyramid
        .level(1)
        .unwrap()
        .get_tile(1, 0, &Selection::new(), &cancel)
        .await
        .unwrap();
    assert_eq!((tile.width, tile.height), (4, 15));
    assert_eq!(as_u32(&tile.data), images[0].sub_images[0].expected(16, 0, 4, 15));

    let raster = pyramid
        .lowest()
        .get_raster(&Selection::tcz(0, 1, 0), &cancel)
        .await
        .unwrap();
    assert_eq!(as_u32(&raster.data), images[1].sub_images[1].expected(0, 0, 10, 7));
}

#[tokio::test]
async fn test_manifest_metadata_is_exposed() {
    let pyramid = open_memory(&subifd_images(), &OpenOptions::default()).await.unwrap();

    let manifest = pyramid.manifest().unwrap();
    assert_eq!(manifest.size_c, 2);
    assert_eq!(manifest.channels[1].name.as_deref(), Some("GFP"));

    let meta = pyramid.base().meta().unwrap();
    assert_eq!(meta.physical_sizes["x"].size, 0.25);
    assert_eq!(meta.physical_sizes["y"].unit, "µm");
    assert_eq!(meta.photometric_interpretation, Some(1));
    assert_eq!(meta.channels[1].color, Some([255, 0, 0, 255]));
}

#[tokio::test]
async fn test_legacy_pyramid_levels() {
    let images = legacy_images();
    let pyramid = open_memory(&images, &OpenOptions::default()).await.unwrap();
    let cancel = CancellationToken::new();

    // Four top-level IFDs holding two planes each
    assert_eq!(pyramid.level_count(), 2);

    let raster = pyramid
        .level(1)
        .unwrap()
        .get_raster(&Selection::new().with("c", 1), &cancel)
        .await
        .unwrap();
    assert_eq!((raster.width, raster.height), (20, 15));
    assert_eq!(as_u32(&raster.data), images[3].expected(0, 0, 20, 15));

    let raster = pyramid
        .base()
        .get_raster(&Selection::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(as_u32(&raster.data), images[0].expected(0, 0, 40, 30));
}

#[tokio::test]
async fn test_offsets_table() {
    let images = legacy_images();
    let data = build_tiff(&images);
    let offsets = ifd_offsets(&data);
    assert_eq!(offsets.len(), 4);
    let cancel = CancellationToken::new();

    let options = OpenOptions::default().with_offsets(offsets.clone());
    let pyramid = open_ome_tiff(MemoryRangeReader::new(data.clone(), "mem://a"), &options, &cancel)
        .await
        .unwrap();
    assert_eq!(pyramid.level_count(), 2);

    // A table that disagrees with the file is ignored
    let options = OpenOptions::default().with_offsets(vec![12, 1 << 40]);
    let pyramid = open_ome_tiff(MemoryRangeReader::new(data.clone(), "mem://b"), &options, &cancel)
        .await
        .unwrap();
    assert_eq!(pyramid.level_count(), 2);
    let raster = pyramid
        .level(1)
        .unwrap()
        .get_raster(&Selection::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(as_u32(&raster.data), images[2].expected(0, 0, 20, 15));

    // A table listing only the first directories is continued by walking
    let options = OpenOptions::default().with_offsets(offsets[..1].to_vec());
    let pyramid = open_ome_tiff(MemoryRangeReader::new(data, "mem://c"), &options, &cancel)
        .await
        .unwrap();
    assert_eq!(pyramid.level_count(), 2);
    let raster = pyramid
        .level(1)
        .unwrap()
        .get_raster(&Selection::new().with("c", 1), &cancel)
        .await
        .unwrap();
    assert_eq!(as_u32(&raster.data), images[3].expected(0, 0, 20, 15));
}

#[tokio::test]
async fn test_interleaved_deflate_strips() {
    let xml = ome_xml("XYCZT", "uint8", [20, 10, 1, 3, 1], r#"<Channel ID="Channel:0:0" SamplesPerPixel="3"/>"#);
    let image = TestImage::new(20, 10, 0)
        .with_tile(None)
        .with_samples(3)
        .with_bits(8)
        .with_compression(8)
        .with_description(xml);
    let pyramid = open_memory(std::slice::from_ref(&image), &OpenOptions::default())
        .await
        .unwrap();
    let base = pyramid.base();

    assert_eq!(base.labels().as_slice(), ["t", "z", "c", "y", "x", "_c"]);
    assert_eq!(base.shape(), &[1, 1, 1, 10, 20, 3]);
    assert_eq!(base.tile_size(), 512);

    let tile = base
        .get_tile(0, 0, &Selection::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(tile.samples_per_pixel(), 3);
    assert_eq!(as_u32(&tile.data), image.expected(0, 0, 20, 10));
}

#[tokio::test]
async fn test_mismatched_manifest_fails_at_open() {
    let xml = ome_xml("XYZCT", "uint16", [64, 30, 1, 1, 1], "");
    let images = vec![TestImage::new(40, 30, 0).with_description(xml)];
    assert!(matches!(
        open_memory(&images, &OpenOptions::default()).await,
        Err(SourceError::DimensionMismatch { ref axis, expected: 64, actual: 40 }) if axis == "x"
    ));

    let images = vec![TestImage::new(40, 30, 0)];
    assert!(matches!(
        open_memory(&images, &OpenOptions::default()).await,
        Err(SourceError::MalformedMetadata(_))
    ));
}

// =============================================================================
// Bounds, selections, cancellation and caching
// =============================================================================

#[tokio::test]
async fn test_out_of_range_tile_is_bounds_error() {
    let pyramid = open_memory(&subifd_images(), &OpenOptions::default()).await.unwrap();
    let cancel = CancellationToken::new();

    let err = pyramid
        .base()
        .get_tile(3, 0, &Selection::new(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_tile_bounds());

    let result = pyramid.base().get_tile(0, 2, &Selection::new(), &cancel).await;
    assert!(matches!(
        TileOutcome::from_result(result).unwrap(),
        TileOutcome::Skipped(_)
    ));
}

#[tokio::test]
async fn test_selection_errors() {
    let pyramid = open_memory(&subifd_images(), &OpenOptions::default()).await.unwrap();
    let cancel = CancellationToken::new();
    let base = pyramid.base();

    assert!(matches!(
        base.get_raster(&Selection::new().with("q", 0), &cancel).await,
        Err(SourceError::UnknownDimension { .. })
    ));
    assert!(matches!(
        base.get_raster(&Selection::new().with("c", 2), &cancel).await,
        Err(SourceError::InvalidSelection(_))
    ));
    assert!(matches!(pyramid.level(3), Err(SourceError::LevelOutOfRange { .. })));
}

#[tokio::test]
async fn test_request_after_cancellation_succeeds() {
    let images = subifd_images();
    let pyramid = open_memory(&images, &OpenOptions::default()).await.unwrap();
    let selection = Selection::new().with("c", 1);
    let level = pyramid.level(1).unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = level.get_raster(&selection, &cancelled).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(
        TileOutcome::from_result(level.get_tile(0, 0, &selection, &cancelled).await).unwrap(),
        TileOutcome::Cancelled
    ));

    let raster = level
        .get_raster(&selection, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(as_u32(&raster.data), images[1].sub_images[0].expected(0, 0, 20, 15));
}

#[tokio::test]
async fn test_repeated_tile_hits_block_cache() {
    let reader = TrackingMockReader::new(build_tiff(&subifd_images()), "mock://image.ome.tif");
    let tracker = reader.clone();
    let cancel = CancellationToken::new();
    let pyramid = open_ome_tiff(reader, &OpenOptions::default(), &cancel).await.unwrap();

    let first = pyramid
        .base()
        .get_tile(1, 1, &Selection::new(), &cancel)
        .await
        .unwrap();
    let after_first = tracker.request_count();
    assert!(after_first > 0);
    assert!(!tracker.get_requests().await.is_empty());

    let second = pyramid
        .base()
        .get_tile(1, 1, &Selection::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(tracker.request_count(), after_first);
}

// =============================================================================
// Companion and stacks
// =============================================================================

fn companion_xml(with_second_channel: bool) -> String {
    let mut body = String::from(
        r#"<TiffData FirstC="0" IFD="0" PlaneCount="1"><UUID FileName="c0.ome.tif">urn:uuid:0</UUID></TiffData>"#,
    );
    if with_second_channel {
        body.push_str(
            r#"<TiffData FirstC="1" IFD="0" PlaneCount="1"><UUID FileName="c1.ome.tif">urn:uuid:1</UUID></TiffData>"#,
        );
    }
    ome_xml("XYCZT", "uint16", [24, 24, 1, 2, 1], &body)
}

#[tokio::test]
async fn test_companion_opens_files_lazily() {
    let c0 = TestImage::new(24, 24, 0);
    let c1 = TestImage::new(24, 24, 1000);
    let source = CountingSource::default()
        .with_file("image.companion.ome", companion_xml(true).into_bytes())
        .with_file("c0.ome.tif", build_tiff(std::slice::from_ref(&c0)))
        .with_file("c1.ome.tif", build_tiff(std::slice::from_ref(&c1)));
    let cancel = CancellationToken::new();

    let pyramid = open_companion(source.clone(), "image.companion.ome", &OpenOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(source.opened(), vec!["image.companion.ome", "c0.ome.tif"]);
    assert_eq!(pyramid.base().shape(), &[1, 1, 2, 24, 24]);

    let selection = Selection::new().with("c", 1);
    for _ in 0..2 {
        let tile = pyramid
            .base()
            .get_tile(1, 1, &selection, &cancel)
            .await
            .unwrap();
        assert_eq!(as_u32(&tile.data), c1.expected(16, 16, 8, 8));
    }
    assert_eq!(
        source.opened(),
        vec!["image.companion.ome", "c0.ome.tif", "c1.ome.tif"]
    );
}

#[tokio::test]
async fn test_companion_missing_plane() {
    let source = CountingSource::default()
        .with_file("image.companion.ome", companion_xml(false).into_bytes())
        .with_file("c0.ome.tif", build_tiff(&[TestImage::new(24, 24, 0)]));
    let cancel = CancellationToken::new();

    let pyramid = open_companion(source, "image.companion.ome", &OpenOptions::default(), &cancel)
        .await
        .unwrap();
    assert!(matches!(
        pyramid.base().get_raster(&Selection::new().with("c", 1), &cancel).await,
        Err(SourceError::MissingPlane { t: 0, c: 1, z: 0 })
    ));
}

#[tokio::test]
async fn test_multi_tiff_stack() {
    let a = [TestImage::new(16, 8, 0), TestImage::new(16, 8, 100)];
    let b = [TestImage::new(16, 8, 200), TestImage::new(16, 8, 300)];
    let source = CountingSource::default()
        .with_file("a.tif", build_tiff(&a))
        .with_file("b.tif", build_tiff(&b));
    let files = vec![
        ("a.tif".to_string(), vec![Selection::tcz(0, 0, 0), Selection::tcz(0, 0, 1)]),
        ("b.tif".to_string(), vec![Selection::tcz(0, 1, 0), Selection::tcz(0, 1, 1)]),
    ];
    let cancel = CancellationToken::new();

    let pyramid = open_multi_tiff(source, files, &OpenOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(pyramid.level_count(), 1);
    assert_eq!(pyramid.base().shape(), &[1, 2, 2, 8, 16]);

    let raster = pyramid
        .base()
        .get_raster(&Selection::tcz(0, 1, 1), &cancel)
        .await
        .unwrap();
    assert_eq!(as_u32(&raster.data), b[1].expected(0, 0, 16, 8));
}

#[tokio::test]
async fn test_incomplete_stack_fails_at_open() {
    let source = CountingSource::default()
        .with_file("a.tif", build_tiff(&[TestImage::new(16, 8, 0)]))
        .with_file("b.tif", build_tiff(&[TestImage::new(16, 8, 1)]));
    let files = vec![
        ("a.tif".to_string(), vec![Selection::tcz(0, 0, 0)]),
        ("b.tif".to_string(), vec![Selection::tcz(0, 1, 1)]),
    ];

    let result = open_multi_tiff(
        source.clone(),
        files,
        &OpenOptions::default(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(
        result,
        Err(SourceError::IncompleteStack { t: 0, c: 0, z: 1 })
    ));
    assert!(source.opened().is_empty());
}
