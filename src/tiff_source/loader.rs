//! Opening TIFF-backed pyramids.
//!
//! Three entry points, one per way the planes are described:
//! - [`open_ome_tiff`]: one OME-TIFF file carrying its own manifest
//! - [`open_companion`]: an OME-XML manifest (standalone or embedded)
//!   whose planes may live in sibling files
//! - [`open_multi_tiff`]: an ad-hoc stack where the caller declares which
//!   plane each IFD of each file holds

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dims::{shape_at_level, Labels, PlaneCoord, PlaneSizes, Selection, INTERLEAVE_LABEL};
use crate::error::SourceError;
use crate::format::tiff::{TiffFile, TiffImage};
use crate::io::{cancellable, read_all, FileSource, RangeReader};
use crate::manifest::{parse_ome_xml, ImageManifest, PlaneRef};
use crate::options::OpenOptions;
use crate::pixel::{PixelSource, PixelSourceMeta, Pyramid};

use super::indexer::{CachedFileSource, FileOpener, Layout, TiffIndexer};
use super::source::TiffPixelSource;

/// Open a single OME-TIFF file.
///
/// Sub-resolutions are taken from the SubIFDs of each plane when the file
/// has them, otherwise from further runs of top-level IFDs.
pub async fn open_ome_tiff<R: RangeReader + 'static>(
    reader: R,
    options: &OpenOptions,
    cancel: &CancellationToken,
) -> Result<Pyramid, SourceError> {
    let file = Arc::new(
        TiffFile::open(
            options.cached(reader),
            options.offsets.clone(),
            Arc::clone(&options.decoders),
            cancel,
        )
        .await?,
    );
    let manifest = embedded_manifest(&file, options.image_index, cancel).await?;

    let first_ifd = manifest.first_ifd();
    let base = file.image(first_ifd as usize, cancel).await?;
    let layout = if base.sub_ifds.is_empty() {
        Layout::Legacy {
            first_ifd,
            order: manifest.dimension_order,
            sizes: manifest.plane_sizes(),
        }
    } else {
        Layout::SubResolution {
            first_ifd,
            order: manifest.dimension_order,
            sizes: manifest.plane_sizes(),
        }
    };

    let indexer = TiffIndexer::new(layout, Some(file), None, Arc::clone(&options.decoders));
    manifest_pyramid(Arc::new(indexer), manifest, cancel).await
}

/// Open an image described by the OME-XML manifest `manifest_name`.
///
/// The manifest may be a standalone XML document (a `.companion.ome`
/// file) or the `ImageDescription` of a TIFF; in the latter case planes
/// without a file name live in that TIFF. Every other file is opened
/// through `source` the first time one of its planes is read.
pub async fn open_companion<S: FileSource + 'static>(
    source: S,
    manifest_name: &str,
    options: &OpenOptions,
    cancel: &CancellationToken,
) -> Result<Pyramid, SourceError> {
    let opener: Arc<dyn FileOpener> = Arc::new(CachedFileSource::new(source, options.clone()));
    let reader = cancellable(cancel, opener.open(manifest_name)).await?;

    let (manifest, main) = if looks_like_tiff(reader.as_ref(), cancel).await? {
        let file = Arc::new(
            TiffFile::open(
                reader,
                options.offsets.clone(),
                Arc::clone(&options.decoders),
                cancel,
            )
            .await?,
        );
        let manifest = embedded_manifest(&file, options.image_index, cancel).await?;
        (manifest, Some(file))
    } else {
        let bytes = cancellable(cancel, read_all(reader.as_ref())).await?;
        let xml = String::from_utf8_lossy(&bytes);
        let manifest = parse_ome_xml(&xml)?.into_image(options.image_index)?;
        (manifest, None)
    };

    let mut planes = manifest.plane_refs();
    if main.is_some() {
        // A TIFF naming itself is the main file
        for plane in planes.values_mut() {
            if plane.file_name.as_deref() == Some(manifest_name) {
                plane.file_name = None;
            }
        }
    }
    debug!(
        manifest = manifest_name,
        planes = planes.len(),
        embedded = main.is_some(),
        "resolved companion plane table"
    );

    let indexer = TiffIndexer::new(
        Layout::MultiFile { planes },
        main,
        Some(opener),
        Arc::clone(&options.decoders),
    );
    manifest_pyramid(Arc::new(indexer), manifest, cancel).await
}

/// Open an ad-hoc stack of single-plane-per-IFD TIFF files.
///
/// `files` pairs each file name with the selections of its IFDs: the i-th
/// selection names the plane stored in IFD i. Selections use the
/// `t`, `c`, `z` labels. Every plane inside the bounding box of the
/// declared selections must be supplied by some file, otherwise opening
/// fails with [`SourceError::IncompleteStack`].
pub async fn open_multi_tiff<S: FileSource + 'static>(
    source: S,
    files: Vec<(String, Vec<Selection>)>,
    options: &OpenOptions,
    cancel: &CancellationToken,
) -> Result<Pyramid, SourceError> {
    let planes = stack_planes(&files)?;
    let sizes = stack_bounds(&planes)?;

    let opener: Arc<dyn FileOpener> = Arc::new(CachedFileSource::new(source, options.clone()));
    let indexer = Arc::new(TiffIndexer::new(
        Layout::Stack { planes },
        None,
        Some(opener),
        Arc::clone(&options.decoders),
    ));

    let base = indexer.image(PlaneCoord::default(), 0, cancel).await?;
    let mut names = vec!["t", "c", "z", "y", "x"];
    let mut shape = vec![sizes.t, sizes.c, sizes.z, base.height, base.width];
    if base.samples_per_pixel > 1 {
        names.push(INTERLEAVE_LABEL);
        shape.push(base.samples_per_pixel as u32);
    }
    let labels = Labels::new(names)?;
    let meta = base.photometric.map(|p| PixelSourceMeta {
        photometric_interpretation: Some(p),
        ..Default::default()
    });

    info!(
        files = files.len(),
        t = sizes.t,
        c = sizes.c,
        z = sizes.z,
        "opened TIFF stack"
    );
    let levels = build_levels(indexer, &base, labels, shape, meta, cancel).await?;
    Pyramid::new(levels, None)
}

// =============================================================================
// Helpers
// =============================================================================

/// Map every declared selection to its file and IFD.
pub(crate) fn stack_planes(
    files: &[(String, Vec<Selection>)],
) -> Result<BTreeMap<PlaneCoord, PlaneRef>, SourceError> {
    let labels = Labels::tczyx();
    let mut planes = BTreeMap::new();
    for (name, selections) in files {
        for (ifd, selection) in selections.iter().enumerate() {
            let indices = labels.resolve(selection)?;
            let coord = PlaneCoord::from_indices(&labels, &indices);
            let plane = PlaneRef {
                file_name: Some(name.clone()),
                ifd: ifd as u32,
            };
            if let Some(previous) = planes.insert(coord, plane) {
                return Err(SourceError::InvalidSelection(format!(
                    "plane {} declared by both {:?} and {:?}",
                    coord,
                    previous.file_name.unwrap_or_default(),
                    name
                )));
            }
        }
    }
    Ok(planes)
}

/// Bounding box of a stack; fails on the first hole, scanning t, then c,
/// then z.
pub(crate) fn stack_bounds(planes: &BTreeMap<PlaneCoord, PlaneRef>) -> Result<PlaneSizes, SourceError> {
    if planes.is_empty() {
        return Err(SourceError::MalformedMetadata("stack declares no planes".to_string()));
    }
    let sizes = planes.keys().fold(PlaneSizes::new(0, 0, 0), |acc, c| {
        PlaneSizes::new(acc.t.max(c.t + 1), acc.c.max(c.c + 1), acc.z.max(c.z + 1))
    });
    if let Some(missing) = sizes.iter().find(|coord| !planes.contains_key(coord)) {
        return Err(SourceError::IncompleteStack {
            t: missing.t,
            c: missing.c,
            z: missing.z,
        });
    }
    Ok(sizes)
}

async fn looks_like_tiff(
    reader: &dyn RangeReader,
    cancel: &CancellationToken,
) -> Result<bool, SourceError> {
    if reader.size() < 4 {
        return Ok(false);
    }
    let magic = cancellable(cancel, reader.read_exact_at(0, 4)).await?;
    Ok(matches!(&magic[..], b"II\x2a\x00" | b"MM\x00\x2a" | b"II\x2b\x00" | b"MM\x00\x2b"))
}

/// Parse the OME-XML held in the first IFD's `ImageDescription`.
async fn embedded_manifest(
    file: &TiffFile,
    image_index: usize,
    cancel: &CancellationToken,
) -> Result<ImageManifest, SourceError> {
    let description = file.description(0, cancel).await?.ok_or_else(|| {
        SourceError::MalformedMetadata(format!(
            "{} has no ImageDescription to read OME-XML from",
            file.identifier()
        ))
    })?;
    Ok(parse_ome_xml(&description)?.into_image(image_index)?)
}

/// Check the manifest against the first stored plane and build the levels.
async fn manifest_pyramid(
    indexer: Arc<TiffIndexer>,
    manifest: ImageManifest,
    cancel: &CancellationToken,
) -> Result<Pyramid, SourceError> {
    let base = indexer.image(indexer.first_plane(), 0, cancel).await?;

    for (axis, expected, actual) in [
        ("x", manifest.size_x, base.width),
        ("y", manifest.size_y, base.height),
    ] {
        if expected != actual {
            return Err(SourceError::DimensionMismatch {
                axis: axis.to_string(),
                expected: expected as u64,
                actual: actual as u64,
            });
        }
    }
    if let Ok(declared) = manifest.dtype() {
        if declared != base.dtype {
            warn!(%declared, stored = %base.dtype, "manifest pixel type differs from stored samples");
        }
    }

    let interleaved = manifest.interleaved || base.samples_per_pixel > 1;
    let labels = Labels::from_order(manifest.dimension_order, interleaved);
    let shape: Vec<u32> = labels
        .iter()
        .map(|label| match label {
            INTERLEAVE_LABEL => base.samples_per_pixel.max(1) as u32,
            other => manifest.size_of(other).unwrap_or(1),
        })
        .collect();
    let meta = Some(PixelSourceMeta {
        physical_sizes: manifest.physical_sizes.clone(),
        photometric_interpretation: base.photometric,
        channels: manifest.channels.clone(),
    });

    info!(
        order = %manifest.dimension_order,
        shape = ?shape,
        layout = indexer.layout().kind(),
        "opened TIFF pyramid"
    );
    let levels = build_levels(indexer, &base, labels, shape, meta, cancel).await?;
    Pyramid::new(levels, Some(manifest))
}

async fn build_levels(
    indexer: Arc<TiffIndexer>,
    base: &TiffImage,
    labels: Labels,
    shape: Vec<u32>,
    meta: Option<PixelSourceMeta>,
    cancel: &CancellationToken,
) -> Result<Vec<Arc<dyn PixelSource>>, SourceError> {
    let level_count = indexer.level_count(cancel).await?;
    let tile_size = base.tile_size();
    Ok((0..level_count)
        .map(|level| {
            Arc::new(TiffPixelSource::new(
                Arc::clone(&indexer),
                level,
                labels.clone(),
                shape_at_level(&labels, &shape, level),
                base.dtype,
                tile_size,
                meta.clone(),
            )) as Arc<dyn PixelSource>
        })
        .collect())
}
