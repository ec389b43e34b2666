//! Opening Zarr multiscale pyramids (OME-NGFF and bioformats2raw).

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dims::{Labels, INTERLEAVE_LABEL};
use crate::error::SourceError;
use crate::io::{cancellable, join_key};
use crate::manifest::{parse_ome_xml, ImageManifest};
use crate::options::OpenOptions;
use crate::pixel::{PhysicalSize, PixelSource, PixelSourceMeta, Pyramid};

use super::metadata::{ArrayMetadata, Axis, GroupAttributes, Multiscale};
use super::source::ZarrPixelSource;
use super::store::{get_json, ChunkStore};

/// Key of the OME-XML written by bioformats2raw.
pub const BIOFORMATS2RAW_METADATA_KEY: &str = "OME/METADATA.ome.xml";

/// Open the multiscale image at the root of `store`.
///
/// bioformats2raw stores hold one series per numbered group; the series is
/// picked by [`OpenOptions::image_index`] and its sizes are checked against
/// `OME/METADATA.ome.xml`.
pub async fn open_zarr(
    store: Arc<dyn ChunkStore>,
    options: &OpenOptions,
    cancel: &CancellationToken,
) -> Result<Pyramid, SourceError> {
    let root: GroupAttributes = cancellable(cancel, get_json(store.as_ref(), ".zattrs"))
        .await?
        .unwrap_or_default();

    let (prefix, attrs, manifest) = if root.bioformats2raw_layout.is_some() {
        let manifest = read_manifest(store.as_ref(), options.image_index, cancel).await?;
        let prefix = options.image_index.to_string();
        let attrs = cancellable(cancel, get_json(store.as_ref(), &join_key(&prefix, ".zattrs")))
            .await?
            .ok_or_else(|| {
                SourceError::MalformedMetadata(format!("bioformats2raw series {} is missing", prefix))
            })?;
        (prefix, attrs, manifest)
    } else {
        (String::new(), root, None)
    };

    let (paths, multiscale) = match attrs.multiscales.first() {
        Some(multiscale) => (
            multiscale
                .datasets
                .iter()
                .map(|d| join_key(&prefix, &d.path))
                .collect::<Vec<_>>(),
            Some(multiscale),
        ),
        None => {
            warn!(store = store.identifier(), "no multiscales metadata, reading a single array");
            (vec![prefix.clone()], None)
        }
    };
    if paths.is_empty() {
        return Err(SourceError::MalformedMetadata("multiscales lists no datasets".to_string()));
    }

    let mut arrays = Vec::with_capacity(paths.len());
    for path in &paths {
        let key = join_key(path, ".zarray");
        let metadata: ArrayMetadata = cancellable(cancel, get_json(store.as_ref(), &key))
            .await?
            .ok_or_else(|| SourceError::MalformedMetadata(format!("{} not found", key)))?;
        arrays.push(metadata);
    }

    let axes = multiscale.and_then(|m| m.axes.as_deref());
    let labels = derive_labels(axes, &arrays[0].shape, manifest.as_ref())?;
    if let Some(manifest) = &manifest {
        check_manifest(&labels, &arrays[0].shape, manifest)?;
    }

    let meta = pixel_meta(&labels, multiscale, attrs.omero.as_ref(), manifest.as_ref());
    let levels = paths
        .iter()
        .zip(&arrays)
        .map(|(path, metadata)| {
            ZarrPixelSource::new(
                Arc::clone(&store),
                path.clone(),
                metadata,
                labels.clone(),
                &options.decoders,
                Some(meta.clone()),
            )
            .map(|source| Arc::new(source) as Arc<dyn PixelSource>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        store = store.identifier(),
        levels = levels.len(),
        labels = %labels,
        shape = ?arrays[0].shape,
        "opened Zarr pyramid"
    );
    Pyramid::new(levels, manifest)
}

async fn read_manifest(
    store: &dyn ChunkStore,
    image_index: usize,
    cancel: &CancellationToken,
) -> Result<Option<ImageManifest>, SourceError> {
    if !cancellable(cancel, store.contains_item(BIOFORMATS2RAW_METADATA_KEY)).await? {
        debug!("bioformats2raw store without OME-XML");
        return Ok(None);
    }
    let bytes = cancellable(cancel, store.get_item(BIOFORMATS2RAW_METADATA_KEY)).await?;
    let xml = String::from_utf8_lossy(&bytes);
    Ok(Some(parse_ome_xml(&xml)?.into_image(image_index)?))
}

/// Labels of a store: its axes, else the manifest's order, else the
/// trailing entries of `t, c, z, y, x`.
///
/// A trailing extent of 3 or 4 beyond the named axes is an interleave axis.
pub fn derive_labels(
    axes: Option<&[Axis]>,
    shape: &[u64],
    manifest: Option<&ImageManifest>,
) -> Result<Labels, SourceError> {
    let interleaved_tail = |named: usize| shape.len() == named + 1 && matches!(shape.last(), Some(3 | 4));

    if let Some(axes) = axes {
        let mut names: Vec<String> = axes.iter().map(|a| a.name().to_string()).collect();
        if interleaved_tail(names.len()) {
            names.push(INTERLEAVE_LABEL.to_string());
        }
        return Labels::new(names);
    }

    let tczyx = Labels::tczyx();
    if let Some(manifest) = manifest {
        if shape == tczyx_shape(manifest).as_slice() {
            return Ok(tczyx);
        }
        let labels = Labels::from_order(manifest.dimension_order, interleaved_tail(5));
        if labels.len() == shape.len() {
            return Ok(labels);
        }
    }

    match shape.len() {
        n if n <= 5 => Labels::new(tczyx.as_slice()[5 - n..].iter().cloned()),
        6 if interleaved_tail(5) => Labels::new(tczyx.iter().chain([INTERLEAVE_LABEL])),
        n => Err(SourceError::MalformedMetadata(format!(
            "cannot name the {} axes of shape {:?}",
            n, shape
        ))),
    }
}

fn tczyx_shape(manifest: &ImageManifest) -> Vec<u64> {
    [
        manifest.size_t,
        manifest.size_c,
        manifest.size_z,
        manifest.size_y,
        manifest.size_x,
    ]
    .map(u64::from)
    .to_vec()
}

/// Every axis the manifest knows must match the store, unless the store
/// is already laid out as `t, c, z, y, x` with the manifest's sizes.
pub fn check_manifest(
    labels: &Labels,
    shape: &[u64],
    manifest: &ImageManifest,
) -> Result<(), SourceError> {
    if shape == tczyx_shape(manifest).as_slice() {
        return Ok(());
    }
    for (label, &actual) in labels.iter().zip(shape) {
        if label == INTERLEAVE_LABEL {
            continue;
        }
        if let Some(expected) = manifest.size_of(label) {
            if expected as u64 != actual {
                return Err(SourceError::DimensionMismatch {
                    axis: label.to_string(),
                    expected: expected as u64,
                    actual,
                });
            }
        }
    }
    Ok(())
}

fn pixel_meta(
    labels: &Labels,
    multiscale: Option<&Multiscale>,
    omero: Option<&super::metadata::Omero>,
    manifest: Option<&ImageManifest>,
) -> PixelSourceMeta {
    let mut physical_sizes = BTreeMap::new();
    if let Some(manifest) = manifest {
        physical_sizes = manifest.physical_sizes.clone();
    } else if let Some(multiscale) = multiscale {
        let scale = multiscale.datasets.first().and_then(|d| d.scale());
        if let (Some(axes), Some(scale)) = (&multiscale.axes, scale) {
            for axis in ["z", "y", "x"] {
                let Some(pos) = labels.position(axis) else {
                    continue;
                };
                if let (Some(unit), Some(&size)) =
                    (axes.get(pos).and_then(Axis::unit), scale.get(pos))
                {
                    physical_sizes.insert(
                        axis.to_string(),
                        PhysicalSize {
                            size,
                            unit: unit.to_string(),
                        },
                    );
                }
            }
        }
    }

    let channels = match (omero, manifest) {
        (Some(omero), _) if !omero.channels.is_empty() => omero.channel_infos(),
        (_, Some(manifest)) => manifest.channels.clone(),
        _ => Vec::new(),
    };

    PixelSourceMeta {
        physical_sizes,
        photometric_interpretation: None,
        channels,
    }
}
