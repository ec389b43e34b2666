//! multiscale-pixels - inspect and read multi-resolution microscopy images.
//!
//! JSON goes to stdout, logs to stderr.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use image::{ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multiscale_pixels::{
    config::{parse_selection, Cli, Command, InfoConfig, OpenConfig, SourceFormat, StatsConfig, TileConfig},
    create_s3_client, open_companion, open_multi_tiff, open_ome_tiff, open_zarr, LocalFileSource,
    LocalRangeReader, LocalStore, OpenOptions, PixelData, PixelSource, Pyramid, S3FileSource,
    S3RangeReader, S3Store, Selection, TileOutcome, TypedBuffer,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling outstanding reads");
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Command::Info(config) => run_info(config, &cancel).await,
        Command::Tile(config) => run_tile(config, &cancel).await,
        Command::RasterStats(config) => run_stats(config, &cancel).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "multiscale_pixels=debug"
    } else {
        "multiscale_pixels=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Opening
// =============================================================================

async fn open_options(config: &OpenConfig) -> Result<OpenOptions, String> {
    let mut options = OpenOptions::new()
        .with_block_size(config.block_size)
        .with_block_cache_capacity(config.cache_blocks)
        .with_image_index(config.image_index);

    if let Some(ref path) = config.offsets {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("Failed to read offsets {}: {}", path.display(), e))?;
        let offsets: Vec<u64> = serde_json::from_slice(&bytes)
            .map_err(|e| format!("Offsets {} are not a JSON array: {}", path.display(), e))?;
        options = options.with_offsets(offsets);
    }
    Ok(options)
}

/// Split `path` into its directory and file name.
fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    }
}

async fn open_pyramid(config: &OpenConfig, cancel: &CancellationToken) -> Result<Pyramid, String> {
    config.validate()?;
    let options = open_options(config).await?;
    let format = config.resolved_format();
    info!(path = %config.path, format = ?format, bucket = ?config.s3_bucket, "opening image");

    let client = match config.s3_bucket {
        Some(_) => Some(create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await),
        None => None,
    };
    let bucket = config.s3_bucket.clone().unwrap_or_default();

    let result = match (format, client) {
        (SourceFormat::Zarr, Some(client)) => {
            let store = S3Store::new(client, bucket, config.path.trim_end_matches('/'));
            open_zarr(std::sync::Arc::new(store), &options, cancel).await
        }
        (SourceFormat::Zarr, None) => {
            let store = LocalStore::new(&config.path);
            open_zarr(std::sync::Arc::new(store), &options, cancel).await
        }
        (SourceFormat::Companion, Some(client)) => {
            let (dir, name) = split_path(&config.path);
            open_companion(S3FileSource::new(client, bucket, dir), &name, &options, cancel).await
        }
        (SourceFormat::Companion, None) => {
            let (dir, name) = split_path(&config.path);
            let root = if dir.is_empty() { ".".to_string() } else { dir };
            open_companion(LocalFileSource::new(root), &name, &options, cancel).await
        }
        (SourceFormat::Stack, client) => {
            let files: Vec<(String, Vec<Selection>)> = config
                .stack_files()
                .into_iter()
                .enumerate()
                .map(|(c, name)| (name, vec![Selection::tcz(0, c as u32, 0)]))
                .collect();
            match client {
                Some(client) => {
                    open_multi_tiff(S3FileSource::new(client, bucket, ""), files, &options, cancel)
                        .await
                }
                None => open_multi_tiff(LocalFileSource::new("."), files, &options, cancel).await,
            }
        }
        (_, Some(client)) => {
            let reader = S3RangeReader::new(client, bucket, config.path.clone())
                .await
                .map_err(|e| e.to_string())?;
            open_ome_tiff(reader, &options, cancel).await
        }
        (_, None) => {
            let reader = LocalRangeReader::open(&config.path)
                .await
                .map_err(|e| e.to_string())?;
            open_ome_tiff(reader, &options, cancel).await
        }
    };
    result.map_err(|e| format!("Failed to open {}: {}", config.path, e))
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig, cancel: &CancellationToken) -> Result<(), String> {
    let pyramid = open_pyramid(&config.open, cancel).await?;

    let levels: Vec<serde_json::Value> = pyramid
        .levels()
        .iter()
        .map(|level| {
            serde_json::json!({
                "labels": level.labels(),
                "shape": level.shape(),
                "dtype": level.dtype(),
                "tile_size": level.tile_size(),
            })
        })
        .collect();

    print_json(&serde_json::json!({
        "levels": levels,
        "meta": pyramid.base().meta(),
        "manifest": pyramid.manifest(),
    }))
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: TileConfig, cancel: &CancellationToken) -> Result<(), String> {
    config.validate()?;
    let selection = parse_selection(&config.select)?;
    let pyramid = open_pyramid(&config.open, cancel).await?;
    let source = pyramid.level(config.level).map_err(|e| e.to_string())?;

    let result = source.get_tile(config.x, config.y, &selection, cancel).await;
    let tile = match TileOutcome::from_result(result).map_err(|e| e.to_string())? {
        TileOutcome::Data(tile) => tile,
        TileOutcome::Skipped(e) => return Err(format!("No tile here: {}", e)),
        TileOutcome::Cancelled => return Err("Cancelled".to_string()),
    };

    if let Some(ref path) = config.output {
        write_png(&tile, path)?;
        info!(path = %path.display(), "wrote tile");
    }

    print_json(&serde_json::json!({
        "level": config.level,
        "x": config.x,
        "y": config.y,
        "width": tile.width,
        "height": tile.height,
        "samples_per_pixel": tile.samples_per_pixel(),
        "dtype": tile.data.dtype(),
    }))
}

/// Write 8/16-bit grayscale or 8-bit RGB(A) pixels as PNG.
fn write_png(tile: &PixelData, path: &Path) -> Result<(), String> {
    let (w, h) = (tile.width, tile.height);
    let too_small = || "Tile buffer does not match its dimensions".to_string();
    let result = match (&tile.data, tile.samples_per_pixel()) {
        (TypedBuffer::Uint8(v), 1) => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v.clone())
            .ok_or_else(too_small)?
            .save_with_format(path, ImageFormat::Png),
        (TypedBuffer::Uint8(v), 3) => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v.clone())
            .ok_or_else(too_small)?
            .save_with_format(path, ImageFormat::Png),
        (TypedBuffer::Uint8(v), 4) => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, v.clone())
            .ok_or_else(too_small)?
            .save_with_format(path, ImageFormat::Png),
        (TypedBuffer::Uint16(v), 1) => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v.clone())
            .ok_or_else(too_small)?
            .save_with_format(path, ImageFormat::Png),
        (data, spp) => {
            return Err(format!(
                "PNG output supports 8/16-bit grayscale and 8-bit RGB(A), got {} x{}",
                data.dtype(),
                spp
            ))
        }
    };
    result.map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

// =============================================================================
// Raster Stats Command
// =============================================================================

async fn run_stats(config: StatsConfig, cancel: &CancellationToken) -> Result<(), String> {
    config.validate()?;
    let base = parse_selection(&config.select)?;
    let pyramid = open_pyramid(&config.open, cancel).await?;

    let channels = match config.channels {
        Some(channels) => channels,
        None => {
            let lowest = pyramid.lowest();
            let count = lowest
                .labels()
                .position("c")
                .and_then(|i| lowest.shape().get(i).copied())
                .unwrap_or(1);
            (0..count).collect()
        }
    };
    let selections: Vec<Selection> = channels
        .iter()
        .map(|&c| base.clone().with("c", c))
        .collect();

    let stats = pyramid
        .channel_stats(&selections, cancel)
        .await
        .map_err(|e| e.to_string())?;

    let entries: Vec<serde_json::Value> = channels
        .iter()
        .zip(&stats)
        .map(|(c, s)| serde_json::json!({ "channel": c, "stats": s }))
        .collect();
    print_json(&serde_json::Value::Array(entries))
}
