//! Command-line configuration for the `multiscale-pixels` binary.
//!
//! Every option can also be set through an environment variable with the
//! `MSP_` prefix:
//!
//! - `MSP_FORMAT` - Image layout (default: detected from the path)
//! - `MSP_S3_BUCKET` - Read from this bucket instead of the local filesystem
//! - `MSP_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `MSP_S3_REGION` - AWS region (default: us-east-1)
//! - `MSP_BLOCK_SIZE` - Block size of the per-file cache (default: 256KB)
//! - `MSP_CACHE_BLOCKS` - Blocks cached per file (default: 100)
//! - `MSP_IMAGE_INDEX` - Image (series) to open (default: 0)
//! - `MSP_OFFSETS` - JSON file with one byte offset per IFD

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::dims::Selection;
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};

// =============================================================================
// Default Values
// =============================================================================

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

// =============================================================================
// CLI Arguments
// =============================================================================

/// multiscale-pixels - Inspect and read multi-resolution microscopy images.
///
/// Opens OME-TIFF, companion OME-XML, TIFF stacks and Zarr stores from local
/// disk or S3, fetching only the bytes each request needs.
#[derive(Parser, Debug, Clone)]
#[command(name = "multiscale-pixels")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the manifest and the shape of every level as JSON.
    Info(InfoConfig),

    /// Read one tile and optionally write it as PNG.
    Tile(TileConfig),

    /// Print per-channel statistics of the lowest resolution level as JSON.
    RasterStats(StatsConfig),
}

/// Image layout on disk.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Guess from the path
    Auto,
    /// Single OME-TIFF (SubIFD or legacy pyramid)
    Tiff,
    /// Companion OME-XML or a TIFF whose OME-XML references other files
    Companion,
    /// Stack of single-channel TIFFs, one file per channel
    Stack,
    /// Zarr v2 multiscale store
    Zarr,
}

/// Where to find the image and how to open it.
#[derive(Args, Debug, Clone)]
pub struct OpenConfig {
    /// Path (or S3 key) of the image. For stacks, a comma-separated list of
    /// files, one per channel.
    pub path: String,

    /// Image layout.
    #[arg(long, value_enum, default_value_t = SourceFormat::Auto, env = "MSP_FORMAT")]
    pub format: SourceFormat,

    /// S3 bucket to read from. When unset, `path` is a local path.
    #[arg(long, env = "MSP_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "MSP_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "MSP_S3_REGION")]
    pub s3_region: String,

    /// Block size in bytes for the per-file block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "MSP_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks to cache per file.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "MSP_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Image (series) to open in multi-image files.
    #[arg(long, default_value_t = 0, env = "MSP_IMAGE_INDEX")]
    pub image_index: usize,

    /// JSON file holding one byte offset per IFD.
    #[arg(long, env = "MSP_OFFSETS")]
    pub offsets: Option<PathBuf>,
}

impl OpenConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("An image path is required".to_string());
        }
        if matches!(self.s3_bucket.as_deref(), Some("")) {
            return Err("S3 bucket name must not be empty".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        Ok(())
    }

    /// The layout to open, resolving [`SourceFormat::Auto`] from the path.
    pub fn resolved_format(&self) -> SourceFormat {
        if self.format != SourceFormat::Auto {
            return self.format;
        }
        let path = self.path.trim_end_matches('/').to_lowercase();
        if path.contains(',') {
            SourceFormat::Stack
        } else if path.ends_with(".zarr") {
            SourceFormat::Zarr
        } else if path.ends_with(".companion.ome") || path.ends_with(".xml") {
            SourceFormat::Companion
        } else {
            SourceFormat::Tiff
        }
    }

    /// Files of a stack, in channel order.
    pub fn stack_files(&self) -> Vec<String> {
        self.path
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    #[command(flatten)]
    pub open: OpenConfig,
}

#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    #[command(flatten)]
    pub open: OpenConfig,

    /// Resolution level (0 = full resolution).
    #[arg(long, default_value_t = 0)]
    pub level: usize,

    /// Tile column.
    #[arg(short)]
    pub x: u32,

    /// Tile row.
    #[arg(short)]
    pub y: u32,

    /// Plane selection as `name=index` pairs, e.g. `c=1,z=4`.
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Write the tile as PNG to this path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl TileConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.open.validate()?;
        parse_selection(&self.select).map(|_| ())
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatsConfig {
    #[command(flatten)]
    pub open: OpenConfig,

    /// Selection of the non-channel axes, e.g. `t=0,z=3`.
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Channels to summarise (default: all).
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<u32>>,
}

impl StatsConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.open.validate()?;
        parse_selection(&self.select).map(|_| ())
    }
}

/// Parse `name=index` pairs into a [`Selection`].
pub fn parse_selection(pairs: &[String]) -> Result<Selection, String> {
    let mut selection = Selection::new();
    for pair in pairs.iter().filter(|p| !p.is_empty()) {
        let (name, index) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid selection '{}', expected name=index", pair))?;
        let index: u32 = index
            .trim()
            .parse()
            .map_err(|_| format!("Invalid index in selection '{}'", pair))?;
        selection = selection.with(name.trim(), index);
    }
    Ok(selection)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(path: &str) -> OpenConfig {
        OpenConfig {
            path: path.to_string(),
            format: SourceFormat::Auto,
            s3_bucket: None,
            s3_endpoint: None,
            s3_region: DEFAULT_REGION.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: DEFAULT_BLOCK_CACHE_CAPACITY,
            image_index: 0,
            offsets: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config("image.ome.tif").validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        assert!(test_config("").validate().is_err());

        let mut config = test_config("a.tif");
        config.s3_bucket = Some(String::new());
        assert!(config.validate().unwrap_err().contains("bucket"));

        let mut config = test_config("a.tif");
        config.cache_blocks = 0;
        assert!(config.validate().is_err());

        let mut config = test_config("a.tif");
        config.block_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(test_config("a.ome.tiff").resolved_format(), SourceFormat::Tiff);
        assert_eq!(test_config("data/img.zarr/").resolved_format(), SourceFormat::Zarr);
        assert_eq!(test_config("x.companion.ome").resolved_format(), SourceFormat::Companion);
        assert_eq!(test_config("c0.tif,c1.tif").resolved_format(), SourceFormat::Stack);

        let mut config = test_config("a.tif");
        config.format = SourceFormat::Zarr;
        assert_eq!(config.resolved_format(), SourceFormat::Zarr);
    }

    #[test]
    fn test_stack_files() {
        let config = test_config("c0.tif, c1.tif,,c2.tif");
        assert_eq!(config.stack_files(), vec!["c0.tif", "c1.tif", "c2.tif"]);
    }

    #[test]
    fn test_parse_selection() {
        let selection = parse_selection(&["c=2".to_string(), "z= 5".to_string()]).unwrap();
        assert_eq!(selection.get("c"), 2);
        assert_eq!(selection.get("z"), 5);
        assert_eq!(selection.get("t"), 0);

        assert!(parse_selection(&["c2".to_string()]).is_err());
        assert!(parse_selection(&["c=-1".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from([
            "multiscale-pixels",
            "tile",
            "img.ome.tif",
            "-x",
            "1",
            "-y",
            "2",
            "--select",
            "c=1,z=3",
            "--verbose",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Tile(config) => {
                assert_eq!((config.x, config.y), (1, 2));
                assert_eq!(config.select, vec!["c=1", "z=3"]);
                assert!(config.validate().is_ok());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
