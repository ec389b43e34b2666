use thiserror::Error;

/// I/O errors that can occur when reading from local or remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Error from the local filesystem
    #[error("Local I/O error on {path}: {message}")]
    Local { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// IFD index past the end of the directory chain
    #[error("IFD index {index} out of range: file has {count} directories")]
    IfdIndexOutOfRange { index: usize, count: usize },

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors from a chunk store backend
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No item is stored under this key
    #[error("Key not found in store: {0}")]
    NotFound(String),

    /// Backend I/O failure
    #[error("Store I/O error: {0}")]
    Io(#[from] IoError),

    /// A JSON sidecar could not be parsed
    #[error("Invalid JSON in {key}: {message}")]
    InvalidJson { key: String, message: String },
}

/// Errors raised while reading an OME-XML or JSON manifest
#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    /// The XML document is not well formed
    #[error("XML error: {0}")]
    Xml(String),

    /// The JSON document could not be decoded
    #[error("JSON error: {0}")]
    Json(String),

    /// A required element or attribute is absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// An attribute holds a value that cannot be interpreted
    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },

    /// Dimension order is not a permutation of XYZCT starting with XY
    #[error("Unsupported dimension order: {0}")]
    UnsupportedDimensionOrder(String),

    /// The document declares no images
    #[error("Manifest contains no images")]
    NoImages,

    /// The requested image series does not exist
    #[error("Image index {index} out of range: manifest has {count} images")]
    ImageIndexOutOfRange { index: usize, count: usize },
}

/// Errors from block decoders
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Deflate/zlib/gzip stream is corrupt
    #[error("Deflate error: {0}")]
    Deflate(String),

    /// LZW stream is corrupt
    #[error("LZW error: {0}")]
    Lzw(String),

    /// Decoded block is smaller than the geometry requires
    #[error("Decoded block too short: expected {expected} bytes, got {actual}")]
    ShortBlock { expected: usize, actual: usize },
}

/// Why a tile window was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileBoundsReason {
    /// The window has zero width or height
    ZeroSized,
    /// The window extends past the level's extent
    OutOfBounds,
}

/// A tile request whose pixel window is empty or outside the level.
///
/// Expected during normal edge-tile probing; callers treat it as
/// "no data for this tile".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Tile ({x}, {y}) has no data: {reason:?}")]
pub struct TileBoundsError {
    pub x: u32,
    pub y: u32,
    pub reason: TileBoundsReason,
}

/// Errors surfaced by pixel sources and pyramid loaders
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The caller's cancellation token fired before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Tile window is zero-sized or out of range
    #[error(transparent)]
    TileBounds(#[from] TileBoundsError),

    /// Selection names a dimension that is not in the labels
    #[error("Unknown dimension {name:?}; labels are {labels:?}")]
    UnknownDimension { name: String, labels: Vec<String> },

    /// Selection is structurally invalid (wrong length, index past extent)
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Requested resolution level does not exist
    #[error("Resolution level {level} out of range: pyramid has {count} levels")]
    LevelOutOfRange { level: usize, count: usize },

    /// Metadata is missing required fields or is internally inconsistent
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// Manifest axis size disagrees with the chunk store shape
    #[error("Dimension mismatch on axis {axis:?}: manifest declares {expected}, store has {actual}")]
    DimensionMismatch {
        axis: String,
        expected: u64,
        actual: u64,
    },

    /// An ad-hoc stack lacks a plane inside its bounding box
    #[error("Incomplete stack: no file supplies plane t={t}, c={c}, z={z}")]
    IncompleteStack { t: u32, c: u32, z: u32 },

    /// A multi-file manifest has no entry for the requested plane
    #[error("No file/IFD recorded for plane t={t}, c={c}, z={z}")]
    MissingPlane { t: u32, c: u32, z: u32 },

    /// Pixel type cannot be represented
    #[error("Unsupported data type: {0}")]
    UnsupportedDtype(String),

    /// No decoder is registered for the block compression
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Tiff(#[from] TiffError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    /// A spawned fetch or compute task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),
}

impl SourceError {
    /// True when the request was superseded rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }

    /// True for the recoverable "no data for this tile" kind.
    pub fn is_tile_bounds(&self) -> bool {
        matches!(self, SourceError::TileBounds(_))
    }
}

/// Errors from the channel statistics engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// Statistics are undefined for an empty buffer
    #[error("Cannot compute statistics of an empty buffer")]
    Empty,
}
