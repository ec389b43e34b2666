mod block_cache;
mod cancel;
mod file_source;
mod flight;
mod local_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use cancel::{cancellable, check_cancelled};
pub use file_source::{FileSource, LocalFileSource, MemoryFileSource, S3FileSource};
pub use flight::FlightMap;
pub use local_reader::LocalRangeReader;
pub use range_reader::{read_all, MemoryRangeReader, RangeReader};
pub use s3_reader::{create_s3_client, S3RangeReader};

pub(crate) use file_source::join_key;
pub(crate) use local_reader::local_error;
pub(crate) use s3_reader::{get_object, head_object_size};
