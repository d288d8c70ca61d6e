//! On-disk format constants and tuning knobs, gathered in one place rather
//! than scattered as magic numbers through the bucket pool and directory.

use std::mem::size_of;

/// Bits in the hash used throughout the format.
pub const HASH_BITS: u32 = 32;

/// Bucket (partition) payload size: 4 KiB minus the three `usize` header fields,
/// so a whole bucket record fits one memory page.
pub const BUCKET_SIZE: usize = 4096 - 3 * size_of::<usize>();

/// `prefix_bits` the two buckets a fresh map starts with are given.
pub const INITIAL_PREFIX_BITS: usize = 1;

/// Growth factor applied to the data file when the bucket array needs more room.
pub const POOL_GROWTH_NUMERATOR: usize = 11;
pub const POOL_GROWTH_DENOMINATOR: usize = 10;

/// Split heuristic: a two-bucket chain splits once the first two buckets
/// together exceed this fraction of [`BUCKET_SIZE`].
pub const SPLIT_LOAD_FACTOR_NUMERATOR: usize = 3;
pub const SPLIT_LOAD_FACTOR_DENOMINATOR: usize = 2;

/// First four bytes of the data file.
pub const DATA_SIGNATURE: u32 = 0x69d3db7a;
/// First four bytes of the directory file.
pub const DIRECTORY_SIGNATURE: u32 = 0x99fa7e8e;

/// Suffixes appended to a map's base path to name its two subfiles.
pub const DATA_FILE_SUFFIX: &str = "dat";
pub const DIRECTORY_FILE_SUFFIX: &str = "cat";

/// Sentinel for "no bucket" / "no free list".
pub const INVALID_BUCKET_ID: usize = usize::MAX;
