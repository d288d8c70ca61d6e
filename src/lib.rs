//! Memory-mapped key/value store backed by an extendible hash index.
//!
//! A map is two files, `<base>.dat` and `<base>.cat`: the data file holds a
//! growable array of fixed-size buckets, each a chain of variable-length
//! records; the directory file maps hash prefixes to the bucket chain that
//! owns them. Splitting a bucket only ever touches that bucket and its
//! sibling, so growth never triggers a global rehash.

pub mod backing_store;
pub mod bucket_pool;
pub mod directory;
pub mod error;
pub mod hash_map;
pub mod iter;
pub mod utils;
pub mod vbe;

pub use error::{Result, StoreError};
pub use hash_map::HashMap;
pub use iter::Iter;
