//! Error taxonomy for the storage engine.
//!
//! Mirrors the four classes the on-disk format distinguishes: I/O failures against
//! the backing store, structural corruption detected at open, precondition
//! violations by the caller, and (not an error at all) a missing key, which is
//! reported as `None`/`false` by the relevant calls rather than through this type.

use std::path::PathBuf;

/// Errors produced by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A file open/stat/seek/write/map/remap/unmap/close call failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A subfile's header signature did not match what this format expects.
    #[error("corrupt {which} file at {path}: expected signature {expected:#010x}, found {found:#010x}")]
    Corruption {
        which: &'static str,
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    /// The caller violated a precondition: mutated a read-only map, or used a closed one.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
