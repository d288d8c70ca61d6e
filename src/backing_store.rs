//! File-backed, mutable, shared byte region with explicit lifecycle and
//! best-effort in-place growth.
//!
//! Resizing may relocate the mapping; every reference handed out by
//! [`BackingStore::as_slice`]/[`BackingStore::as_mut_slice`] must be considered
//! invalidated by the next call that may resize. The type is not `Sync`-safe for
//! concurrent access across threads; serializing callers is their job.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use crate::error::{Result, StoreError};

enum Mapping {
    Write(MmapMut),
    Read(Mmap),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::Write(m) => &m[..],
            Mapping::Read(m) => &m[..],
        }
    }
}

pub struct BackingStore {
    file: File,
    mapping: Mapping,
    path: PathBuf,
    read_only: bool,
    closed: bool,
}

impl BackingStore {
    /// Create or open `path`. When `read_only` is false and the file is shorter
    /// than `initial_length`, it is extended first so the whole range exists.
    /// `initial_length` is floored at 1 byte: an mmap of an empty file is not
    /// portable, and every caller in this crate always has a non-empty header.
    pub fn open(path: &Path, read_only: bool, initial_length: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        if !read_only {
            let current_len = file.metadata().map_err(|e| StoreError::io(path, e))?.len();
            let target_len = initial_length.max(1) as u64;
            if current_len < target_len {
                file.set_len(target_len).map_err(|e| StoreError::io(path, e))?;
            }
        }

        let mapping = Self::map(&file, read_only, path)?;

        Ok(BackingStore {
            file,
            mapping,
            path: path.to_path_buf(),
            read_only,
            closed: false,
        })
    }

    fn map(file: &File, read_only: bool, path: &Path) -> Result<Mapping> {
        if read_only {
            let mmap = unsafe { Mmap::map(file).map_err(|e| StoreError::io(path, e))? };
            Ok(Mapping::Read(mmap))
        } else {
            let mmap = unsafe { MmapMut::map_mut(file).map_err(|e| StoreError::io(path, e))? };
            Ok(Mapping::Write(mmap))
        }
    }

    pub fn length(&self) -> usize {
        self.mapping.as_slice().len()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match &mut self.mapping {
            Mapping::Write(m) => Ok(&mut m[..]),
            Mapping::Read(_) => Err(StoreError::Precondition("store is opened read-only")),
        }
    }

    /// Grow or shrink the backing file and remap. The remap may land at a new
    /// address; nothing borrowed from `as_slice`/`as_mut_slice` before this call
    /// remains valid.
    pub fn resize(&mut self, new_length: usize) -> Result<()> {
        if self.read_only {
            return Err(StoreError::Precondition("cannot resize a read-only store"));
        }
        let new_length = new_length.max(1) as u64;
        self.file
            .set_len(new_length)
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.mapping = Self::map(&self.file, self.read_only, &self.path)?;
        Ok(())
    }

    /// Unmap and close. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Mapping::Write(m) = &self.mapping {
            m.flush().map_err(|e| StoreError::io(&self.path, e))?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.close()
        {
            log::warn!("force-closing backing store at {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_persists_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let mut store = BackingStore::open(&path, false, 16).unwrap();
        assert_eq!(store.length(), 16);
        store.as_mut_slice().unwrap()[0] = 0xab;
        store.resize(64).unwrap();
        assert_eq!(store.length(), 64);
        assert_eq!(store.as_slice()[0], 0xab);
        store.close().unwrap();
    }

    #[test]
    fn reopen_sees_prior_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        {
            let mut store = BackingStore::open(&path, false, 32).unwrap();
            store.as_mut_slice().unwrap()[4] = 7;
            store.close().unwrap();
        }
        let store = BackingStore::open(&path, false, 32).unwrap();
        assert_eq!(store.as_slice()[4], 7);
    }

    #[test]
    fn read_only_rejects_mutation_and_resize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        BackingStore::open(&path, false, 16).unwrap().close().unwrap();
        let mut store = BackingStore::open(&path, true, 0).unwrap();
        assert!(store.as_mut_slice().is_err());
        assert!(store.resize(32).is_err());
    }
}
