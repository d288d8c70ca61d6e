//! The coordinator tying a [`Directory`] and a [`BucketPool`] into a single
//! key/value map: every lookup resolves a hash through the directory first,
//! then walks the resolved bucket's record chain.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::bucket_pool::BucketPool;
use crate::directory::Directory;
use crate::error::Result;
use crate::iter::Iter;
use crate::utils::config::{DATA_FILE_SUFFIX, DIRECTORY_FILE_SUFFIX, HASH_BITS, INITIAL_PREFIX_BITS};

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(OsString::from(format!(".{suffix}")));
    PathBuf::from(name)
}

/// An on-disk, memory-mapped key/value map backed by an extendible hash index.
///
/// Not `Sync`: callers sharing a map across threads must serialize access
/// themselves, matching the single-threaded contract of [`crate::backing_store::BackingStore`].
pub struct HashMap {
    directory: Directory,
    pool: BucketPool,
}

impl HashMap {
    /// Open (or create) the map rooted at `base`; its two subfiles live at
    /// `base.dat` and `base.cat`.
    pub fn open(base: &Path, read_only: bool) -> Result<Self> {
        let pool_path = with_suffix(base, DATA_FILE_SUFFIX);
        let dir_path = with_suffix(base, DIRECTORY_FILE_SUFFIX);

        let mut pool = BucketPool::open(&pool_path, read_only)?;
        let (bucket0, bucket1) = if pool.buckets_count() == 0 {
            let b0 = pool.create_bucket(INITIAL_PREFIX_BITS)?;
            let b1 = pool.create_bucket(INITIAL_PREFIX_BITS)?;
            (b0, b1)
        } else {
            (0, 1)
        };

        let directory = Directory::open(&dir_path, read_only, &[bucket0, bucket1])?;

        Ok(HashMap { directory, pool })
    }

    /// Look up `key` under `hash`, returning its value if present.
    pub fn find(&self, hash: u32, key: &[u8]) -> Option<&[u8]> {
        let bucket_id = self.directory.find(hash);
        self.pool
            .find_record(bucket_id, hash, key)
            .map(|(off, len)| self.pool.value_at(off, len))
    }

    /// Remove `key` under `hash`. Returns whether a record was removed.
    pub fn remove(&mut self, hash: u32, key: &[u8]) -> Result<bool> {
        let bucket_id = self.directory.find(hash);
        self.pool.remove_record(bucket_id, hash, key)
    }

    /// Look up `key` under `hash`, inserting `default` if absent. If the
    /// resolved bucket is over its split threshold, splits it at most once
    /// (doubling the directory first if the bucket is already at the
    /// directory's resolution), then inserts unconditionally. Returns the
    /// stored value either way.
    pub fn get(&mut self, hash: u32, key: &[u8], default: &[u8]) -> Result<&[u8]> {
        let mut bucket_id = self.directory.find(hash);

        if let Some((off, len)) = self.pool.find_record(bucket_id, hash, key) {
            return Ok(self.pool.value_at(off, len));
        }

        if self.pool.bucket_to_split(bucket_id) {
            let bits = self.pool.prefix_bits(bucket_id);
            if bits == self.directory.prefix_bits()
                && self.pool.buckets_count() > (1usize << self.directory.prefix_bits())
            {
                self.directory.double()?;
            }

            if bits < self.directory.prefix_bits() {
                let new_bucket_id = self.pool.split(bucket_id)?;
                let bits = self.pool.prefix_bits(bucket_id);
                let new_bit = 1u32 << (HASH_BITS - bits as u32);
                self.directory.set_range(hash | new_bit, bits, new_bucket_id)?;
                if hash & new_bit != 0 {
                    bucket_id = new_bucket_id;
                }
            }
        }

        let (off, len) = self.pool.create_record(bucket_id, hash, key, default)?;
        Ok(self.pool.value_at(off, len))
    }

    /// Iterate over every stored `(key, value)` pair. No particular order is
    /// guaranteed, and the map must not be mutated while an iterator is live.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(&self.directory, &self.pool)
    }

    pub fn bytes_allocated(&self) -> usize {
        self.pool.bytes_allocated() + self.directory.bytes_allocated()
    }

    pub fn close(&mut self) -> Result<()> {
        self.pool.close()?;
        self.directory.close()
    }
}
