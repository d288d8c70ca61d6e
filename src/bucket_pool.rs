//! The data file: a growable array of fixed-size buckets (partitions), each
//! holding a chain of variable-length records plus an overflow link.
//!
//! Layout, all native-endian, no padding:
//! ```text
//! header:  signature: u32, buckets_count: usize, first_free_bucket_id: usize
//! bucket:  prefix_bits: usize, bytes_used: usize, next_bucket_id: usize, data: [u8; BUCKET_SIZE]
//! ```
//! A record within `data` is `hash: u32, key_len: vbe, value_len: vbe, key: [u8], value: [u8]`.

use std::mem::size_of;
use std::path::Path;

use crate::backing_store::BackingStore;
use crate::error::{Result, StoreError};
use crate::utils::config::{
    BUCKET_SIZE, DATA_SIGNATURE, HASH_BITS, INVALID_BUCKET_ID, POOL_GROWTH_DENOMINATOR,
    POOL_GROWTH_NUMERATOR, SPLIT_LOAD_FACTOR_DENOMINATOR, SPLIT_LOAD_FACTOR_NUMERATOR,
};
use crate::vbe;

const USIZE: usize = size_of::<usize>();
const HEADER_SIZE: usize = 4 + 2 * USIZE;
const BUCKET_HEADER_SIZE: usize = 3 * USIZE;
const BUCKET_RECORD_SIZE: usize = BUCKET_HEADER_SIZE + BUCKET_SIZE;

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_ne_bytes());
}

fn read_usize(buf: &[u8], off: usize) -> usize {
    usize::from_ne_bytes(buf[off..off + USIZE].try_into().unwrap())
}

fn write_usize(buf: &mut [u8], off: usize, v: usize) {
    buf[off..off + USIZE].copy_from_slice(&v.to_ne_bytes());
}

/// A bucket's record chain, addressed by a stable id that survives resizes.
pub struct BucketPool {
    store: BackingStore,
}

impl BucketPool {
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let mut store = BackingStore::open(path, read_only, HEADER_SIZE)?;

        let signature = read_u32(store.as_slice(), 0);
        if signature == 0 {
            if read_only {
                return Err(StoreError::Precondition(
                    "data file does not exist and store is read-only",
                ));
            }
            let buf = store.as_mut_slice()?;
            write_u32(buf, 0, DATA_SIGNATURE);
            write_usize(buf, 4, 0);
            write_usize(buf, 4 + USIZE, INVALID_BUCKET_ID);
        } else if signature != DATA_SIGNATURE {
            return Err(StoreError::Corruption {
                which: "data",
                path: path.to_path_buf(),
                expected: DATA_SIGNATURE,
                found: signature,
            });
        }

        Ok(BucketPool { store })
    }

    pub fn buckets_count(&self) -> usize {
        read_usize(self.store.as_slice(), 4)
    }

    fn set_buckets_count(&mut self, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, 4, v);
        Ok(())
    }

    fn first_free_bucket_id(&self) -> usize {
        read_usize(self.store.as_slice(), 4 + USIZE)
    }

    fn set_first_free_bucket_id(&mut self, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, 4 + USIZE, v);
        Ok(())
    }

    fn bucket_offset(id: usize) -> usize {
        HEADER_SIZE + id * BUCKET_RECORD_SIZE
    }

    fn data_offset(id: usize) -> usize {
        Self::bucket_offset(id) + BUCKET_HEADER_SIZE
    }

    pub fn prefix_bits(&self, id: usize) -> usize {
        read_usize(self.store.as_slice(), Self::bucket_offset(id))
    }

    fn set_prefix_bits(&mut self, id: usize, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, Self::bucket_offset(id), v);
        Ok(())
    }

    pub fn bytes_used(&self, id: usize) -> usize {
        read_usize(self.store.as_slice(), Self::bucket_offset(id) + USIZE)
    }

    fn set_bytes_used(&mut self, id: usize, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, Self::bucket_offset(id) + USIZE, v);
        Ok(())
    }

    pub fn next_bucket(&self, id: usize) -> usize {
        read_usize(self.store.as_slice(), Self::bucket_offset(id) + 2 * USIZE)
    }

    fn set_next_bucket(&mut self, id: usize, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, Self::bucket_offset(id) + 2 * USIZE, v);
        Ok(())
    }

    pub fn bytes_allocated(&self) -> usize {
        self.store.length()
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }

    /// Allocate a bucket, reusing a freed one if the free list is non-empty.
    pub fn create_bucket(&mut self, prefix_bits: usize) -> Result<usize> {
        let id = if self.first_free_bucket_id() == INVALID_BUCKET_ID {
            let buckets_count = self.buckets_count();
            let bytes_needed = HEADER_SIZE + (buckets_count + 1) * BUCKET_RECORD_SIZE;
            if bytes_needed > self.store.length() {
                self.store.resize(bytes_needed * POOL_GROWTH_NUMERATOR / POOL_GROWTH_DENOMINATOR)?;
            }
            self.set_buckets_count(buckets_count + 1)?;
            buckets_count
        } else {
            let id = self.first_free_bucket_id();
            let next = self.next_bucket(id);
            self.set_first_free_bucket_id(next)?;
            id
        };

        self.set_prefix_bits(id, prefix_bits)?;
        self.set_bytes_used(id, 0)?;
        self.set_next_bucket(id, INVALID_BUCKET_ID)?;
        Ok(id)
    }

    /// Parse the record starting at absolute byte offset `abs`, returning
    /// `(hash, key_len, value_len, header_len)`.
    fn parse_record_at(&self, abs: usize) -> (u32, usize, usize, usize) {
        let buf = self.store.as_slice();
        let hash = read_u32(buf, abs);
        let (key_len, n1) = vbe::read(&buf[abs + 4..]);
        let (value_len, n2) = vbe::read(&buf[abs + 4 + n1..]);
        (hash, key_len as usize, value_len as usize, 4 + n1 + n2)
    }

    /// Walk a bucket chain looking for `key` under `hash`. Returns the absolute
    /// byte ranges of the matching key and value on success.
    pub fn find_record(
        &self,
        mut bucket_id: usize,
        hash: u32,
        key: &[u8],
    ) -> Option<(usize, usize)> {
        let buf = self.store.as_slice();
        while bucket_id != INVALID_BUCKET_ID {
            let data_start = Self::data_offset(bucket_id);
            let bytes_used = self.bytes_used(bucket_id);
            let mut cursor = 0usize;
            while cursor < bytes_used {
                let abs = data_start + cursor;
                let (record_hash, key_len, value_len, header_len) = self.parse_record_at(abs);
                let key_start = abs + header_len;
                let record_len = header_len + key_len + value_len;
                if record_hash == hash
                    && key_len == key.len()
                    && &buf[key_start..key_start + key_len] == key
                {
                    let value_start = key_start + key_len;
                    return Some((value_start, value_len));
                }
                cursor += record_len;
            }
            bucket_id = self.next_bucket(bucket_id);
        }
        None
    }

    /// Append `key`/`value` to the chain starting at `bucket_id`, allocating an
    /// overflow bucket if every existing one is full. Returns the absolute byte
    /// range of the stored value.
    pub fn create_record(
        &mut self,
        bucket_id: usize,
        hash: u32,
        key: &[u8],
        value: &[u8],
    ) -> Result<(usize, usize)> {
        let bytes_required =
            4 + vbe::length(key.len() as u64) + key.len() + vbe::length(value.len() as u64) + value.len();

        let mut target = bucket_id;
        loop {
            if self.bytes_used(target) + bytes_required <= BUCKET_SIZE {
                break;
            }
            let next = self.next_bucket(target);
            target = if next != INVALID_BUCKET_ID {
                next
            } else {
                let new_id = self.create_bucket(self.prefix_bits(bucket_id))?;
                self.set_next_bucket(target, new_id)?;
                new_id
            };
        }

        let bytes_used = self.bytes_used(target);
        let abs = Self::data_offset(target) + bytes_used;
        let buf = self.store.as_mut_slice()?;
        write_u32(buf, abs, hash);
        let mut offset = abs + 4;
        offset += vbe::write(&mut buf[offset..], key.len() as u64);
        offset += vbe::write(&mut buf[offset..], value.len() as u64);
        buf[offset..offset + key.len()].copy_from_slice(key);
        offset += key.len();
        let value_start = offset;
        buf[offset..offset + value.len()].copy_from_slice(value);

        self.set_bytes_used(target, bytes_used + bytes_required)?;
        Ok((value_start, value.len()))
    }

    /// Remove the first matching record from the chain, compacting the bucket
    /// it lived in. Returns whether a record was removed.
    pub fn remove_record(&mut self, mut bucket_id: usize, hash: u32, key: &[u8]) -> Result<bool> {
        while bucket_id != INVALID_BUCKET_ID {
            let data_start = Self::data_offset(bucket_id);
            let bytes_used = self.bytes_used(bucket_id);
            let mut cursor = 0usize;
            while cursor < bytes_used {
                let abs = data_start + cursor;
                let (record_hash, key_len, value_len, header_len) = self.parse_record_at(abs);
                let record_len = header_len + key_len + value_len;
                let key_start = abs + header_len;
                let matches = record_hash == hash
                    && key_len == key.len()
                    && &self.store.as_slice()[key_start..key_start + key_len] == key;
                if matches {
                    let tail_start = abs + record_len;
                    let tail_end = data_start + bytes_used;
                    let buf = self.store.as_mut_slice()?;
                    buf.copy_within(tail_start..tail_end, abs);
                    self.set_bytes_used(bucket_id, bytes_used - record_len)?;
                    return Ok(true);
                }
                cursor += record_len;
            }
            bucket_id = self.next_bucket(bucket_id);
        }
        Ok(false)
    }

    /// Read the record at `byte_offset` within `bucket_id`'s own data (not
    /// following overflow links), advancing `byte_offset` past it. Returns
    /// `None` once the bucket's live bytes are exhausted.
    pub fn read_record(&self, bucket_id: usize, byte_offset: &mut usize) -> Option<(Vec<u8>, Vec<u8>)> {
        let bytes_used = self.bytes_used(bucket_id);
        if *byte_offset >= bytes_used {
            return None;
        }
        let abs = Self::data_offset(bucket_id) + *byte_offset;
        let (_, key_len, value_len, header_len) = self.parse_record_at(abs);
        let key_start = abs + header_len;
        let value_start = key_start + key_len;
        let buf = self.store.as_slice();
        let key = buf[key_start..key_start + key_len].to_vec();
        let value = buf[value_start..value_start + value_len].to_vec();
        *byte_offset += header_len + key_len + value_len;
        Some((key, value))
    }

    pub fn value_at(&self, abs_offset: usize, len: usize) -> &[u8] {
        &self.store.as_slice()[abs_offset..abs_offset + len]
    }

    /// Whether the two-bucket chain headed by `bucket_id` has grown enough to
    /// warrant a split: a third overflow bucket exists, or the first two
    /// together exceed the load factor.
    pub fn bucket_to_split(&self, bucket_id: usize) -> bool {
        let next = self.next_bucket(bucket_id);
        if next == INVALID_BUCKET_ID {
            return false;
        }
        if self.next_bucket(next) != INVALID_BUCKET_ID {
            return true;
        }
        let combined = self.bytes_used(bucket_id) + self.bytes_used(next);
        combined * SPLIT_LOAD_FACTOR_DENOMINATOR > BUCKET_SIZE * SPLIT_LOAD_FACTOR_NUMERATOR
    }

    /// Split the chain headed by `bucket_id` into two: records whose hash has
    /// the newly-significant bit clear stay in `bucket_id`'s chain (reusing its
    /// existing overflow buckets before allocating fresh ones); records with
    /// the bit set move to a brand-new chain. Returns the new chain's head id.
    ///
    /// Redistribution walks the original chain via live overflow links, so a
    /// freshly allocated bit-0 overflow bucket that extends the bucket being
    /// read from is itself visited once more as a source afterwards; that pass
    /// is a no-op past the bytes already placed in it. Safety of the in-place
    /// drain-and-refill on the bit-0 side rests on the write cursor never
    /// overtaking the read cursor within the bucket currently being drained.
    pub fn split(&mut self, bucket_id: usize) -> Result<usize> {
        let prefix_bits = self.prefix_bits(bucket_id) + 1;
        self.set_prefix_bits(bucket_id, prefix_bits)?;

        let mut bit0_id = bucket_id;
        let mut bit1_id = self.create_bucket(prefix_bits)?;
        let result_id = bit1_id;

        let new_bit: u32 = 1u32 << (HASH_BITS - prefix_bits as u32);

        let mut bit0_put = 0usize;
        let mut bit1_put = 0usize;

        let mut get_bucket_id = bucket_id;
        while get_bucket_id != INVALID_BUCKET_ID {
            let get_last = self.bytes_used(get_bucket_id);
            self.set_bytes_used(get_bucket_id, 0)?;
            let mut get_offset = 0usize;

            while get_offset < get_last {
                let src_abs = Self::data_offset(get_bucket_id) + get_offset;
                let (hash, key_len, value_len, header_len) = self.parse_record_at(src_abs);
                let record_len = header_len + key_len + value_len;

                if hash & new_bit != 0 {
                    if bit1_put + record_len > BUCKET_SIZE {
                        let new_id = self.create_bucket(prefix_bits)?;
                        self.set_next_bucket(bit1_id, new_id)?;
                        bit1_id = new_id;
                        bit1_put = 0;
                    }
                    let dst_abs = Self::data_offset(bit1_id) + bit1_put;
                    self.store.as_mut_slice()?.copy_within(src_abs..src_abs + record_len, dst_abs);
                    bit1_put += record_len;
                    self.set_bytes_used(bit1_id, bit1_put)?;
                } else {
                    if bit0_put + record_len > BUCKET_SIZE {
                        debug_assert_eq!(bit0_put, self.bytes_used(bit0_id));
                        let next = self.next_bucket(bit0_id);
                        bit0_id = if next != INVALID_BUCKET_ID {
                            next
                        } else {
                            let new_id = self.create_bucket(prefix_bits)?;
                            self.set_next_bucket(bit0_id, new_id)?;
                            new_id
                        };
                        self.set_prefix_bits(bit0_id, prefix_bits)?;
                        bit0_put = 0;
                    }
                    let dst_abs = Self::data_offset(bit0_id) + bit0_put;
                    self.store.as_mut_slice()?.copy_within(src_abs..src_abs + record_len, dst_abs);
                    bit0_put += record_len;
                    self.set_bytes_used(bit0_id, bit0_put)?;
                }

                get_offset += record_len;
            }

            get_bucket_id = self.next_bucket(get_bucket_id);
        }

        let mut free_id = self.next_bucket(bit0_id);
        self.set_next_bucket(bit0_id, INVALID_BUCKET_ID)?;
        while free_id != INVALID_BUCKET_ID {
            let next = self.next_bucket(free_id);
            self.set_next_bucket(free_id, self.first_free_bucket_id())?;
            self.set_first_free_bucket_id(free_id)?;
            free_id = next;
        }

        Ok(result_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (tempfile::TempDir, BucketPool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.dat");
        let pool = BucketPool::open(&path, false).unwrap();
        (dir, pool)
    }

    #[test]
    fn create_and_find_single_record() {
        let (_dir, mut pool) = pool();
        let b = pool.create_bucket(1).unwrap();
        pool.create_record(b, 42, b"hello", b"world").unwrap();
        let (off, len) = pool.find_record(b, 42, b"hello").unwrap();
        assert_eq!(pool.value_at(off, len), b"world");
        assert!(pool.find_record(b, 42, b"missing").is_none());
    }

    #[test]
    fn remove_then_relookup_fails() {
        let (_dir, mut pool) = pool();
        let b = pool.create_bucket(1).unwrap();
        pool.create_record(b, 1, b"k", b"v").unwrap();
        assert!(pool.remove_record(b, 1, b"k").unwrap());
        assert!(pool.find_record(b, 1, b"k").is_none());
        assert!(!pool.remove_record(b, 1, b"k").unwrap());
    }

    #[test]
    fn overflow_allocates_chain() {
        let (_dir, mut pool) = pool();
        let b = pool.create_bucket(1).unwrap();
        let value = vec![7u8; BUCKET_SIZE / 3];
        for i in 0..10u32 {
            pool.create_record(b, i, format!("k{i}").as_bytes(), &value).unwrap();
        }
        assert!(pool.next_bucket(b) != INVALID_BUCKET_ID);
        for i in 0..10u32 {
            let (off, len) = pool.find_record(b, i, format!("k{i}").as_bytes()).unwrap();
            assert_eq!(pool.value_at(off, len), value.as_slice());
        }
    }

    #[test]
    fn split_preserves_all_records_and_routes_by_bit() {
        let (_dir, mut pool) = pool();
        let b = pool.create_bucket(1).unwrap();
        let mut inserted = Vec::new();
        for i in 0..200u32 {
            let hash = i.wrapping_mul(2654435761);
            let key = format!("key-{i}").into_bytes();
            let value = format!("value-{i}").into_bytes();
            pool.create_record(b, hash, &key, &value).unwrap();
            inserted.push((hash, key, value));
        }
        let new_head = pool.split(b).unwrap();
        let new_bit = 1u32 << (HASH_BITS - pool.prefix_bits(b) as u32);
        for (hash, key, value) in &inserted {
            let head = if hash & new_bit != 0 { new_head } else { b };
            let (off, len) = pool
                .find_record(head, *hash, key)
                .unwrap_or_else(|| panic!("record for {hash:#x} missing after split"));
            assert_eq!(pool.value_at(off, len), value.as_slice());
        }
    }

    #[test]
    fn reopen_after_close_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.dat");
        let bucket_id;
        {
            let mut pool = BucketPool::open(&path, false).unwrap();
            bucket_id = pool.create_bucket(1).unwrap();
            pool.create_record(bucket_id, 9, b"a", b"b").unwrap();
            pool.close().unwrap();
        }
        let pool = BucketPool::open(&path, false).unwrap();
        let (off, len) = pool.find_record(bucket_id, 9, b"a").unwrap();
        assert_eq!(pool.value_at(off, len), b"b");
    }
}
