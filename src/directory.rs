//! The directory (catalogue) file: a flat array of `2^prefix_bits` slots, each
//! holding the id of the bucket that owns that hash prefix.
//!
//! Layout, all native-endian, no padding:
//! ```text
//! header: signature: u32, prefix_bits: usize, prefix_shift: usize,
//!         prefix_mask: u32, buffer_size: usize
//! slots:  [usize; buffer_size]
//! ```

use std::mem::size_of;
use std::path::Path;

use crate::backing_store::BackingStore;
use crate::error::{Result, StoreError};
use crate::utils::config::{DIRECTORY_SIGNATURE, HASH_BITS, INITIAL_PREFIX_BITS};

const USIZE: usize = size_of::<usize>();
// signature, prefix_bits, prefix_shift, prefix_mask, buffer_size
const PREFIX_BITS_OFF: usize = 4;
const PREFIX_SHIFT_OFF: usize = PREFIX_BITS_OFF + USIZE;
const PREFIX_MASK_OFF: usize = PREFIX_SHIFT_OFF + USIZE;
const BUFFER_SIZE_OFF: usize = PREFIX_MASK_OFF + 4;
const HEADER_SIZE: usize = BUFFER_SIZE_OFF + USIZE;

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

/// Maps a hash prefix of `prefix_bits` bits to the bucket id owning it.
pub struct Directory {
    store: BackingStore,
}

impl Directory {
    /// Open an existing directory file, or create a fresh one with
    /// `2^INITIAL_PREFIX_BITS` slots all pointing at `initial_bucket_id`.
    pub fn open(path: &Path, read_only: bool, initial_bucket_ids: &[usize]) -> Result<Self> {
        let slot_count = initial_bucket_ids.len();
        let initial_len = HEADER_SIZE + slot_count * USIZE;
        let mut store = BackingStore::open(path, read_only, initial_len)?;

        let signature = read_u32(store.as_slice(), 0);
        if signature == 0 {
            if read_only {
                return Err(StoreError::Precondition(
                    "directory file does not exist and store is read-only",
                ));
            }
            let prefix_shift = HASH_BITS - INITIAL_PREFIX_BITS as u32;
            let prefix_mask = ((1u32 << INITIAL_PREFIX_BITS) - 1) << prefix_shift;
            let buffer_size = 1usize << INITIAL_PREFIX_BITS;

            let buf = store.as_mut_slice()?;
            write_u32(buf, 0, DIRECTORY_SIGNATURE);
            write_usize(buf, PREFIX_BITS_OFF, INITIAL_PREFIX_BITS);
            write_usize(buf, PREFIX_SHIFT_OFF, prefix_shift as usize);
            write_u32(buf, PREFIX_MASK_OFF, prefix_mask);
            write_usize(buf, BUFFER_SIZE_OFF, buffer_size);
            for (i, &bucket_id) in initial_bucket_ids.iter().enumerate() {
                write_usize(buf, HEADER_SIZE + i * USIZE, bucket_id);
            }
        } else if signature != DIRECTORY_SIGNATURE {
            return Err(StoreError::Corruption {
                which: "directory",
                path: path.to_path_buf(),
                expected: DIRECTORY_SIGNATURE,
                found: signature,
            });
        }

        Ok(Directory { store })
    }

    pub fn prefix_bits(&self) -> usize {
        read_usize(self.store.as_slice(), PREFIX_BITS_OFF)
    }

    fn set_prefix_bits(&mut self, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, PREFIX_BITS_OFF, v);
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.buffer_size()
    }

    fn prefix_shift(&self) -> u32 {
        read_usize(self.store.as_slice(), PREFIX_SHIFT_OFF) as u32
    }

    fn set_prefix_shift(&mut self, v: u32) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, PREFIX_SHIFT_OFF, v as usize);
        Ok(())
    }

    fn prefix_mask(&self) -> u32 {
        read_u32(self.store.as_slice(), PREFIX_MASK_OFF)
    }

    fn set_prefix_mask(&mut self, v: u32) -> Result<()> {
        write_u32(self.store.as_mut_slice()?, PREFIX_MASK_OFF, v);
        Ok(())
    }

    fn buffer_size(&self) -> usize {
        read_usize(self.store.as_slice(), BUFFER_SIZE_OFF)
    }

    fn set_buffer_size(&mut self, v: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, BUFFER_SIZE_OFF, v);
        Ok(())
    }

    /// The slot index that `hash` falls into at the current resolution.
    pub fn slot_for_hash(&self, hash: u32) -> usize {
        ((hash & self.prefix_mask()) >> self.prefix_shift()) as usize
    }

    pub fn find(&self, hash: u32) -> usize {
        read_usize(self.store.as_slice(), HEADER_SIZE + self.slot_for_hash(hash) * USIZE)
    }

    pub fn bucket_at_slot(&self, slot: usize) -> usize {
        read_usize(self.store.as_slice(), HEADER_SIZE + slot * USIZE)
    }

    fn set_slot(&mut self, slot: usize, bucket_id: usize) -> Result<()> {
        write_usize(self.store.as_mut_slice()?, HEADER_SIZE + slot * USIZE, bucket_id);
        Ok(())
    }

    /// Overwrite every slot whose hash prefix falls under `bucket_prefix_bits`
    /// significant bits equal to `bucket_prefix` with `bucket_id`. Used both to
    /// fix up the bit-1 half of a split and, after a doubling, to mirror each
    /// old slot into its new sibling.
    pub fn set_range(&mut self, bucket_prefix: u32, bucket_prefix_bits: usize, bucket_id: usize) -> Result<()> {
        let my_bits = self.prefix_bits();
        debug_assert!(bucket_prefix_bits <= my_bits);
        let extra_bits = my_bits - bucket_prefix_bits;
        let shift = HASH_BITS - bucket_prefix_bits as u32;
        let base = (bucket_prefix >> shift) as usize;
        let start = base << extra_bits;
        let count = 1usize << extra_bits;
        for slot in start..start + count {
            self.set_slot(slot, bucket_id)?;
        }
        Ok(())
    }

    pub fn set_one(&mut self, hash: u32, bucket_id: usize) -> Result<()> {
        let slot = self.slot_for_hash(hash);
        self.set_slot(slot, bucket_id)
    }

    /// Double the directory: every existing slot's bucket id is copied into
    /// both its position and the corresponding position one bit finer.
    pub fn double(&mut self) -> Result<()> {
        let old_prefix_bits = self.prefix_bits();
        let old_count = 1usize << old_prefix_bits;
        let new_count = old_count * 2;
        let new_len = HEADER_SIZE + new_count * USIZE;

        let old_slots: Vec<usize> = (0..old_count).map(|i| self.bucket_at_slot(i)).collect();
        let new_prefix_shift = self.prefix_shift() - 1;
        let new_prefix_mask = self.prefix_mask() | (1u32 << new_prefix_shift);

        self.store.resize(new_len)?;
        self.set_prefix_bits(old_prefix_bits + 1)?;
        self.set_prefix_shift(new_prefix_shift)?;
        self.set_prefix_mask(new_prefix_mask)?;
        self.set_buffer_size(new_count)?;
        for (i, bucket_id) in old_slots.into_iter().enumerate() {
            self.set_slot(2 * i, bucket_id)?;
            self.set_slot(2 * i + 1, bucket_id)?;
        }
        Ok(())
    }

    pub fn bytes_allocated(&self) -> usize {
        self.store.length()
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_initial_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.cat");
        let d = Directory::open(&path, false, &[0, 1]).unwrap();
        assert_eq!(d.prefix_bits(), 1);
        assert_eq!(d.find(0x0000_0000), 0);
        assert_eq!(d.find(0x8000_0000), 1);
    }

    #[test]
    fn set_range_updates_only_matching_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.cat");
        let mut d = Directory::open(&path, false, &[0, 0]).unwrap();
        d.double().unwrap();
        // Route everything with the top 2 bits == 0b01 to bucket 9.
        d.set_range(0x4000_0000, 2, 9).unwrap();
        assert_eq!(d.find(0x0000_0000), 0);
        assert_eq!(d.find(0x4000_0000), 9);
        assert_eq!(d.find(0x8000_0000), 0);
        assert_eq!(d.find(0xc000_0000), 0);
    }

    #[test]
    fn double_preserves_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.cat");
        let mut d = Directory::open(&path, false, &[0, 1]).unwrap();
        for hash in [0x0000_0000u32, 0x1234_5678, 0x8000_0000, 0xffff_ffff] {
            let before = d.find(hash);
            d.double().unwrap();
            assert_eq!(d.find(hash), before);
        }
        assert_eq!(d.prefix_bits(), 5);
        assert_eq!(d.slot_count(), 32);
    }
}
