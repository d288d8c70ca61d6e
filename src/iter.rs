//! Forward iteration over every record in a map.
//!
//! Walks the directory's slot array left to right, skipping runs of slots
//! that share a bucket id (a chain occupies one contiguous range of slots, so
//! once its run ends it is never seen again), and within each chain follows
//! overflow links to read every record.

use crate::bucket_pool::BucketPool;
use crate::directory::Directory;
use crate::utils::config::INVALID_BUCKET_ID;

pub struct Iter<'a> {
    directory: &'a Directory,
    pool: &'a BucketPool,
    slot: usize,
    last_bucket: Option<usize>,
    current_bucket: usize,
    byte_offset: usize,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(directory: &'a Directory, pool: &'a BucketPool) -> Self {
        Iter {
            directory,
            pool,
            slot: 0,
            last_bucket: None,
            current_bucket: INVALID_BUCKET_ID,
            byte_offset: 0,
        }
    }

    fn advance_to_next_chain(&mut self) -> bool {
        let slot_count = self.directory.slot_count();
        while self.slot < slot_count {
            let candidate = self.directory.bucket_at_slot(self.slot);
            self.slot += 1;
            if self.last_bucket != Some(candidate) {
                self.last_bucket = Some(candidate);
                self.current_bucket = candidate;
                self.byte_offset = 0;
                return true;
            }
        }
        false
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_bucket == INVALID_BUCKET_ID {
                if !self.advance_to_next_chain() {
                    return None;
                }
                continue;
            }

            if let Some(kv) = self.pool.read_record(self.current_bucket, &mut self.byte_offset) {
                return Some(kv);
            }

            let next = self.pool.next_bucket(self.current_bucket);
            if next != INVALID_BUCKET_ID {
                self.current_bucket = next;
                self.byte_offset = 0;
            } else {
                self.current_bucket = INVALID_BUCKET_ID;
            }
        }
    }
}
