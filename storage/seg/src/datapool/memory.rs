// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The in-memory tier's payload region: one anonymous mapping sliced
//! into fixed-size segments. Unlike the file tier, where each segment
//! addresses its own file by id, a memory area has to carry its own
//! `segment_size` so it can compute a segment's byte range itself.

use memmap2::{MmapMut, MmapOptions};

const PAGE_SIZE: usize = 4096;

/// A single anonymous mapping backing one or more same-sized segments
/// of the in-memory tier. [`crate::heap::Heap::extend`] maps a fresh
/// one per call rather than growing this one, so slices already
/// handed out of an older `Memory` never move.
pub struct Memory {
    mmap: MmapMut,
    segment_size: u32,
    segment_count: u32,
}

impl Memory {
    /// Maps `segment_size * segment_count` bytes anonymously and
    /// touches every page up front, so the first real write into a
    /// segment doesn't stall on a page fault.
    pub fn create(segment_size: u32, segment_count: u32) -> Result<Self, std::io::Error> {
        let total = segment_size as usize * segment_count as usize;
        let mut mmap = MmapOptions::new().len(total.max(1)).map_anon()?;
        let mut offset = 0;
        while offset < total {
            mmap[offset] = 0;
            offset += PAGE_SIZE;
        }
        mmap.flush()?;
        Ok(Self {
            mmap,
            segment_size,
            segment_count,
        })
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    /// The byte range for `local_id`, a segment index within this
    /// area rather than the heap-wide segment id a caller works with.
    pub fn segment(&self, local_id: u32) -> &[u8] {
        let start = local_id as usize * self.segment_size as usize;
        &self.mmap[start..start + self.segment_size as usize]
    }

    pub fn segment_mut(&mut self, local_id: u32) -> &mut [u8] {
        let start = local_id as usize * self.segment_size as usize;
        &mut self.mmap[start..start + self.segment_size as usize]
    }

    pub fn flush(&self) -> Result<(), std::io::Error> {
        self.mmap.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_initialized_and_segment_count_matches_capacity() {
        let pool = Memory::create(1024, 4).unwrap();
        assert_eq!(pool.segment_count(), 4);
        assert!(pool.segment(0).iter().all(|&b| b == 0));
        assert!(pool.segment(3).iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_to_one_segment_do_not_touch_its_neighbor() {
        let mut pool = Memory::create(16, 2).unwrap();
        pool.segment_mut(0)[0] = 0xab;
        assert_eq!(pool.segment(0)[0], 0xab);
        assert_eq!(pool.segment(1)[0], 0);
    }
}
