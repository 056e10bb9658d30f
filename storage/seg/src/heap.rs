// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The segment heap: owns one tier's segments, hands them out from a
//! free pool threaded through the segment headers' `next` field, and
//! mediates every item-level read/write.
//!
//! A tier is either in-memory (segments sliced out of one or more
//! anonymous mappings, one per `extend`) or file-backed (each segment
//! is its own `<id>.cache` file, created on `allocate_segment` and
//! removed on `free_segment`). The heap never panics on a bad id; it
//! returns `None`/an error and lets the caller decide (Section 4.1).

use std::path::PathBuf;

use crate::datapool::{Memory, SegmentFile};
use crate::error::CacheError;
use crate::item::{Item, ItemHeader, ITEM_HEADER_SIZE};
use crate::segment::{now_as_secs, SegmentHeader, NONE_SEGMENT};

/// One contiguous in-memory mapping covering segment ids
/// `[min_id, min_id + capacity)`. `extend_heap` appends a new area
/// rather than growing an existing one, so already-handed-out slices
/// never move.
struct MemoryArea {
    min_id: u32,
    pool: Memory,
}

enum Backing {
    Memory(Vec<MemoryArea>),
    File(PathBuf),
}

/// Appending a new item failed because the tail segment doesn't have
/// room; distinct from the error kinds a caller ultimately sees because
/// the TTL router treats it as "go allocate a new tail and retry", not
/// as a failure (Section 4.3).
pub enum AddItemError {
    NotEnoughSpace,
    Failed(CacheError),
}

impl From<CacheError> for AddItemError {
    fn from(e: CacheError) -> Self {
        AddItemError::Failed(e)
    }
}

pub struct Heap {
    headers: Vec<SegmentHeader>,
    backing: Backing,
    segment_size: u32,
    free_head: u32,
}

impl Heap {
    /// Allocates the segment-header table and either one contiguous
    /// payload region (in-memory tier) or ensures `cache_dir` exists
    /// (file tier).
    pub fn init(
        segment_size: u32,
        boot_segment_count: u32,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self, CacheError> {
        let backing = match cache_dir {
            Some(dir) => {
                if dir.exists() {
                    if !dir.is_dir() {
                        return Err(CacheError::BadPath(dir.display().to_string()));
                    }
                } else {
                    std::fs::create_dir_all(&dir)
                        .map_err(|e| CacheError::IoFailure(e.to_string()))?;
                }
                Backing::File(dir)
            }
            None => {
                let pool = Memory::create(segment_size, boot_segment_count)
                    .map_err(|_| CacheError::OutOfMemory)?;
                Backing::Memory(vec![MemoryArea { min_id: 0, pool }])
            }
        };

        let mut headers = Vec::with_capacity(boot_segment_count as usize);
        for i in 0..boot_segment_count {
            let next = if i + 1 < boot_segment_count {
                i + 1
            } else {
                NONE_SEGMENT
            };
            headers.push(SegmentHeader::new(next));
        }

        Ok(Self {
            headers,
            backing,
            segment_size,
            free_head: if boot_segment_count > 0 { 0 } else { NONE_SEGMENT },
        })
    }

    /// Appends `count` more segment headers (and payload, for the
    /// in-memory tier); the new segments are pushed onto the head of
    /// the free pool.
    pub fn extend(&mut self, count: u32) -> Result<(), CacheError> {
        let base = self.headers.len() as u32;

        if let Backing::Memory(areas) = &mut self.backing {
            let pool = Memory::create(self.segment_size, count).map_err(|_| CacheError::OutOfMemory)?;
            areas.push(MemoryArea { min_id: base, pool });
        }

        let previous_free_head = self.free_head;
        for i in 0..count {
            let next = if i + 1 < count { base + i + 1 } else { previous_free_head };
            self.headers.push(SegmentHeader::new(next));
        }
        self.free_head = base;
        Ok(())
    }

    /// Unmaps/unlinks all regions and, for the file tier, deletes all
    /// per-segment cache files.
    pub fn free_heap(&mut self) -> Result<(), CacheError> {
        if let Backing::File(dir) = &self.backing {
            for id in 0..self.headers.len() as u32 {
                SegmentFile::remove(dir, id).map_err(|e| CacheError::IoFailure(e.to_string()))?;
            }
        }
        self.headers.clear();
        Ok(())
    }

    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    pub fn segment_count(&self) -> u32 {
        self.headers.len() as u32
    }

    /// Pops a segment off the free pool. `None` if the pool is empty;
    /// the caller (the TTL router) decides whether to trigger eviction.
    pub fn allocate_segment(&mut self) -> Option<u32> {
        if self.free_head == NONE_SEGMENT {
            return None;
        }
        let id = self.free_head;
        let next_free = self.headers[id as usize].next;

        if let Backing::File(dir) = &self.backing {
            let path = SegmentFile::path_for(dir, id);
            if SegmentFile::create(path).is_err() {
                return None;
            }
        }

        let header = &mut self.headers[id as usize];
        header.next = NONE_SEGMENT;
        header.flags = Default::default();
        header.filled_size = 0;
        header.item_count = 0;
        header.last_use_timestamp = now_as_secs();

        self.free_head = next_free;
        Some(id)
    }

    /// Pushes `id` onto the free pool and marks it deleted; for the
    /// file tier, also deletes the backing file.
    pub fn free_segment(&mut self, id: u32) -> Result<(), CacheError> {
        let header = self
            .headers
            .get_mut(id as usize)
            .ok_or(CacheError::InvalidArgument)?;
        header.next = self.free_head;
        header.flags.insert(crate::segment::SegmentFlags::DELETED);
        self.free_head = id;

        if let Backing::File(dir) = &self.backing {
            SegmentFile::remove(dir, id).map_err(|e| CacheError::IoFailure(e.to_string()))?;
        }
        Ok(())
    }

    pub fn get_segment_header(&self, id: u32) -> Option<&SegmentHeader> {
        self.headers.get(id as usize)
    }

    pub fn get_segment_header_mut(&mut self, id: u32) -> Option<&mut SegmentHeader> {
        self.headers.get_mut(id as usize)
    }

    pub fn set_segment_header(&mut self, id: u32, header: SegmentHeader) -> Result<(), CacheError> {
        *self
            .headers
            .get_mut(id as usize)
            .ok_or(CacheError::InvalidArgument)? = header;
        Ok(())
    }

    /// Appends `item` at the segment's current `filled_size`. Returns
    /// the pre-append offset on success.
    pub fn add_item(&mut self, id: u32, item: &Item) -> Result<u32, AddItemError> {
        let segment_size = self.segment_size;
        let header = self
            .headers
            .get(id as usize)
            .ok_or(CacheError::InvalidArgument)?;
        if header.is_deleted() {
            return Err(CacheError::InvalidArgument.into());
        }

        let item_size = item.header.item_size() as u32;
        let offset = header.filled_size;
        if segment_size - offset < item_size {
            return Err(AddItemError::NotEnoughSpace);
        }

        let bytes = item.to_bytes();
        self.write_segment_bytes(id, offset, &bytes)
            .map_err(AddItemError::Failed)?;

        let header = self.headers.get_mut(id as usize).unwrap();
        header.filled_size += item_size;
        header.item_count += 1;
        Ok(offset)
    }

    /// Reads the item at `offset`, bounds-checked by `filled_size`.
    pub fn read_item(&mut self, id: u32, offset: u32) -> Result<Item, CacheError> {
        let header = self
            .headers
            .get(id as usize)
            .ok_or(CacheError::NotFound)?;
        if header.is_deleted() {
            return Err(CacheError::NotFound);
        }
        if offset >= header.filled_size {
            return Err(CacheError::InvalidArgument);
        }

        let item_header_bytes = self.read_segment_bytes(id, offset, ITEM_HEADER_SIZE)?;
        let mut raw = [0u8; ITEM_HEADER_SIZE];
        raw.copy_from_slice(&item_header_bytes);
        let item_header = ItemHeader::from_bytes(&raw);

        let key_bytes = self.read_segment_bytes(
            id,
            offset + ITEM_HEADER_SIZE as u32,
            item_header.key_size as usize + 1,
        )?;
        let key = key_bytes[..item_header.key_size as usize].to_vec();

        let value = self.read_segment_bytes(
            id,
            offset + ITEM_HEADER_SIZE as u32 + item_header.key_size as u32 + 1,
            item_header.value_size as usize,
        )?;

        Ok(Item {
            header: item_header,
            key,
            value,
        })
    }

    /// Reads just the item header and key, without the value — used by
    /// the hash index to verify a key match before paying for a full
    /// `read_item`.
    pub fn get_item_header(&mut self, id: u32, offset: u32) -> Result<(ItemHeader, Vec<u8>), CacheError> {
        let header = self
            .headers
            .get(id as usize)
            .ok_or(CacheError::NotFound)?;
        if header.is_deleted() {
            return Err(CacheError::NotFound);
        }

        let item_header_bytes = self.read_segment_bytes(id, offset, ITEM_HEADER_SIZE)?;
        let mut raw = [0u8; ITEM_HEADER_SIZE];
        raw.copy_from_slice(&item_header_bytes);
        let item_header = ItemHeader::from_bytes(&raw);

        let key_bytes = self.read_segment_bytes(
            id,
            offset + ITEM_HEADER_SIZE as u32,
            item_header.key_size as usize,
        )?;

        Ok((item_header, key_bytes))
    }

    fn write_segment_bytes(&mut self, id: u32, offset: u32, bytes: &[u8]) -> Result<(), CacheError> {
        match &mut self.backing {
            Backing::Memory(areas) => {
                let slice = memory_slice_mut(areas, id).ok_or(CacheError::InvalidArgument)?;
                let start = offset as usize;
                slice[start..start + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            Backing::File(dir) => {
                let path = SegmentFile::path_for(dir, id);
                let mut file = SegmentFile::open(path).map_err(|e| CacheError::IoFailure(e.to_string()))?;
                file.write_at(offset as u64, bytes)
                    .map_err(|e| CacheError::IoFailure(e.to_string()))
            }
        }
    }

    fn read_segment_bytes(&mut self, id: u32, offset: u32, len: usize) -> Result<Vec<u8>, CacheError> {
        match &mut self.backing {
            Backing::Memory(areas) => {
                let slice = memory_slice(areas, id).ok_or(CacheError::InvalidArgument)?;
                let start = offset as usize;
                Ok(slice[start..start + len].to_vec())
            }
            Backing::File(dir) => {
                let path = SegmentFile::path_for(dir, id);
                let mut file = SegmentFile::open(path).map_err(|e| CacheError::IoFailure(e.to_string()))?;
                file.read_at(offset as u64, len)
                    .map_err(|e| CacheError::IoFailure(e.to_string()))
            }
        }
    }
}

fn area_for(areas: &[MemoryArea], id: u32) -> Option<usize> {
    areas
        .iter()
        .position(|area| id >= area.min_id && id - area.min_id < area.pool.segment_count())
}

fn memory_slice<'a>(areas: &'a [MemoryArea], id: u32) -> Option<&'a [u8]> {
    let idx = area_for(areas, id)?;
    let area = &areas[idx];
    Some(area.pool.segment(id - area.min_id))
}

fn memory_slice_mut<'a>(areas: &'a mut [MemoryArea], id: u32) -> Option<&'a mut [u8]> {
    let idx = area_for(areas, id)?;
    let area = &mut areas[idx];
    Some(area.pool.segment_mut(id - area.min_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_cycle_through_the_pool() {
        let mut heap = Heap::init(1024, 2, None).unwrap();
        let a = heap.allocate_segment().unwrap();
        let b = heap.allocate_segment().unwrap();
        assert!(heap.allocate_segment().is_none());
        heap.free_segment(a).unwrap();
        let c = heap.allocate_segment().unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn add_and_read_item_round_trips() {
        let mut heap = Heap::init(1024, 1, None).unwrap();
        let id = heap.allocate_segment().unwrap();
        let item = Item::new(b"k1", b"hello");
        let offset = heap.add_item(id, &item).map_err(|_| ()).unwrap();
        let read_back = heap.read_item(id, offset).unwrap();
        assert_eq!(read_back.key, b"k1");
        assert_eq!(read_back.value, b"hello");
    }

    #[test]
    fn add_item_reports_not_enough_space() {
        let mut heap = Heap::init(16, 1, None).unwrap();
        let id = heap.allocate_segment().unwrap();
        let item = Item::new(b"too-long-a-key-for-this-segment", b"value");
        match heap.add_item(id, &item) {
            Err(AddItemError::NotEnoughSpace) => {}
            other => panic!("expected NotEnoughSpace, got {}", other.is_ok()),
        }
    }

    #[test]
    fn extend_grows_the_free_pool() {
        let mut heap = Heap::init(64, 1, None).unwrap();
        heap.allocate_segment().unwrap();
        assert!(heap.allocate_segment().is_none());
        heap.extend(2).unwrap();
        assert!(heap.allocate_segment().is_some());
        assert!(heap.allocate_segment().is_some());
        assert!(heap.allocate_segment().is_none());
    }

    #[test]
    fn file_tier_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut heap = Heap::init(1024, 1, Some(dir.path().to_path_buf())).unwrap();
        let id = heap.allocate_segment().unwrap();
        let item = Item::new(b"k1", b"hello");
        let offset = heap.add_item(id, &item).map_err(|_| ()).unwrap();
        let read_back = heap.read_item(id, offset).unwrap();
        assert_eq!(read_back.value, b"hello");
    }

    #[test]
    fn read_item_after_free_segment_is_not_found() {
        let mut heap = Heap::init(1024, 1, None).unwrap();
        let id = heap.allocate_segment().unwrap();
        let item = Item::new(b"k1", b"hello");
        let offset = heap.add_item(id, &item).map_err(|_| ()).unwrap();
        heap.free_segment(id).unwrap();
        assert!(matches!(heap.read_item(id, offset), Err(CacheError::NotFound)));
    }
}
