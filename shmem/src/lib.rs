// Copyright 2024 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A named shared-memory region table: one anonymous mapping is carved
//! up into named, fixed-size regions on first request and handed back
//! unchanged on every later request for the same name. Mirrors the
//! followed `sharedMem` component's `registerSharedArea`: callers never
//! unmap or resize a region once it exists.

use std::collections::HashMap;

use memmap2::{MmapMut, MmapOptions};

#[derive(thiserror::Error, Debug)]
pub enum ShmemError {
    #[error("failed to map shared memory: {0}")]
    Map(#[source] std::io::Error),
    #[error("shared memory exhausted: {requested} bytes requested, {available} available")]
    OutOfSpace { requested: usize, available: usize },
}

/// A handle to a named region inside a [`SharedAreaTable`]'s mapping.
/// `found` tells the caller whether this name already existed, the way
/// `registerSharedArea`'s out-parameter does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedArea {
    offset: usize,
    size: usize,
    pub found: bool,
}

/// One anonymous mapping plus a name -> (offset, size) directory. Bump-
/// allocates: regions are never freed individually, matching the
/// process-lifetime shared segment the followed component manages.
pub struct SharedAreaTable {
    mmap: MmapMut,
    filled_size: usize,
    regions: HashMap<String, SharedArea>,
}

impl SharedAreaTable {
    /// Maps `capacity` bytes of anonymous shared memory, empty of
    /// registered regions.
    pub fn map(capacity: usize) -> Result<Self, ShmemError> {
        let mmap = MmapOptions::new()
            .len(capacity.max(1))
            .map_anon()
            .map_err(ShmemError::Map)?;
        Ok(Self {
            mmap,
            filled_size: 0,
            regions: HashMap::new(),
        })
    }

    /// Finds `name`'s region if it was already registered, otherwise
    /// carves `size` bytes off the end of the mapping for it. Returns
    /// the existing region unchanged if `name` is already known, even
    /// if `size` differs from the original request.
    pub fn register_shared_area(&mut self, name: &str, size: usize) -> Result<SharedArea, ShmemError> {
        if let Some(existing) = self.regions.get(name) {
            return Ok(SharedArea {
                found: true,
                ..*existing
            });
        }

        let available = self.mmap.len() - self.filled_size;
        if available < size {
            return Err(ShmemError::OutOfSpace {
                requested: size,
                available,
            });
        }

        let area = SharedArea {
            offset: self.filled_size,
            size,
            found: false,
        };
        self.filled_size += size;
        self.regions.insert(name.to_owned(), area);
        Ok(area)
    }

    pub fn as_slice(&self, area: SharedArea) -> &[u8] {
        &self.mmap[area.offset..area.offset + area.size]
    }

    pub fn as_mut_slice(&mut self, area: SharedArea) -> &mut [u8] {
        &mut self.mmap[area.offset..area.offset + area.size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_a_new_name_carves_out_a_fresh_region() {
        let mut table = SharedAreaTable::map(64).unwrap();
        let area = table.register_shared_area("testCounter", 8).unwrap();
        assert!(!area.found);
        assert_eq!(table.as_slice(area).len(), 8);
    }

    #[test]
    fn registering_the_same_name_twice_returns_the_same_region() {
        let mut table = SharedAreaTable::map(64).unwrap();
        let first = table.register_shared_area("testCounter", 8).unwrap();
        table.as_mut_slice(first)[0] = 0x7f;

        let second = table.register_shared_area("testCounter", 8).unwrap();
        assert!(second.found);
        assert_eq!(second.offset, first.offset);
        assert_eq!(table.as_slice(second)[0], 0x7f);
    }

    #[test]
    fn exhausting_capacity_is_reported_rather_than_silently_truncated() {
        let mut table = SharedAreaTable::map(8).unwrap();
        table.register_shared_area("a", 8).unwrap();
        let err = table.register_shared_area("b", 1).unwrap_err();
        assert!(matches!(err, ShmemError::OutOfSpace { requested: 1, available: 0 }));
    }
}
