// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The top-level API: `init`, `put`, `get`, `free`. Picks a tier by
//! value size and hands everything else off to that tier's heap, TTL
//! router, and the cache-wide hash index.

use std::path::PathBuf;

use crate::error::CacheError;
use crate::heap::Heap;
use crate::index::HashIndex;
use crate::item::Item;
use crate::ttl::TtlBucketGroup;

/// Construction parameters for one tier, passed to [`Cache::init`] in
/// ascending size order: `put` picks the first tier whose
/// `segment_size` exceeds the value being written.
pub struct TierConfig {
    pub segment_size: u32,
    pub segment_count: u32,
    /// `Some(dir)` makes this a file-backed tier; `None` makes it an
    /// in-memory tier.
    pub cache_dir: Option<PathBuf>,
}

/// Ties the cache's three cooperating structures together. Heaps live
/// in their own `Vec` (rather than behind a per-tier struct) so a
/// packed pointer's `tier()` field can index straight into it — the
/// same layout `HashIndex::get` expects.
pub struct Cache {
    hash_index: HashIndex,
    heaps: Vec<Heap>,
    routers: Vec<TtlBucketGroup>,
}

impl Cache {
    /// Builds every configured tier's heap and TTL router plus the
    /// shared hash index. `hash_size` must be a power of two.
    pub fn init(hash_size: usize, tier_configs: Vec<TierConfig>) -> Result<Self, CacheError> {
        let mut heaps = Vec::with_capacity(tier_configs.len());
        let mut routers = Vec::with_capacity(tier_configs.len());
        for (tier, config) in tier_configs.into_iter().enumerate() {
            heaps.push(Heap::init(config.segment_size, config.segment_count, config.cache_dir)?);
            routers.push(TtlBucketGroup::new(tier as u8));
        }
        Ok(Self {
            hash_index: HashIndex::new(hash_size),
            heaps,
            routers,
        })
    }

    /// Writes `key`/`value` with the given TTL (seconds) into the
    /// first tier whose segment size can hold it, failing
    /// `ValueTooLarge` if none can.
    pub fn put(&mut self, key: &[u8], ttl_seconds: u32, value: &[u8]) -> Result<(), CacheError> {
        let item = Item::new(key, value);
        let item_size = item.header.item_size() as u32;

        let tier = self
            .heaps
            .iter()
            .position(|heap| heap.segment_size() > item_size)
            .ok_or(CacheError::ValueTooLarge)?;

        self.routers[tier].write(&mut self.heaps[tier], &mut self.hash_index, ttl_seconds, &item)
    }

    /// Reads back the value stored under `key`, or `NotFound` if it
    /// was never written, has expired, or was evicted.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, CacheError> {
        self.hash_index.get(key, &mut self.heaps).map(|item| item.value)
    }

    /// Tears down every tier's heap (freeing file-tier segment files)
    /// in reverse order.
    pub fn free(&mut self) -> Result<(), CacheError> {
        for heap in self.heaps.iter_mut().rev() {
            heap.free_heap()?;
        }
        Ok(())
    }

    /// Runs one maintenance pass: sweeps expired segments, then
    /// performs one merge-eviction step, for every tier. The calling
    /// binary owns the cadence (Section 4.4); this does exactly one
    /// pass per call.
    pub fn run_maintenance(&mut self) {
        for (heap, router) in self.heaps.iter_mut().zip(self.routers.iter_mut()) {
            router.sweep_expired(heap);
        }
        for (heap, router) in self.heaps.iter_mut().zip(self.routers.iter_mut()) {
            router.merge_once(heap, &mut self.hash_index);
        }
    }

    #[cfg(test)]
    fn segment_header_mut(&mut self, tier: usize, id: u32) -> &mut crate::segment::SegmentHeader {
        self.heaps[tier].get_segment_header_mut(id).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tier_cache() -> Cache {
        Cache::init(
            256,
            vec![
                TierConfig {
                    segment_size: 1024,
                    segment_count: 4,
                    cache_dir: None,
                },
                TierConfig {
                    segment_size: 524288,
                    segment_count: 2,
                    cache_dir: Some(tempfile::tempdir().unwrap().into_path()),
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn s1_round_trips_a_small_value_in_the_memory_tier() {
        let mut cache = two_tier_cache();
        cache.put(b"k1", 100, b"hello").unwrap();
        assert_eq!(cache.get(b"k1").unwrap(), b"hello");
    }

    #[test]
    fn s2_a_value_too_big_for_tier_zero_lands_in_tier_one() {
        let mut cache = two_tier_cache();
        let big = vec![0u8; 2000];
        cache.put(b"big", 100, &big).unwrap();
        assert_eq!(cache.get(b"big").unwrap(), big);
    }

    #[test]
    fn s3_filling_tier_zero_forces_eviction_without_corrupting_survivors() {
        let mut cache = two_tier_cache();
        let blob = vec![7u8; 900];
        for i in 0..5 {
            let key = format!("k{i}");
            cache.put(key.as_bytes(), 10, &blob).unwrap();
        }
        let mut missing = 0;
        for i in 0..5 {
            let key = format!("k{i}");
            match cache.get(key.as_bytes()) {
                Ok(value) => assert_eq!(value, blob),
                Err(CacheError::NotFound) => missing += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(missing <= 5);
    }

    #[test]
    fn s4_a_ttl_past_the_supported_range_is_rejected() {
        let mut cache = two_tier_cache();
        assert!(cache.put(b"k", 9_000_000, b"x").is_err());
    }

    #[test]
    fn put_reports_value_too_large_when_no_tier_fits() {
        let mut cache = two_tier_cache();
        let huge = vec![0u8; 1_000_000];
        assert_eq!(cache.put(b"k", 100, &huge), Err(CacheError::ValueTooLarge));
    }

    #[test]
    fn get_on_an_absent_key_is_not_found() {
        let mut cache = two_tier_cache();
        assert_eq!(cache.get(b"absent"), Err(CacheError::NotFound));
    }

    #[test]
    fn s6_a_flagged_segment_is_reclaimed_by_one_maintenance_pass() {
        let mut cache = Cache::init(
            64,
            vec![TierConfig {
                segment_size: 64,
                segment_count: 1,
                cache_dir: None,
            }],
        )
        .unwrap();
        // fill the lone segment completely so the next write has
        // nowhere to go
        let filler = vec![0u8; 55];
        cache.put(b"k0", 100, &filler).unwrap();
        assert_eq!(cache.put(b"k1", 100, b"y"), Err(CacheError::OutOfSegments));

        cache.segment_header_mut(0, 0).mark_expired();

        cache.run_maintenance();
        cache.put(b"k1", 100, b"y").unwrap();
        assert_eq!(cache.get(b"k1").unwrap(), b"y");
    }
}
