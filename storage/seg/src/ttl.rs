// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! TTL buckets group segments with similar expiration, chained oldest
//! (head) to newest (tail) through the segment header's `next` field —
//! the same field the heap's free pool threads through, repurposed
//! once a segment is handed out of the pool. 1024 buckets cover the
//! full TTL range across four geometric ranges (8s/128s/2048s/32768s
//! wide), matching the Segcache design this is built on.
//!
//! [`TtlBucketGroup`] is also where proactive eviction lives: the
//! maintenance sweep walks each bucket from its head evicting expired
//! segments, and a merge pass periodically compacts a handful of
//! consecutive segments in one bucket into a single fresher one,
//! keeping the highest-frequency items and discarding the rest.

use crate::error::CacheError;
use crate::heap::{AddItemError, Heap};
use crate::index::HashIndex;
use crate::item::Item;
use crate::segment::{now_as_secs, NONE_SEGMENT};

const N_BUCKET_PER_STEP: u32 = 256;

const INTERVAL_1: u32 = 8;
const INTERVAL_2: u32 = 128;
const INTERVAL_3: u32 = 2048;
const INTERVAL_4: u32 = 32768;

const BOUNDARY_1: u32 = 2048;
const BOUNDARY_2: u32 = 34816;
const BOUNDARY_3: u32 = 559104;
const BOUNDARY_4: u32 = 8947712;

pub const TOTAL_BUCKETS: usize = N_BUCKET_PER_STEP as usize * 4;

/// How many consecutive segments a merge pass considers at once.
const MERGE_SPAN: usize = 3;

/// Maps a TTL in seconds to one of the 1024 buckets across the four
/// geometric ranges, `None` if it falls outside the supported range
/// (negative, in the original's signed `int ttl`, or at/above
/// `BOUNDARY_4`) — the original's `getIdxByTTL` returns -1 for both,
/// and a write whose TTL maps to no bucket is rejected rather than
/// silently clamped (S4).
pub fn get_bucket_index(ttl_seconds: u32) -> Option<usize> {
    if ttl_seconds < BOUNDARY_1 {
        Some((ttl_seconds / INTERVAL_1) as usize)
    } else if ttl_seconds < BOUNDARY_2 {
        Some(((ttl_seconds - BOUNDARY_1) / INTERVAL_2) as usize + N_BUCKET_PER_STEP as usize)
    } else if ttl_seconds < BOUNDARY_3 {
        Some(((ttl_seconds - BOUNDARY_2) / INTERVAL_3) as usize + N_BUCKET_PER_STEP as usize * 2)
    } else if ttl_seconds < BOUNDARY_4 {
        Some(((ttl_seconds - BOUNDARY_3) / INTERVAL_4) as usize + N_BUCKET_PER_STEP as usize * 3)
    } else {
        None
    }
}

fn bucket_width_seconds(idx: usize) -> u32 {
    match idx / N_BUCKET_PER_STEP as usize {
        0 => INTERVAL_1,
        1 => INTERVAL_2,
        2 => INTERVAL_3,
        _ => INTERVAL_4,
    }
}

/// Fixed per-bucket width (8s/128s/2048s/32768s, by range). Every
/// segment that lands in this bucket expires once
/// `now - last_use_timestamp >= ttl`, so two keys with slightly
/// different requested TTLs that round to the same bucket share
/// its (coarser) effective expiry.
struct TtlBucket {
    ttl: u32,
    head: u32,
    tail: u32,
}

impl TtlBucket {
    fn new(ttl: u32) -> Self {
        Self {
            ttl,
            head: NONE_SEGMENT,
            tail: NONE_SEGMENT,
        }
    }

    fn is_empty(&self) -> bool {
        self.head == NONE_SEGMENT
    }

    fn push_tail(&mut self, heap: &mut Heap, id: u32) {
        if self.tail != NONE_SEGMENT {
            heap.get_segment_header_mut(self.tail).unwrap().next = id;
        } else {
            self.head = id;
        }
        self.tail = id;
        heap.get_segment_header_mut(id).unwrap().next = NONE_SEGMENT;
    }

    /// First `count` segment ids starting from the head, or fewer if
    /// the chain is shorter.
    fn leading_segments(&self, heap: &Heap, count: usize) -> Vec<u32> {
        let mut ids = Vec::with_capacity(count);
        let mut cur = self.head;
        while ids.len() < count && cur != NONE_SEGMENT {
            ids.push(cur);
            cur = heap.get_segment_header(cur).unwrap().next;
        }
        ids
    }

    /// Replaces the leading run `old_ids` (must currently be a prefix
    /// of the chain) with a single segment `new_id`.
    fn replace_leading_run(&mut self, heap: &mut Heap, old_ids: &[u32], new_id: u32) {
        let tail_of_run = *old_ids.last().unwrap();
        let rest = heap.get_segment_header(tail_of_run).unwrap().next;
        heap.get_segment_header_mut(new_id).unwrap().next = rest;
        self.head = new_id;
        if rest == NONE_SEGMENT {
            self.tail = new_id;
        }
    }
}

metrics::static_metrics! {
    static TTL_WRITE: metrics::Counter;
    static TTL_EXPIRE: metrics::Counter;
    static TTL_MERGE: metrics::Counter;
}

/// Owns one tier's TTL buckets and drives both the write path's
/// segment-allocation-and-retry and the maintenance sweep's eviction.
pub struct TtlBucketGroup {
    buckets: Vec<TtlBucket>,
    merge_cursor: usize,
    tier: u8,
}

impl TtlBucketGroup {
    pub fn new(tier: u8) -> Self {
        let buckets = (0..TOTAL_BUCKETS)
            .map(|idx| TtlBucket::new(bucket_width_seconds(idx)))
            .collect();
        Self {
            buckets,
            merge_cursor: 0,
            tier,
        }
    }

    /// Appends `item` to the bucket selected by `ttl_seconds`, updating
    /// `index` with its new location. Allocates a fresh tail segment
    /// when the current one is absent or full; if the heap is out of
    /// segments, triggers one merge-eviction pass on this tier and
    /// retries exactly once before giving up (Section 4.3).
    pub fn write(
        &mut self,
        heap: &mut Heap,
        index: &mut HashIndex,
        ttl_seconds: u32,
        item: &Item,
    ) -> Result<(), CacheError> {
        let bucket_idx = get_bucket_index(ttl_seconds).ok_or(CacheError::InvalidArgument)?;

        for attempt in 0..2 {
            let bucket = &mut self.buckets[bucket_idx];
            if bucket.tail != NONE_SEGMENT {
                match heap.add_item(bucket.tail, item) {
                    Ok(offset) => {
                        index.insert(&item.key, self.tier, bucket.tail, offset);
                        TTL_WRITE.incr();
                        return Ok(());
                    }
                    Err(AddItemError::Failed(e)) => return Err(e),
                    Err(AddItemError::NotEnoughSpace) => {}
                }
            }

            match heap.allocate_segment() {
                Some(id) => {
                    self.buckets[bucket_idx].push_tail(heap, id);
                    let offset = heap.add_item(id, item).map_err(|e| match e {
                        AddItemError::Failed(e) => e,
                        AddItemError::NotEnoughSpace => CacheError::ValueTooLarge,
                    })?;
                    index.insert(&item.key, self.tier, id, offset);
                    TTL_WRITE.incr();
                    return Ok(());
                }
                None => {
                    if attempt == 0 {
                        self.merge_once(heap, index);
                    }
                }
            }
        }

        Err(CacheError::OutOfSegments)
    }

    /// Walks every segment in every bucket's chain exactly once,
    /// unlinking and freeing any that are already flagged `deleted` or
    /// `expired`, or that have outlived the bucket's TTL by wall clock.
    /// The flag check mirrors the original sweep (which never consults
    /// the clock itself, relying on something else to have set the
    /// flag); the age check is this implementation's own belt: either
    /// the write path or this sweep can be the first to notice an
    /// expired segment (Design Notes — Open Questions).
    pub fn sweep_expired(&mut self, heap: &mut Heap) -> usize {
        let now = now_as_secs();
        let mut reclaimed = 0;
        for bucket in &mut self.buckets {
            let mut cur = bucket.head;
            let mut prev = NONE_SEGMENT;
            while cur != NONE_SEGMENT {
                let header = *heap.get_segment_header(cur).unwrap();
                let next = header.next;
                let expired_by_age =
                    bucket.ttl != 0 && now.saturating_sub(header.last_use_timestamp) >= bucket.ttl;

                if header.is_deleted() || header.is_expired() || expired_by_age {
                    if prev == NONE_SEGMENT {
                        bucket.head = next;
                    } else {
                        heap.get_segment_header_mut(prev).unwrap().next = next;
                    }
                    if bucket.tail == cur {
                        bucket.tail = prev;
                    }
                    let _ = heap.free_segment(cur);
                    reclaimed += 1;
                } else {
                    prev = cur;
                }
                cur = next;
            }
        }
        if reclaimed > 0 {
            TTL_EXPIRE.add(reclaimed as u64);
        }
        reclaimed
    }

    /// Performs one merge-eviction step, starting at `merge_cursor` and
    /// scanning forward (wrapping once through every bucket at most)
    /// until it finds one with at least two segments to merge. Every
    /// bucket the scan visits, empty or not, advances the cursor, so a
    /// later call resumes where this one left off rather than
    /// re-inspecting buckets that turned out empty. Called directly by
    /// the write path on an out-of-segments condition, and by the
    /// maintenance sweep on a timer (Section 4.4).
    pub fn merge_once(&mut self, heap: &mut Heap, index: &mut HashIndex) {
        let total = self.buckets.len();
        let mut found = None;
        for _ in 0..total {
            let idx = self.merge_cursor;
            self.merge_cursor = (self.merge_cursor + 1) % total;
            let run = self.buckets[idx].leading_segments(heap, MERGE_SPAN);
            if run.len() >= 2 {
                found = Some((idx, run));
                break;
            }
        }
        let Some((start, run)) = found else {
            return;
        };

        let mut candidates: Vec<(Vec<u8>, u32, u32, u8)> = Vec::new();
        for &id in &run {
            let header = *heap.get_segment_header(id).unwrap();
            let mut offset = 0u32;
            while offset < header.filled_size {
                let item = match heap.read_item(id, offset) {
                    Ok(item) => item,
                    Err(_) => break,
                };
                let counter = index
                    .get_frequency(&item.key, self.tier, id, offset)
                    .unwrap_or(0);
                let item_size = item.header.item_size() as u32;
                candidates.push((item.key, id, offset, counter));
                offset += item_size;
            }
        }

        candidates.sort_by(|a, b| b.3.cmp(&a.3));

        let Some(new_id) = heap.allocate_segment() else {
            return;
        };

        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (key, old_seg, old_offset, _counter) in candidates {
            let Ok(item) = heap.read_item(old_seg, old_offset) else {
                continue;
            };
            match heap.add_item(new_id, &item) {
                Ok(new_offset) => kept.push((key, old_seg, old_offset, new_offset)),
                Err(_) => dropped.push((key, old_seg, old_offset)),
            }
        }

        for (key, old_seg, old_offset, new_offset) in &kept {
            index.delete(key, self.tier, *old_seg, *old_offset);
            index.insert(key, self.tier, new_id, *new_offset);
        }
        for (key, old_seg, old_offset) in &dropped {
            index.delete(key, self.tier, *old_seg, *old_offset);
        }

        self.buckets[start].replace_leading_run(heap, &run, new_id);
        for &id in &run {
            let _ = heap.free_segment(id);
        }
        TTL_MERGE.incr();
    }
}
