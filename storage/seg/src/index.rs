// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The bit-packed, open-addressed hash index: maps a key to the
//! `(tier, segment, offset)` of its most recently written item, with an
//! 11-bit tag for cheap mismatch rejection and an 8-bit Approximate
//! Smoothed Frequency Counter (ASFC) carried inline in the same word.
//!
//! Buckets are bulk-chained: the first 8-slot block reserves its slot 0
//! for the bucket head word (chain length + a coarse last-use
//! timestamp); every block after it reserves its own slot 0 too, so the
//! per-block pointer capacity is a uniform 7 slots throughout the
//! chain. This lives entirely in the cache worker's private memory
//! (Design Notes, Open Questions), so there's no wire format to keep
//! bit-exact across blocks the way the packed pointer itself is.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::CacheError;
use crate::heap::Heap;
use crate::item::Item;

const SLOTS_PER_BLOCK: usize = 8;
const DATA_SLOTS_PER_BLOCK: usize = SLOTS_PER_BLOCK - 1;

const TIER_BITS: u32 = 1;
const TAG_BITS: u32 = 11;
const COUNTER_BITS: u32 = 8;
const OFFSET_BITS: u32 = 20;
const SEGMENT_BITS: u32 = 24;

const TIER_SHIFT: u32 = 0;
const TAG_SHIFT: u32 = TIER_SHIFT + TIER_BITS;
const COUNTER_SHIFT: u32 = TAG_SHIFT + TAG_BITS;
const OFFSET_SHIFT: u32 = COUNTER_SHIFT + COUNTER_BITS;
const SEGMENT_SHIFT: u32 = OFFSET_SHIFT + OFFSET_BITS;

const fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// A 64-bit encoded reference to a stored item:
/// `[segment_idx: 24][segment_offset: 20][frequency_counter: 8][tag: 11][tier: 1]`.
///
/// An all-zero word means "empty" (Section 4.2's slot state machine).
/// This is the same sentinel ambiguity the original hash table has —
/// a live item at tier 0, segment 0, offset 0, tag 0, counter 0 is
/// indistinguishable from an empty slot — and it's preserved here
/// rather than "fixed", since nothing in this design ever actually
/// produces that all-zero combination (tag is derived from the key's
/// hash, and a key hashing to tag 0 at segment/offset 0 is vanishingly
/// unlikely and harmless if it occurs: the slot is simply treated as
/// empty and a fresh insert would overwrite it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PackedPtr(u64);

impl PackedPtr {
    pub fn encode(tier: u8, segment: u32, offset: u32, counter: u8, tag: u16) -> Self {
        let mut bits = 0u64;
        bits |= (tier as u64 & mask(TIER_BITS)) << TIER_SHIFT;
        bits |= (tag as u64 & mask(TAG_BITS)) << TAG_SHIFT;
        bits |= (counter as u64 & mask(COUNTER_BITS)) << COUNTER_SHIFT;
        bits |= (offset as u64 & mask(OFFSET_BITS)) << OFFSET_SHIFT;
        bits |= (segment as u64 & mask(SEGMENT_BITS)) << SEGMENT_SHIFT;
        Self(bits)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn tier(self) -> u8 {
        ((self.0 >> TIER_SHIFT) & mask(TIER_BITS)) as u8
    }

    pub fn tag(self) -> u16 {
        ((self.0 >> TAG_SHIFT) & mask(TAG_BITS)) as u16
    }

    pub fn counter(self) -> u8 {
        ((self.0 >> COUNTER_SHIFT) & mask(COUNTER_BITS)) as u8
    }

    pub fn offset(self) -> u32 {
        ((self.0 >> OFFSET_SHIFT) & mask(OFFSET_BITS)) as u32
    }

    pub fn segment(self) -> u32 {
        ((self.0 >> SEGMENT_SHIFT) & mask(SEGMENT_BITS)) as u32
    }

    fn with_counter(self, counter: u8) -> Self {
        let cleared = self.0 & !(mask(COUNTER_BITS) << COUNTER_SHIFT);
        Self(cleared | ((counter as u64 & mask(COUNTER_BITS)) << COUNTER_SHIFT))
    }
}

/// Bucket head word: `[chain_length: 8][last_use_timestamp_low: 16][reserved: 40]`.
#[derive(Clone, Copy, Debug, Default)]
struct BucketHead {
    chain_length: u8,
    last_use_timestamp_low: u16,
}

type Block = [PackedPtr; SLOTS_PER_BLOCK];

struct Bucket {
    head: BucketHead,
    blocks: Vec<Block>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            head: BucketHead {
                chain_length: 1,
                last_use_timestamp_low: 0,
            },
            blocks: vec![[PackedPtr::default(); SLOTS_PER_BLOCK]],
        }
    }

    /// Iterates over the bucket's data slots in append order (block 0's
    /// slots 1..8, then block 1's slots 1..8, ...).
    fn data_slots(&self) -> impl DoubleEndedIterator<Item = (usize, usize)> + '_ {
        (0..self.blocks.len()).flat_map(|block| (1..SLOTS_PER_BLOCK).map(move |slot| (block, slot)))
    }

    fn get_slot(&self, block: usize, slot: usize) -> PackedPtr {
        self.blocks[block][slot]
    }

    fn set_slot(&mut self, block: usize, slot: usize, value: PackedPtr) {
        self.blocks[block][slot] = value;
    }

    fn occupied_count(&self) -> usize {
        self.data_slots()
            .filter(|&(b, s)| !self.get_slot(b, s).is_empty())
            .count()
    }

    /// Appends `ptr` immediately after the last occupied slot, growing
    /// the chain with a fresh block if every existing block is full.
    fn push(&mut self, ptr: PackedPtr) {
        let occupied = self.occupied_count();
        if occupied == self.blocks.len() * DATA_SLOTS_PER_BLOCK {
            self.blocks.push([PackedPtr::default(); SLOTS_PER_BLOCK]);
            self.head.chain_length = self.blocks.len() as u8;
        }
        let position = self.data_slots().nth(occupied).expect("room was just ensured");
        self.set_slot(position.0, position.1, ptr);
    }

    /// Removes the slot at `(block, slot)` by swapping in the globally
    /// last occupied slot, keeping all occupied slots dense from the
    /// front. Frees a trailing all-empty block.
    fn remove_at(&mut self, block: usize, slot: usize) {
        let occupied = self.occupied_count();
        if occupied == 0 {
            return;
        }
        let last = self.data_slots().nth(occupied - 1).unwrap();
        let last_value = self.get_slot(last.0, last.1);
        self.set_slot(block, slot, last_value);
        if last != (block, slot) {
            self.set_slot(last.0, last.1, PackedPtr::default());
        } else {
            self.set_slot(block, slot, PackedPtr::default());
        }

        while self.blocks.len() > 1 {
            let tail = self.blocks.len() - 1;
            if (1..SLOTS_PER_BLOCK).all(|s| self.blocks[tail][s].is_empty()) {
                self.blocks.pop();
                self.head.chain_length = self.blocks.len() as u8;
            } else {
                break;
            }
        }
    }

    fn chain_length(&self) -> u8 {
        self.head.chain_length
    }
}

fn additional_hash(hash: u32) -> u16 {
    ((hash & 0x07ff_0000) >> 16) as u16
}

const fn rot(x: u32, k: u32) -> u32 {
    (x << k) | (x >> (32 - k))
}

#[allow(clippy::many_single_char_names)]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= rot(*c, 4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= rot(*a, 6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= rot(*b, 8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= rot(*c, 16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= rot(*a, 19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= rot(*b, 4);
    *b = b.wrapping_add(*a);
}

#[allow(clippy::many_single_char_names)]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(rot(*b, 14));
    *a ^= *c;
    *a = a.wrapping_sub(rot(*c, 11));
    *b ^= *a;
    *b = b.wrapping_sub(rot(*a, 25));
    *c ^= *b;
    *c = c.wrapping_sub(rot(*b, 16));
    *a ^= *c;
    *a = a.wrapping_sub(rot(*c, 4));
    *b ^= *a;
    *b = b.wrapping_sub(rot(*a, 14));
    *c ^= *b;
    *c = c.wrapping_sub(rot(*b, 24));
}

/// Bob Jenkins' lookup3, ported directly from the original's `mix`/
/// `final` macros: 12 bytes consumed per round, with the standard
/// length-remainder tail handled by zero-padding the last partial
/// chunk (equivalent to the original's explicit per-length bit masks).
pub fn lookup3(key: &[u8]) -> u32 {
    const INIT_VALUE: u32 = 31;
    let mut length = key.len();
    let mut a: u32 = 0xdeadbeefu32
        .wrapping_add(length as u32)
        .wrapping_add(INIT_VALUE);
    let mut b = a;
    let mut c = a;
    let mut rest = key;

    while length > 12 {
        a = a.wrapping_add(u32::from_le_bytes(rest[0..4].try_into().unwrap()));
        b = b.wrapping_add(u32::from_le_bytes(rest[4..8].try_into().unwrap()));
        c = c.wrapping_add(u32::from_le_bytes(rest[8..12].try_into().unwrap()));
        mix(&mut a, &mut b, &mut c);
        length -= 12;
        rest = &rest[12..];
    }

    if length == 0 {
        return c;
    }

    let mut tail = [0u8; 12];
    tail[..length].copy_from_slice(&rest[..length]);
    a = a.wrapping_add(u32::from_le_bytes(tail[0..4].try_into().unwrap()));
    b = b.wrapping_add(u32::from_le_bytes(tail[4..8].try_into().unwrap()));
    c = c.wrapping_add(u32::from_le_bytes(tail[8..12].try_into().unwrap()));
    final_mix(&mut a, &mut b, &mut c);
    c
}

metrics::static_metrics! {
    static HASH_INSERT: metrics::Counter;
    static HASH_GET_HIT: metrics::Counter;
    static HASH_GET_MISS: metrics::Counter;
}

pub struct HashIndex {
    buckets: Vec<Bucket>,
    mask: u64,
    rng: Xoshiro256PlusPlus,
}

impl HashIndex {
    /// `size` must be a power of two; the bucket index is `hash & (size - 1)`.
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "hash table size must be a power of two");
        Self {
            buckets: (0..size).map(|_| Bucket::new()).collect(),
            mask: size as u64 - 1,
            rng: Xoshiro256PlusPlus::from_rng(rand::thread_rng()).expect("failed to seed ASFC rng"),
        }
    }

    fn bucket_index(&self, hash: u32) -> usize {
        (hash as u64 & self.mask) as usize
    }

    /// Appends a packed pointer to the end of the bucket chain. No
    /// duplicate-key detection: a repeated key produces a second
    /// pointer, and `get` resolves the ambiguity by scanning newest to
    /// oldest (see module docs).
    pub fn insert(&mut self, key: &[u8], tier: u8, segment: u32, offset: u32) {
        let hash = lookup3(key);
        let tag = additional_hash(hash);
        let idx = self.bucket_index(hash);
        let ptr = PackedPtr::encode(tier, segment, offset, 0, tag);
        self.buckets[idx].push(ptr);
        HASH_INSERT.incr();
    }

    /// Looks up `key`, reading the winning item back out of `heaps`
    /// (indexed by tier) and bumping its ASFC counter + the bucket's
    /// last-use timestamp on a hit.
    pub fn get(&mut self, key: &[u8], heaps: &mut [Heap]) -> Result<Item, CacheError> {
        let hash = lookup3(key);
        let tag = additional_hash(hash);
        let idx = self.bucket_index(hash);

        // Newest first: satisfies "the most recent insert for a key is
        // returned first during get" (Section 5) regardless of how
        // many stale duplicates an unconditionally-appending insert
        // has left behind.
        let candidates: Vec<(usize, usize)> = self.buckets[idx].data_slots().collect();
        for &(block, slot) in candidates.iter().rev() {
            let ptr = self.buckets[idx].get_slot(block, slot);
            if ptr.is_empty() || ptr.tag() != tag {
                continue;
            }
            let tier = ptr.tier() as usize;
            let Some(heap) = heaps.get_mut(tier) else { continue };
            let Ok((header, candidate_key)) = heap.get_item_header(ptr.segment(), ptr.offset())
            else {
                continue;
            };
            if candidate_key != key {
                continue;
            }
            let Ok(item) = heap.read_item(ptr.segment(), ptr.offset()) else {
                continue;
            };
            debug_assert_eq!(item.header, header);

            let bumped = ptr.with_counter(increment_asfc(ptr.counter(), &mut self.rng));
            self.buckets[idx].set_slot(block, slot, bumped);
            self.buckets[idx].head.last_use_timestamp_low =
                crate::segment::now_as_secs() as u16;

            HASH_GET_HIT.incr();
            return Ok(item);
        }
        HASH_GET_MISS.incr();
        Err(CacheError::NotFound)
    }

    /// Zeros the slot at `(tier, segment, offset)` and compacts the
    /// chain. Idempotent: deleting an absent pointer is a no-op, not an
    /// error (Section 8, property 6).
    pub fn delete(&mut self, key: &[u8], tier: u8, segment: u32, offset: u32) {
        let hash = lookup3(key);
        let idx = self.bucket_index(hash);
        if let Some((block, slot)) = self.locate(idx, tier, segment, offset) {
            self.buckets[idx].remove_at(block, slot);
        }
    }

    pub fn get_frequency(&self, key: &[u8], tier: u8, segment: u32, offset: u32) -> Option<u8> {
        let hash = lookup3(key);
        let idx = self.bucket_index(hash);
        let (block, slot) = self.locate(idx, tier, segment, offset)?;
        Some(self.buckets[idx].get_slot(block, slot).counter())
    }

    fn locate(&self, bucket_idx: usize, tier: u8, segment: u32, offset: u32) -> Option<(usize, usize)> {
        self.buckets[bucket_idx].data_slots().find(|&(b, s)| {
            let ptr = self.buckets[bucket_idx].get_slot(b, s);
            !ptr.is_empty() && ptr.tier() == tier && ptr.segment() == segment && ptr.offset() == offset
        })
    }

    /// Number of blocks the given key's bucket chain currently has.
    pub fn chain_length(&self, key: &[u8]) -> u8 {
        let hash = lookup3(key);
        let idx = self.bucket_index(hash);
        self.buckets[idx].chain_length()
    }
}

fn increment_asfc(counter: u8, rng: &mut Xoshiro256PlusPlus) -> u8 {
    if counter < 16 {
        counter + 1
    } else if counter < 128 {
        let probability = 1.0 / counter as f64;
        if rng.gen::<f64>() < probability {
            counter + 1
        } else {
            counter
        }
    } else {
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_pointer_round_trips() {
        let ptr = PackedPtr::encode(1, 0x00FFFF, 0x0ABCDE, 0x42, 0x5A5);
        assert_eq!(ptr.tier(), 1);
        assert_eq!(ptr.segment(), 0x00FFFF);
        assert_eq!(ptr.offset(), 0x0ABCDE);
        assert_eq!(ptr.counter(), 0x42);
        assert_eq!(ptr.tag(), 0x5A5);
    }

    #[test]
    fn bucket_grows_a_new_block_once_the_first_is_full() {
        let mut bucket = Bucket::new();
        assert_eq!(bucket.chain_length(), 1);
        for i in 0..DATA_SLOTS_PER_BLOCK {
            bucket.push(PackedPtr::encode(0, i as u32, 0, 0, 0));
        }
        assert_eq!(bucket.chain_length(), 1);
        bucket.push(PackedPtr::encode(0, 99, 0, 0, 0));
        assert_eq!(bucket.chain_length(), 2);
    }

    #[test]
    fn remove_compacts_and_frees_trailing_block() {
        let mut bucket = Bucket::new();
        for i in 0..DATA_SLOTS_PER_BLOCK + 1 {
            bucket.push(PackedPtr::encode(0, i as u32, 0, 0, 0));
        }
        assert_eq!(bucket.chain_length(), 2);
        // remove the one pointer that forced the second block
        let pos = bucket
            .data_slots()
            .find(|&(b, s)| bucket.get_slot(b, s).segment() == DATA_SLOTS_PER_BLOCK as u32)
            .unwrap();
        bucket.remove_at(pos.0, pos.1);
        assert_eq!(bucket.chain_length(), 1);
        assert_eq!(bucket.occupied_count(), DATA_SLOTS_PER_BLOCK);
    }

    #[test]
    fn lookup3_is_deterministic_and_sensitive_to_every_byte() {
        assert_eq!(lookup3(b"hello"), lookup3(b"hello"));
        assert_ne!(lookup3(b"hello"), lookup3(b"hellp"));
        assert_ne!(lookup3(b""), lookup3(b"a"));
    }

    #[test]
    fn asfc_is_monotonic_under_deterministic_growth() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut counter = 0u8;
        for _ in 0..16 {
            let next = increment_asfc(counter, &mut rng);
            assert!(next >= counter);
            counter = next;
        }
        assert_eq!(counter, 16);
    }

    #[test]
    fn asfc_saturates_at_128() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut counter = 127u8;
        // probabilistic region: run enough draws that a fair
        // implementation will certainly cross into saturation
        for _ in 0..100_000 {
            counter = increment_asfc(counter, &mut rng);
            if counter == 128 {
                break;
            }
        }
        assert_eq!(counter, 128);
        assert_eq!(increment_asfc(counter, &mut rng), 128);
    }
}
