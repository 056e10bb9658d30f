// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The fixed-size unit of allocation and eviction: a 16-byte header
//! plus a fixed-size payload region owned by a [`crate::heap::Heap`].

use std::time::{SystemTime, UNIX_EPOCH};

/// On-disk/in-memory size of a segment header.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Sentinel meaning "no segment" wherever a 24-bit segment id field is
/// stored (the free-pool/bucket-chain `next` link, a bucket's head/tail).
/// All-ones in the 24-bit field, as in the original C implementation.
pub const NONE_SEGMENT: u32 = 0x00FF_FFFF;

bitflags::bitflags! {
    /// Segment header flags.
    #[derive(Default)]
    pub struct SegmentFlags: u8 {
        /// Segment is on the heap's free pool; none of its bytes are live.
        const DELETED = 0x01;
        /// Segment was selected as a merge source by the current pass.
        const MERGE_CANDIDATE = 0x02;
        /// Segment has outlived its bucket's max TTL and is due for the
        /// sweep to unlink it; set by the write path or the sweep itself
        /// (see Design Notes — Open Questions), never by a reader.
        const EXPIRED = 0x04;
    }
}

/// The 16-byte header every segment carries:
/// `{next_segment_id, last_use_timestamp, filled_size, item_count, flags, reserved}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub next: u32,
    pub last_use_timestamp: u32,
    pub filled_size: u32,
    pub item_count: u16,
    pub flags: SegmentFlags,
    reserved: u8,
}

impl SegmentHeader {
    pub fn new(next: u32) -> Self {
        Self {
            next,
            last_use_timestamp: now_as_secs(),
            filled_size: 0,
            item_count: 0,
            flags: SegmentFlags::DELETED,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.next.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.last_use_timestamp.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.filled_size.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.item_count.to_le_bytes());
        bytes[14] = self.flags.bits();
        bytes[15] = self.reserved;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Self {
        Self {
            next: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            last_use_timestamp: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            filled_size: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            item_count: u16::from_le_bytes([bytes[12], bytes[13]]),
            flags: SegmentFlags::from_bits_truncate(bytes[14]),
            reserved: bytes[15],
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(SegmentFlags::DELETED)
    }

    pub fn is_expired(&self) -> bool {
        self.flags.contains(SegmentFlags::EXPIRED)
    }

    pub fn mark_expired(&mut self) {
        self.flags.insert(SegmentFlags::EXPIRED);
    }

    pub fn touch(&mut self) {
        self.last_use_timestamp = now_as_secs();
    }
}

/// Wall-clock seconds since the Unix epoch, truncated to 32 bits. The
/// header only ever compares two of these (`now - last_use_timestamp`),
/// so wraparound at the 32-bit boundary is immaterial for any TTL this
/// cache supports (max ~97 days, Section 3).
pub fn now_as_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_secs() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let mut header = SegmentHeader::new(NONE_SEGMENT);
        header.filled_size = 128;
        header.item_count = 3;
        header.flags = SegmentFlags::MERGE_CANDIDATE;
        let bytes = header.to_bytes();
        let decoded = SegmentHeader::from_bytes(&bytes);
        assert_eq!(header, decoded);
    }

    #[test]
    fn fresh_segment_is_marked_deleted_until_allocated() {
        let header = SegmentHeader::new(7);
        assert!(header.is_deleted());
        assert_eq!(header.next, 7);
        assert_eq!(header.filled_size, 0);
    }
}
