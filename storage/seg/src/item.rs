// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The bit-exact item layout used inside a segment: a 6-byte header,
//! followed by a NUL-terminated key, followed by the raw value bytes.
//!
//! Items are append-only. There is no in-place update: writing the same
//! key again appends a fresh item and leaves the stale copy to expire
//! with its segment.

/// On-disk/in-memory size of an item header, before the key and value.
pub const ITEM_HEADER_SIZE: usize = 6;

/// Maximum key length a segment can carry (`key_size` is a single byte).
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

bitflags::bitflags! {
    /// Per-item flags. Only `DELETED` is defined today; the rest of the
    /// byte is reserved the way the original item header reserves it.
    #[derive(Default)]
    pub struct ItemFlags: u8 {
        const DELETED = 0x01;
    }
}

/// The parsed form of an item's header: `{value_size, key_size, flags}`.
/// The key itself is carried alongside rather than inline, since most
/// callers either already have it (on write) or want it copied out of
/// heap-owned bytes exactly once (on read).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemHeader {
    pub value_size: u32,
    pub key_size: u8,
    pub flags: ItemFlags,
}

impl ItemHeader {
    pub fn new(key: &[u8], value_size: u32) -> Self {
        assert!(key.len() <= MAX_KEY_LEN, "key exceeds 255 bytes");
        Self {
            value_size,
            key_size: key.len() as u8,
            flags: ItemFlags::empty(),
        }
    }

    /// Total on-the-wire size of this item: header + key + NUL + value.
    pub fn item_size(&self) -> usize {
        ITEM_HEADER_SIZE + self.key_size as usize + 1 + self.value_size as usize
    }

    /// Serializes the 6-byte header to bytes, little-endian, matching
    /// the `{value_size:u32-LE, key_size:u8, flags:u8}` wire layout.
    pub fn to_bytes(&self) -> [u8; ITEM_HEADER_SIZE] {
        let mut bytes = [0u8; ITEM_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.value_size.to_le_bytes());
        bytes[4] = self.key_size;
        bytes[5] = self.flags.bits();
        bytes
    }

    pub fn from_bytes(bytes: &[u8; ITEM_HEADER_SIZE]) -> Self {
        let value_size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Self {
            value_size,
            key_size: bytes[4],
            flags: ItemFlags::from_bits_truncate(bytes[5]),
        }
    }
}

/// A fully materialized item: header, key, and value, as handed back
/// from a successful `read_item`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub header: ItemHeader,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Item {
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        Self {
            header: ItemHeader::new(key, value.len() as u32),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Serializes the full item (header + key + NUL + value) as it is
    /// appended into a segment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.header.item_size());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.key);
        bytes.push(0);
        bytes.extend_from_slice(&self.value);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let header = ItemHeader::new(b"hello", 42);
        let bytes = header.to_bytes();
        let decoded = ItemHeader::from_bytes(&bytes);
        assert_eq!(header, decoded);
    }

    #[test]
    fn item_size_accounts_for_nul_terminator() {
        let header = ItemHeader::new(b"k1", 5);
        assert_eq!(header.item_size(), ITEM_HEADER_SIZE + 2 + 1 + 5);
    }

    #[test]
    fn item_bytes_are_header_key_nul_value() {
        let item = Item::new(b"k1", b"hello");
        let bytes = item.to_bytes();
        assert_eq!(bytes.len(), ITEM_HEADER_SIZE + 2 + 1 + 5);
        assert_eq!(&bytes[ITEM_HEADER_SIZE..ITEM_HEADER_SIZE + 2], b"k1");
        assert_eq!(bytes[ITEM_HEADER_SIZE + 2], 0);
        assert_eq!(&bytes[ITEM_HEADER_SIZE + 3..], b"hello");
    }
}
