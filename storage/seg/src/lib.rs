// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Segment-structured storage with eager TTL-based expiration.
//!
//! Values are packed into fixed-size segments that live in one or more
//! tiers (in-memory, file-backed, or both). A segment belongs to
//! exactly one TTL bucket at a time; buckets are swept for expired
//! segments and merged to reclaim space from segments with stale
//! items, without ever touching a live item in place.

pub mod cache;
pub mod datapool;
pub mod error;
pub mod heap;
pub mod index;
pub mod item;
pub mod segment;
pub mod ttl;

pub use cache::{Cache, TierConfig};
pub use error::CacheError;
