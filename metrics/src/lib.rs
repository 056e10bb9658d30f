// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Lightweight atomic counters and gauges for Pelikan servers, plus a
//! `static_metrics!` macro for declaring a block of them at once.
//!
//! This is the same shape as the statics used throughout the storage
//! engine (`EXPIRE_TIME.add(...)`, `CLEAR_TIME.add(...)`): a `'static`
//! reference that's cheap to update from the single maintenance thread
//! and cheap to read from anywhere else.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing count (operations performed, bytes moved).
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// A value that moves up and down (segments free, items live).
pub struct Gauge(AtomicI64);

impl Gauge {
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn incr(&self) {
        self.add(1);
    }

    pub fn decr(&self) {
        self.add(-1);
    }

    pub fn add(&self, amount: i64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a block of `'static` `Counter`/`Gauge` statics in one place,
/// mirroring the metric blocks generated elsewhere in Pelikan by the
/// `#[metric]` macro, without needing the macro machinery.
///
/// ```ignore
/// static_metrics! {
///     static EXPIRE_TIME: Counter;
///     static CLEAR_TIME: Counter;
///     static SEGMENTS_FREE: Gauge;
/// }
/// ```
#[macro_export]
macro_rules! static_metrics {
    ($(static $name:ident: $ty:ident;)*) => {
        $(
            pub static $name: $crate::$ty = $crate::$ty::new();
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    static_metrics! {
        static REQUESTS: Counter;
        static INFLIGHT: Gauge;
    }

    #[test]
    fn counter_accumulates() {
        REQUESTS.incr();
        REQUESTS.add(4);
        assert_eq!(REQUESTS.value(), 5);
    }

    #[test]
    fn gauge_moves_both_ways() {
        INFLIGHT.incr();
        INFLIGHT.incr();
        INFLIGHT.decr();
        assert_eq!(INFLIGHT.value(), 1);
    }
}
