// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-tier backing storage a [`crate::heap::Heap`] reads and writes
//! segment payloads into. The in-memory tier backs its segments with
//! an anonymous mapping ([`memory::Memory`]); the file tier backs each
//! segment with its own file ([`file::SegmentFile`]) rather than one
//! pool-wide mapping, since segments come and go independently there.

mod file;
mod memory;

pub use file::SegmentFile;
pub use memory::Memory;
