// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-segment backing files for the file tier. Each segment owns one
//! file, `<cache_dir>/<id>.cache`, a plain concatenation of items
//! (Section 6); there is no pool-wide mapping the way the in-memory
//! tier has one, since segments are created and deleted independently.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The backing file for one file-tier segment.
pub struct SegmentFile {
    file: File,
}

impl SegmentFile {
    /// Path convention: decimal id, no padding, `.cache` extension.
    pub fn path_for(cache_dir: &Path, segment_id: u32) -> PathBuf {
        cache_dir.join(format!("{segment_id}.cache"))
    }

    /// Creates (or truncates) the backing file for a freshly allocated
    /// segment.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Opens an existing segment's backing file for read/write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Appends `bytes` at `offset`, the pre-append `filled_size` of the
    /// segment. A single sequential write, since the item was already
    /// serialized header-key-value contiguously by the caller.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), std::io::Error> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, std::io::Error> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn flush(&mut self) -> Result<(), std::io::Error> {
        self.file.flush()
    }

    /// Removes a segment's backing file if it exists; a missing file is
    /// not an error, mirroring the original's `access()`-then-`remove()`
    /// guard around `free_segment`.
    pub fn remove(cache_dir: &Path, segment_id: u32) -> Result<(), std::io::Error> {
        let path = Self::path_for(cache_dir, segment_id);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = SegmentFile::path_for(dir.path(), 3);
        let mut f = SegmentFile::create(&path).unwrap();
        f.write_at(0, b"hello world").unwrap();
        let back = f.read_at(0, 5).unwrap();
        assert_eq!(back, b"hello");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        SegmentFile::remove(dir.path(), 42).unwrap();
        SegmentFile::remove(dir.path(), 42).unwrap();
    }
}
