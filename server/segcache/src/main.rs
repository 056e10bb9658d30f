// Copyright 2024 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Thin bootstrap binary: loads config, installs the logger, builds the
//! two-tier cache core, registers its shared-memory demand, and drives
//! the maintenance loop. No network front end lives here; that's the
//! out-of-scope command-line/session layer.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, KernelConfig};
use rustcommon_logger::{Level, Logger};
use seg::{Cache, TierConfig};

/// In-memory tier: 1 MiB segments, 64 of them (64 MiB resident).
const MEM_SEGMENT_SIZE: u32 = 1024 * 1024;
const MEM_SEGMENT_COUNT: u32 = 64;

/// File tier: 8 MiB segments, 256 of them (2 GiB on disk).
const FILE_SEGMENT_SIZE: u32 = 8 * 1024 * 1024;
const FILE_SEGMENT_COUNT: u32 = 256;

const HASH_TABLE_SIZE: usize = 1 << 20;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);

/// Bytes the cache worker claims from the shared memory table for its
/// own bookkeeping. The table's only worked example today.
const TEST_COUNTER_REGION_SIZE: usize = 8;

fn main() {
    Logger::new()
        .label("segcache")
        .level(Level::Info)
        .init()
        .expect("failed to initialize logger");

    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).unwrap_or_else(|e| {
            log::error!("{e}");
            std::process::exit(1);
        }),
        None => Config::default(),
    };

    let configured_shmem_size = config.kernel().shmem_size();
    if configured_shmem_size < 0 {
        log::error!("kernel.shmem_size must not be negative, got {configured_shmem_size}");
        std::process::exit(1);
    }

    // The config file's shmem_size is a floor, not this worker's actual
    // demand; grow the mapping to whatever this worker's own regions
    // need and report that back through the setter so anything reading
    // the config afterward (the master, on restart) sees what was
    // really claimed rather than the configured minimum.
    let required_shmem_size = TEST_COUNTER_REGION_SIZE as i64;
    let mapped_shmem_size = configured_shmem_size.max(required_shmem_size);

    let mut shmem_table = shmem::SharedAreaTable::map(mapped_shmem_size as usize).unwrap_or_else(|e| {
        log::error!("{e}");
        std::process::exit(1);
    });
    match shmem_table.register_shared_area("testCounter", TEST_COUNTER_REGION_SIZE) {
        Ok(area) => log::debug!("registered testCounter region, found={}", area.found),
        Err(e) => log::warn!("failed to register testCounter region: {e}"),
    }
    config.kernel_mut().set_shmem_size(mapped_shmem_size);

    let cache_dir = PathBuf::from(config.kernel().data_dir());
    let tiers = vec![
        TierConfig {
            segment_size: MEM_SEGMENT_SIZE,
            segment_count: MEM_SEGMENT_COUNT,
            cache_dir: None,
        },
        TierConfig {
            segment_size: FILE_SEGMENT_SIZE,
            segment_count: FILE_SEGMENT_COUNT,
            cache_dir: Some(cache_dir),
        },
    ];

    let mut cache = Cache::init(HASH_TABLE_SIZE, tiers).unwrap_or_else(|e| {
        log::error!("failed to initialize cache: {e}");
        std::process::exit(1);
    });

    log::info!("segcache ready, running maintenance every {MAINTENANCE_INTERVAL:?}");
    loop {
        std::thread::sleep(MAINTENANCE_INTERVAL);
        cache.run_maintenance();
    }
}
