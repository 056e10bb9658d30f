// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const KERNEL_DATA_DIR: &str = "./cache/";
const KERNEL_PLUGINS_DIR: &str = "./plugins/";
const KERNEL_SHMEM_SIZE: i64 = 0;

// helper functions
fn data_dir() -> String {
    KERNEL_DATA_DIR.to_owned()
}

fn plugins_dir() -> String {
    KERNEL_PLUGINS_DIR.to_owned()
}

fn shmem_size() -> i64 {
    KERNEL_SHMEM_SIZE
}

/// The subset of the `kernel` config group that the cache core reads.
/// Every other parameter under `kernel` belongs to non-core components
/// (the plugin loader, the master) and isn't modeled here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Kernel {
    #[serde(rename = "dataDir", default = "data_dir")]
    data_dir: String,
    #[serde(rename = "pluginsDir", default = "plugins_dir")]
    plugins_dir: String,
    #[serde(default = "shmem_size")]
    shmem_size: i64,
}

impl Kernel {
    /// Directory backing the file-tier segments.
    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    /// Directory the (out-of-core) plugin loader scans; read and carried
    /// here but not otherwise consumed by the cache engine.
    pub fn plugins_dir(&self) -> &str {
        &self.plugins_dir
    }

    /// Shared-memory demand in bytes the cache worker adds at startup.
    pub fn shmem_size(&self) -> i64 {
        self.shmem_size
    }

    pub fn set_shmem_size(&mut self, size: i64) {
        self.shmem_size = size;
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            data_dir: data_dir(),
            plugins_dir: plugins_dir(),
            shmem_size: shmem_size(),
        }
    }
}

pub trait KernelConfig {
    fn kernel(&self) -> &Kernel;

    fn kernel_mut(&mut self) -> &mut Kernel;
}
