// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A thin stand-in for the followed configuration-access component: the
//! cache core only ever reads parameters out of it, it never owns the
//! file format or the parser. [`Config`] is the typed view the core
//! binds against; [`ConfigTable`] is the generic group/key view that a
//! real configuration-access table would expose to any component, core
//! or otherwise.

mod kernel;

use std::path::Path;

pub use kernel::{Kernel, KernelConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration document. Only the `kernel` group is modeled
/// here since it's the only group the cache core reads from (Section 6
/// of the design: `dataDir`, `pluginsDir`, `shmem_size`).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    kernel: Kernel,
}

impl Config {
    /// Loads configuration from a TOML file. Falls back to defaults for
    /// any field the file doesn't set; a missing file is itself an
    /// error, since silently running on pure defaults would hide a
    /// typo'd path from the caller.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

impl KernelConfig for Config {
    fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// A generic group/key view over a followed configuration-access table.
/// The core only ever calls `get_str`/`get_long`; it has no business
/// knowing how the table is populated or persisted.
pub trait ConfigTable {
    fn get_str(&self, group: &str, key: &str) -> Option<&str>;
    fn get_long(&self, group: &str, key: &str) -> Option<i64>;
}

impl ConfigTable for Config {
    fn get_str(&self, group: &str, key: &str) -> Option<&str> {
        match (group, key) {
            ("kernel", "dataDir") => Some(self.kernel.data_dir()),
            ("kernel", "pluginsDir") => Some(self.kernel.plugins_dir()),
            _ => None,
        }
    }

    fn get_long(&self, group: &str, key: &str) -> Option<i64> {
        match (group, key) {
            ("kernel", "shmem_size") => Some(self.kernel.shmem_size()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_readable_through_the_generic_table() {
        let config = Config::default();
        assert_eq!(config.get_str("kernel", "dataDir"), Some("./cache/"));
        assert_eq!(config.get_long("kernel", "shmem_size"), Some(0));
        assert_eq!(config.get_str("kernel", "unknown"), None);
    }

    #[test]
    fn toml_overrides_apply() {
        let toml = r#"
            [kernel]
            dataDir = "/var/lib/cache"
            shmem_size = 1048576
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.kernel().data_dir(), "/var/lib/cache");
        assert_eq!(config.kernel().shmem_size(), 1048576);
        // unspecified fields keep their defaults
        assert_eq!(config.kernel().plugins_dir(), "./plugins/");
    }
}
