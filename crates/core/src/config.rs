//! Runtime configuration: which directories to skip and how the watcher
//! batches and buffers events. Loaded from a `.pathscope.toml` when present,
//! defaults otherwise.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// Directory basenames that are never indexed or watched: VCS metadata,
/// package caches, and other trees that drown the useful results.
pub const NOISE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".hg",
    ".svn",
    "__pycache__",
    ".cache",
    ".venv",
    "vendor",
    ".terraform",
];

/// Name of the per-root config file the CLI looks for.
pub const CONFIG_FILE: &str = ".pathscope.toml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinderConfig {
    /// Directory basenames skipped by the walker and the watcher.
    pub skip_dirs: HashSet<String>,
    /// Watcher coalescing window in milliseconds.
    pub batch_window_ms: u64,
    /// Capacity of the engine's inbound event channel. Forwarders block
    /// when it fills, so the writer applies every batch that was accepted.
    pub event_buffer: usize,
    /// Capacity of each watcher's outbound batch channel. Batches are
    /// dropped with a warning when it fills; a rebuild recovers.
    pub batch_buffer: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            skip_dirs: NOISE_DIRS.iter().map(|s| s.to_string()).collect(),
            batch_window_ms: 50,
            event_buffer: 256,
            batch_buffer: 64,
        }
    }
}

impl FinderConfig {
    /// Parse a TOML config file. Missing keys fall back to defaults;
    /// unknown keys are rejected.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&raw).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `.pathscope.toml` from under `root`, or defaults when the file
    /// does not exist.
    pub fn load_root(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub(crate) fn skips(&self, name: &str) -> bool {
        self.skip_dirs.contains(name)
    }
}
