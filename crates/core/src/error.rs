//! Error taxonomy for the public API. Only initialization and lifecycle
//! failures surface; readers never error on index state, and transient
//! watcher trouble is logged and recovered by rebuilding.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A public call arrived after `close()`.
    #[error("engine is closed")]
    Closed,

    /// `remove_root`/`rebuild` named a root the engine does not hold.
    #[error("root not found: {0}")]
    RootNotFound(PathBuf),

    /// The walker or watcher failed to initialize for a root. Does not
    /// poison other roots.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be read or parsed.
    #[error("{path}: {message}")]
    Config { path: PathBuf, message: String },
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source }
    }
}
