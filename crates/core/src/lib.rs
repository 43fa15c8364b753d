//! Pathscope core — an in-process file-path finder.
//!
//! Maintains an append-only, trigram-indexed view of one or more directory
//! roots, keeps it live via filesystem watching, and answers fuzzy, ranked
//! path queries in well under interactive latency. No state is persisted;
//! restarting means re-walking.
//!
//! The typical entry point is [`Engine`]: add roots, search, close.
//! [`Index`], [`QueryPlan`], and [`query::search`] are exposed separately
//! for callers that want a one-shot index without watching.

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod text;
pub mod walk;
pub mod watch;

pub use config::{FinderConfig, CONFIG_FILE, NOISE_DIRS};
pub use engine::Engine;
pub use error::Error;
pub use index::{DocId, FileFlags, Index, Snapshot};
pub use query::{QueryPlan, SearchOptions, SearchResult};
pub use walk::walk_root;
pub use watch::{FsEvent, FsOp};
