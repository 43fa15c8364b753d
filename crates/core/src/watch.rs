//! Filesystem watcher adapter: turns raw notify events for one root into
//! batched, de-duplicated [`FsEvent`] streams.
//!
//! A dedicated batcher thread coalesces events inside a small window before
//! handing them downstream. When the downstream channel is full the batch is
//! dropped with a warning — the engine's rebuild operation is the recovery
//! path, so correctness here is eventual rather than transactional.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::config::FinderConfig;
use crate::error::Error;
use crate::walk::tree_walker;

/// The kind of filesystem change an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsOp {
    Create,
    Remove,
    Rename,
    Modify,
}

/// A normalized filesystem change event. Paths are absolute.
#[derive(Clone, Debug)]
pub struct FsEvent {
    pub op: FsOp,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Watches a single root recursively. Dropping (or closing) the watcher
/// stops the raw event stream, which drains and stops the batcher thread.
pub(crate) struct FsWatcher {
    watcher: Option<RecommendedWatcher>,
    batcher: Option<JoinHandle<()>>,
}

impl FsWatcher {
    /// Register the OS watch for `root`, spawn the batcher thread, and
    /// return the batch receiver. The first batch is a synthetic-create
    /// backlog for everything already under the root, covering files that
    /// appeared between the caller's walk and the watch registration.
    pub fn start(
        root: &Path,
        config: &FinderConfig,
    ) -> Result<(Self, Receiver<Vec<FsEvent>>), Error> {
        let (raw_tx, raw_rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| {
                let _ = raw_tx.send(result);
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::io(root, std::io::Error::other(e)))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| Error::io(root, std::io::Error::other(e)))?;

        let (batch_tx, batch_rx) = mpsc::sync_channel(config.batch_buffer);
        let batcher = {
            let root = root.to_path_buf();
            let config = config.clone();
            std::thread::spawn(move || batch_loop(&root, &config, &raw_rx, &batch_tx))
        };
        debug!(root = %root.display(), "filesystem watcher started");
        Ok((Self { watcher: Some(watcher), batcher: Some(batcher) }, batch_rx))
    }

    /// Stop watching and wait for the batcher to drain. Idempotent.
    pub fn close(&mut self) {
        drop(self.watcher.take());
        if let Some(handle) = self.batcher.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

fn batch_loop(
    root: &Path,
    config: &FinderConfig,
    raw_rx: &Receiver<notify::Result<notify::Event>>,
    batch_tx: &SyncSender<Vec<FsEvent>>,
) {
    let backlog = scan_tree(root, config);
    if !backlog.is_empty() && batch_tx.send(backlog).is_err() {
        return;
    }

    let window = Duration::from_millis(config.batch_window_ms);
    let mut batch: Vec<FsEvent> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let received = if let Some(due) = deadline {
            let now = Instant::now();
            if now >= due {
                flush(batch_tx, &mut batch, &mut seen, &mut deadline);
                continue;
            }
            match raw_rx.recv_timeout(due - now) {
                Ok(received) => received,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    flush(batch_tx, &mut batch, &mut seen, &mut deadline);
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match raw_rx.recv() {
                Ok(received) => received,
                Err(_) => break,
            }
        };

        let event = match received {
            Ok(event) => event,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "watcher error");
                continue;
            }
        };
        for fsev in translate(&event, config) {
            if fsev.is_dir && fsev.op == FsOp::Create {
                // A new directory may already contain a subtree (mkdir -p,
                // mv of a populated tree): surface its children too.
                for child in scan_tree(&fsev.path, config) {
                    push_event(child, &mut batch, &mut seen, &mut deadline, window);
                }
            }
            push_event(fsev, &mut batch, &mut seen, &mut deadline, window);
        }
    }
    flush(batch_tx, &mut batch, &mut seen, &mut deadline);
}

fn push_event(
    event: FsEvent,
    batch: &mut Vec<FsEvent>,
    seen: &mut HashSet<PathBuf>,
    deadline: &mut Option<Instant>,
    window: Duration,
) {
    if !seen.insert(event.path.clone()) {
        return;
    }
    if batch.is_empty() {
        *deadline = Some(Instant::now() + window);
    }
    batch.push(event);
}

fn flush(
    batch_tx: &SyncSender<Vec<FsEvent>>,
    batch: &mut Vec<FsEvent>,
    seen: &mut HashSet<PathBuf>,
    deadline: &mut Option<Instant>,
) {
    *deadline = None;
    if batch.is_empty() {
        return;
    }
    seen.clear();
    match batch_tx.try_send(std::mem::take(batch)) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => {
            warn!(count = dropped.len(), "dropping event batch, receiver is backed up");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// Synthetic `Create` events for every entry under `dir` (the directory
/// itself excluded), skipping noise directories.
fn scan_tree(dir: &Path, config: &FinderConfig) -> Vec<FsEvent> {
    let mut events = Vec::new();
    for entry in tree_walker(dir, config) {
        let Ok(entry) = entry else { continue };
        if entry.depth() == 0 {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        events.push(FsEvent { op: FsOp::Create, path: entry.into_path(), is_dir });
    }
    events
}

// ---------------------------------------------------------------------------
// Event translation
// ---------------------------------------------------------------------------

/// Map a raw notify event to zero or more normalized events. Access and
/// metadata-only changes carry no information about the path set and are
/// dropped here.
fn translate(event: &notify::Event, config: &FinderConfig) -> Vec<FsEvent> {
    let mut out = Vec::with_capacity(event.paths.len());
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                out.extend(stat_event(FsOp::Create, path, config));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(gone_event(FsOp::Remove, path));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in &event.paths {
                    out.push(gone_event(FsOp::Rename, path));
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    out.extend(stat_event(FsOp::Create, path, config));
                }
            }
            RenameMode::Both => {
                if let [from, to] = event.paths.as_slice() {
                    out.push(gone_event(FsOp::Rename, from));
                    out.extend(stat_event(FsOp::Create, to, config));
                }
            }
            // Some backends cannot say which side of the rename this is:
            // a path that still exists is the destination.
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    if path.exists() {
                        out.extend(stat_event(FsOp::Create, path, config));
                    } else {
                        out.push(gone_event(FsOp::Rename, path));
                    }
                }
            }
        },
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            for path in &event.paths {
                out.extend(stat_event(FsOp::Modify, path, config));
            }
        }
        _ => {}
    }
    out
}

/// Build an event for a path that still exists, resolving `is_dir` with a
/// stat and filtering noise directories.
fn stat_event(op: FsOp, path: &Path, config: &FinderConfig) -> Option<FsEvent> {
    let is_dir = std::fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false);
    if is_dir {
        let name = path.file_name().map(|n| n.to_string_lossy());
        if name.is_some_and(|n| config.skips(&n)) {
            return None;
        }
    }
    Some(FsEvent { op, path: path.to_path_buf(), is_dir })
}

/// Build an event for a path that no longer exists; directory-ness cannot
/// be resolved, the engine treats renames as potential subtree removals.
fn gone_event(op: FsOp, path: &Path) -> FsEvent {
    FsEvent { op, path: path.to_path_buf(), is_dir: false }
}
