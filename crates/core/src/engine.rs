//! The engine owns one index per root, applies watcher batches under a
//! single writer, and publishes immutable snapshot lists through an atomic
//! pointer so searches never take a lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use arc_swap::ArcSwap;
use tracing::info;

use crate::config::FinderConfig;
use crate::error::Error;
use crate::index::{FileFlags, Index, Snapshot};
use crate::query::{merge_and_score, search_snapshot, QueryPlan, SearchOptions, SearchResult};
use crate::text::{normalize_path, ScoreParams};
use crate::walk::walk_root;
use crate::watch::{FsEvent, FsOp, FsWatcher};

/// One root's frozen view inside a published snapshot list.
struct RootSnapshot {
    root: PathBuf,
    snap: Arc<Snapshot>,
}

struct RootState {
    index: Index,
    watcher: FsWatcher,
}

struct EngineState {
    roots: HashMap<PathBuf, RootState>,
    forwarders: Vec<JoinHandle<()>>,
}

enum EngineMsg {
    Batch { root: PathBuf, events: Vec<FsEvent> },
    Shutdown,
}

struct Shared {
    /// The only cross-thread synchronization on the read path: readers load
    /// this pointer once per search and never block.
    published: ArcSwap<Vec<RootSnapshot>>,
    state: Mutex<EngineState>,
    event_tx: SyncSender<EngineMsg>,
    closed: AtomicBool,
    config: FinderConfig,
}

/// The file finder. Safe for concurrent use; all mutation funnels through
/// one event-loop thread.
pub struct Engine {
    shared: Arc<Shared>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(FinderConfig::default())
    }

    pub fn with_config(config: FinderConfig) -> Self {
        let (event_tx, event_rx) = sync_channel(config.event_buffer);
        let shared = Arc::new(Shared {
            published: ArcSwap::from_pointee(Vec::new()),
            state: Mutex::new(EngineState { roots: HashMap::new(), forwarders: Vec::new() }),
            event_tx,
            closed: AtomicBool::new(false),
            config,
        });
        let loop_shared = Arc::clone(&shared);
        let event_loop = std::thread::spawn(move || event_loop(&loop_shared, &event_rx));
        Self { shared, event_loop: Mutex::new(Some(event_loop)) }
    }

    /// Index a directory root and start watching it. Adding a root that is
    /// already present succeeds without duplicating anything.
    pub fn add_root(&self, root: impl AsRef<Path>) -> Result<(), Error> {
        let abs = resolve_root(root.as_ref())?;
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        {
            let state = self.shared.state.lock().unwrap();
            if state.roots.contains_key(&abs) {
                return Ok(());
            }
        }

        // Walk and start the watcher outside the lock so searches and other
        // roots are not stalled on filesystem I/O.
        let index = walk_root(&abs, &self.shared.config)?;
        let (mut watcher, batch_rx) = FsWatcher::start(&abs, &self.shared.config)?;

        let mut state = self.shared.state.lock().unwrap();
        // Re-check after reacquiring: the engine may have closed, or another
        // caller may have won the race to add this root, while we walked.
        if self.shared.closed.load(Ordering::SeqCst) {
            drop(state);
            drop(batch_rx);
            watcher.close();
            return Err(Error::Closed);
        }
        if state.roots.contains_key(&abs) {
            drop(state);
            drop(batch_rx);
            watcher.close();
            return Ok(());
        }

        let file_count = index.len();
        let event_tx = self.shared.event_tx.clone();
        let forward_root = abs.clone();
        state
            .forwarders
            .push(std::thread::spawn(move || forward_batches(&forward_root, &batch_rx, &event_tx)));
        state.roots.insert(abs.clone(), RootState { index, watcher });
        publish(&self.shared, &state);
        drop(state);

        info!(root = %abs.display(), files = file_count, "added root");
        Ok(())
    }

    /// Stop watching a root and drop its index.
    pub fn remove_root(&self, root: impl AsRef<Path>) -> Result<(), Error> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let abs = resolve_root_lenient(root.as_ref())?;
        let mut removed = {
            let mut state = self.shared.state.lock().unwrap();
            let Some(rs) = state.roots.remove(&abs) else {
                return Err(Error::RootNotFound(abs));
            };
            publish(&self.shared, &state);
            rs
        };
        // Joining the watcher can require the event loop to drain, and the
        // event loop needs the state lock, so close outside of it.
        removed.watcher.close();
        info!(root = %abs.display(), "removed root");
        Ok(())
    }

    /// Re-walk a root and swap in the fresh index, discarding accumulated
    /// tombstones. The only defragmentation mechanism.
    pub fn rebuild(&self, root: impl AsRef<Path>) -> Result<(), Error> {
        let abs = resolve_root(root.as_ref())?;
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        // Walk outside the lock, as in add_root.
        let index = walk_root(&abs, &self.shared.config)?;
        let file_count = index.len();

        let mut state = self.shared.state.lock().unwrap();
        let Some(rs) = state.roots.get_mut(&abs) else {
            return Err(Error::RootNotFound(abs));
        };
        rs.index = index;
        publish(&self.shared, &state);
        drop(state);

        info!(root = %abs.display(), files = file_count, "rebuilt root");
        Ok(())
    }

    /// Ranked fuzzy search across every root. Pathological queries yield an
    /// empty result; the only error is a closed engine.
    pub fn search(&self, query: &str, opts: SearchOptions) -> Result<Vec<SearchResult>, Error> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let published = self.shared.published.load_full();
        if published.is_empty() {
            return Ok(Vec::new());
        }
        let plan = QueryPlan::new(query);
        if plan.normalized.is_empty() {
            return Ok(Vec::new());
        }
        let max_candidates = opts.max_candidates_or_default();
        let mut candidates = Vec::new();
        for rs in published.iter() {
            candidates.extend(search_snapshot(&plan, &rs.snap, max_candidates));
        }
        Ok(merge_and_score(&candidates, &plan, &ScoreParams::default(), opts.limit_or_default()))
    }

    /// The roots currently published, sorted.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.shared.published.load().iter().map(|rs| rs.root.clone()).collect()
    }

    /// Shut down: stop all watchers, join every helper thread, stop the
    /// event loop. Idempotent; later calls return immediately.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (mut watchers, forwarders) = {
            let mut state = self.shared.state.lock().unwrap();
            let watchers: Vec<FsWatcher> =
                state.roots.drain().map(|(_, rs)| rs.watcher).collect();
            (watchers, std::mem::take(&mut state.forwarders))
        };
        // Watchers first (stops the batch streams), then forwarders (their
        // receivers disconnect), all while the event loop still drains so a
        // blocked send can finish.
        for watcher in &mut watchers {
            watcher.close();
        }
        for handle in forwarders {
            let _ = handle.join();
        }
        let _ = self.shared.event_tx.send(EngineMsg::Shutdown);
        if let Some(handle) = self.event_loop.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Worker threads
// ---------------------------------------------------------------------------

/// Pipe one watcher's batches into the engine's inbound channel. Blocks when
/// the channel is full — the watcher side is the one that sheds load.
fn forward_batches(
    root: &Path,
    batches: &Receiver<Vec<FsEvent>>,
    event_tx: &SyncSender<EngineMsg>,
) {
    while let Ok(events) = batches.recv() {
        let msg = EngineMsg::Batch { root: root.to_path_buf(), events };
        if event_tx.send(msg).is_err() {
            return;
        }
    }
}

/// The single writer: applies batches to the owning root's index and
/// republishes when anything changed.
fn event_loop(shared: &Shared, events: &Receiver<EngineMsg>) {
    loop {
        match events.recv() {
            Ok(EngineMsg::Batch { root, events }) => apply_batch(shared, &root, events),
            Ok(EngineMsg::Shutdown) | Err(_) => return,
        }
    }
}

fn apply_batch(shared: &Shared, root: &Path, events: Vec<FsEvent>) {
    let mut state = shared.state.lock().unwrap();
    let Some(rs) = state.roots.get_mut(root) else {
        // Root was removed while the batch was in flight.
        return;
    };
    let mut changed = false;
    for event in events {
        let Ok(rel) = event.path.strip_prefix(root) else { continue };
        let rel = rel.to_string_lossy();
        if rel.is_empty() {
            continue;
        }
        match event.op {
            FsOp::Create => {
                if !rs.index.has(&rel) {
                    let flags = if event.is_dir { FileFlags::DIR } else { FileFlags::FILE };
                    rs.index.add(&rel, flags);
                    changed = true;
                }
            }
            FsOp::Remove | FsOp::Rename => {
                if rs.index.remove(&rel) {
                    changed = true;
                }
                // A renamed entry may have been a directory whose children
                // produce no events of their own; sweep the subtree.
                if event.is_dir || event.op == FsOp::Rename {
                    let prefix = format!("{}/", normalize_path(&rel));
                    if rs.index.remove_prefix(&prefix) > 0 {
                        changed = true;
                    }
                }
            }
            FsOp::Modify => {}
        }
    }
    if changed {
        publish(shared, &state);
    }
}

/// Rebuild the published snapshot list from every root and install it with
/// one atomic store. Caller holds the state lock, so publications are
/// strictly ordered.
fn publish(shared: &Shared, state: &EngineState) {
    let mut list: Vec<RootSnapshot> = state
        .roots
        .iter()
        .map(|(root, rs)| RootSnapshot {
            root: root.clone(),
            snap: Arc::new(rs.index.snapshot()),
        })
        .collect();
    list.sort_by(|a, b| a.root.cmp(&b.root));
    shared.published.store(Arc::new(list));
}

fn resolve_root(root: &Path) -> Result<PathBuf, Error> {
    std::fs::canonicalize(root).map_err(|e| Error::io(root, e))
}

/// `remove_root` must keep working after the directory disappeared from
/// disk, where canonicalization fails.
fn resolve_root_lenient(root: &Path) -> Result<PathBuf, Error> {
    match std::fs::canonicalize(root) {
        Ok(path) => Ok(path),
        Err(_) => std::path::absolute(root).map_err(|e| Error::io(root, e)),
    }
}
