//! Append-only document store with tombstones and three inverted posting
//! indexes (trigram, one-byte and two-byte basename prefix), plus the frozen
//! [`Snapshot`] view served to readers.
//!
//! Deletion never rewrites postings: removed documents are tombstoned and
//! filtered at read time. The only defragmentation is a full rebuild.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::text::{extract_basename, extract_trigrams, normalize_path, prefix1, prefix2};

/// Index into the append-only document vector. Never reused.
pub type DocId = u32;

/// Filesystem entry kind, stored as a small integer so values this library
/// does not know about pass through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileFlags(pub u16);

impl FileFlags {
    pub const FILE: FileFlags = FileFlags(0);
    pub const DIR: FileFlags = FileFlags(1);
    pub const SYMLINK: FileFlags = FileFlags(2);

    pub fn is_dir(self) -> bool {
        self == Self::DIR
    }
}

/// One indexed path. `base_off`/`base_len` delimit the basename inside
/// `path`; `depth` is the slash count.
#[derive(Clone, Debug)]
pub(crate) struct Doc {
    pub path: Arc<str>,
    pub base_off: u32,
    pub base_len: u32,
    pub depth: u32,
    pub flags: FileFlags,
}

/// A posting list: ascending doc ids under one key. Shared with snapshots;
/// the writer clones-on-append when a snapshot still references the list.
type Postings = Arc<Vec<DocId>>;

fn push_posting(list: &mut Postings, id: DocId) {
    Arc::make_mut(list).push(id);
}

/// Append-only in-memory file index. Not safe for concurrent mutation — the
/// engine's event loop is the sole writer.
pub struct Index {
    docs: Vec<Doc>,
    deleted: HashSet<DocId>,
    by_path: HashMap<Arc<str>, DocId>,
    by_gram: HashMap<u32, Postings>,
    by_prefix1: [Option<Postings>; 256],
    by_prefix2: HashMap<u16, Postings>,
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    pub fn new() -> Self {
        Self {
            docs: Vec::new(),
            deleted: HashSet::new(),
            by_path: HashMap::new(),
            by_gram: HashMap::new(),
            by_prefix1: std::array::from_fn(|_| None),
            by_prefix2: HashMap::new(),
        }
    }

    /// Insert a path, tombstoning any live entry with the same normalized
    /// path first so paths stay unique among live documents.
    pub fn add(&mut self, path: &str, flags: FileFlags) -> DocId {
        let norm: Arc<str> = normalize_path(path).into();
        if let Some(&old) = self.by_path.get(norm.as_ref()) {
            self.deleted.insert(old);
        }
        let id = self.docs.len() as DocId;
        let bytes = norm.as_bytes();
        let (base_off, base_len) = extract_basename(bytes);
        let depth = bytes.iter().filter(|&&b| b == b'/').count() as u32;

        for gram in extract_trigrams(bytes) {
            push_posting(self.by_gram.entry(gram).or_default(), id);
        }
        if base_len > 0 {
            let basename = &bytes[base_off..base_off + base_len];
            let slot = &mut self.by_prefix1[prefix1(basename) as usize];
            push_posting(slot.get_or_insert_with(Postings::default), id);
            push_posting(self.by_prefix2.entry(prefix2(basename)).or_default(), id);
        }
        self.docs.push(Doc {
            path: Arc::clone(&norm),
            base_off: base_off as u32,
            base_len: base_len as u32,
            depth,
            flags,
        });
        self.by_path.insert(norm, id);
        id
    }

    /// Tombstone the live entry for `path`. Returns whether one existed.
    pub fn remove(&mut self, path: &str) -> bool {
        let norm = normalize_path(path);
        match self.by_path.remove(norm.as_str()) {
            Some(id) => {
                self.deleted.insert(id);
                true
            }
            None => false,
        }
    }

    /// Tombstone every live path that starts with `prefix` (normalized,
    /// ending in `/`). Returns how many entries were removed.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<Arc<str>> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        for path in &doomed {
            if let Some(id) = self.by_path.remove(path.as_ref()) {
                self.deleted.insert(id);
            }
        }
        doomed.len()
    }

    /// Whether `path` is live in the index.
    pub fn has(&self, path: &str) -> bool {
        self.by_path.contains_key(normalize_path(path).as_str())
    }

    /// Number of live (non-tombstoned) documents.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Freeze the current state into an immutable view. Posting lists and
    /// path strings are shared, not copied; any later append to a shared
    /// list goes through clone-on-write, so the snapshot never observes it.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            docs: self.docs.clone(),
            deleted: self.deleted.clone(),
            by_gram: self.by_gram.clone(),
            by_prefix1: self.by_prefix1.clone(),
            by_prefix2: self.by_prefix2.clone(),
        }
    }
}

/// Immutable point-in-time view of an [`Index`]. Reads are total and stable
/// for the snapshot's lifetime regardless of concurrent index mutation.
pub struct Snapshot {
    docs: Vec<Doc>,
    deleted: HashSet<DocId>,
    by_gram: HashMap<u32, Postings>,
    by_prefix1: [Option<Postings>; 256],
    by_prefix2: HashMap<u16, Postings>,
}

impl Snapshot {
    pub(crate) fn doc(&self, id: DocId) -> Option<&Doc> {
        self.docs.get(id as usize)
    }

    pub(crate) fn is_deleted(&self, id: DocId) -> bool {
        self.deleted.contains(&id)
    }

    /// Total documents captured, tombstoned ones included.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub(crate) fn gram_postings(&self, gram: u32) -> &[DocId] {
        self.by_gram.get(&gram).map_or(&[], |p| p.as_slice())
    }

    pub(crate) fn prefix1_postings(&self, b: u8) -> &[DocId] {
        self.by_prefix1[b as usize].as_deref().map_or(&[], |p| p.as_slice())
    }

    pub(crate) fn prefix2_postings(&self, pair: u16) -> &[DocId] {
        self.by_prefix2.get(&pair).map_or(&[], |p| p.as_slice())
    }
}
