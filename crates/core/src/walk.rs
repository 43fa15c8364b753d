//! Initial directory walk: builds a fresh [`Index`] for a root, skipping the
//! configured noise directories. Per-entry errors are best-effort ignored;
//! only a missing root fails the walk.

use std::path::Path;

use ignore::{Walk, WalkBuilder};

use crate::config::FinderConfig;
use crate::error::Error;
use crate::index::{FileFlags, Index};

/// A recursive walker over `root` with VCS filtering disabled — everything
/// is indexed except directories whose basename is in the skip set. Shared
/// by the initial walk and the watcher's synthetic-create scans.
pub(crate) fn tree_walker(root: &Path, config: &FinderConfig) -> Walk {
    let skip = config.skip_dirs.clone();
    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !skip.contains(name.as_ref());
            }
            true
        })
        .build()
}

pub(crate) fn entry_flags(entry: &ignore::DirEntry) -> FileFlags {
    match entry.file_type() {
        Some(ft) if ft.is_dir() => FileFlags::DIR,
        Some(ft) if ft.is_symlink() => FileFlags::SYMLINK,
        _ => FileFlags::FILE,
    }
}

/// Walk `abs_root` and return a populated index of every discovered file and
/// directory, keyed by root-relative normalized path.
pub fn walk_root(abs_root: &Path, config: &FinderConfig) -> Result<Index, Error> {
    // Only the root itself is load-bearing; entries below it are best
    // effort, mirroring how the watcher treats per-event failures.
    std::fs::metadata(abs_root).map_err(|e| Error::io(abs_root, e))?;

    let mut index = Index::new();
    for entry in tree_walker(abs_root, config) {
        let Ok(entry) = entry else { continue };
        if entry.depth() == 0 {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(abs_root) else { continue };
        let flags = entry_flags(&entry);
        index.add(&rel.to_string_lossy(), flags);
    }
    Ok(index)
}
