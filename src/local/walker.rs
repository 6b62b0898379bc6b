//! Breadth-first directory traversal
//!
//! Uses an explicit FIFO frontier instead of recursion so deep trees never
//! grow the stack and the pending work stays inspectable while walking.
//! Async callers use [`TreeWalker::next_entry`], which reads each directory
//! on tokio's blocking pool.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::IgnoreMatcher;
use crate::error::{DirsnapError, Result};

/// Lazy iterator over the regular files below a root
///
/// Yields `Err(DirsnapError::Walk)` for a directory that cannot be read; that
/// subtree is abandoned and traversal continues with its siblings.
pub struct TreeWalker {
    root: PathBuf,
    ignore: Arc<IgnoreMatcher>,
    frontier: VecDeque<PathBuf>,
    ready: VecDeque<Result<PathBuf>>,
}

/// Children of one expanded directory
#[derive(Default)]
struct Expansion {
    dirs: Vec<PathBuf>,
    items: Vec<Result<PathBuf>>,
}

impl TreeWalker {
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreMatcher) -> Self {
        let root = root.into();
        let mut walker = Self {
            root,
            ignore: Arc::new(ignore),
            frontier: VecDeque::new(),
            ready: VecDeque::new(),
        };
        walker.restart();
        walker
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Begin again from the root, discarding any pending state
    pub fn restart(&mut self) {
        self.frontier.clear();
        self.ready.clear();
        self.frontier.push_back(self.root.clone());
    }

    /// Directories discovered but not yet expanded
    pub fn pending_dirs(&self) -> usize {
        self.frontier.len()
    }

    /// Next entry, reading directories off the async runtime
    pub async fn next_entry(&mut self) -> Option<Result<PathBuf>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let dir = self.frontier.pop_front()?;
            let ignore = self.ignore.clone();
            let task_dir = dir.clone();
            let expansion = tokio::task::spawn_blocking(move || expand(&task_dir, &ignore))
                .await
                .unwrap_or_else(|e| Expansion {
                    dirs: Vec::new(),
                    items: vec![Err(DirsnapError::Walk {
                        path: dir,
                        source: io::Error::other(e.to_string()),
                    })],
                });
            self.absorb(expansion);
        }
    }

    fn absorb(&mut self, expansion: Expansion) {
        self.frontier.extend(expansion.dirs);
        self.ready.extend(expansion.items);
    }
}

/// Read one directory, sorting its children into subdirectories to visit
/// and files (or errors) to yield
fn expand(dir: &Path, ignore: &IgnoreMatcher) -> Expansion {
    let mut expansion = Expansion::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            expansion.items.push(Err(DirsnapError::Walk {
                path: dir.to_path_buf(),
                source,
            }));
            return expansion;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                expansion.items.push(Err(DirsnapError::Walk {
                    path: dir.to_path_buf(),
                    source,
                }));
                return expansion;
            }
        };

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(source) => {
                expansion.items.push(Err(DirsnapError::Walk { path, source }));
                continue;
            }
        };

        // Symlinks count as files only when they resolve to one; linked
        // directories are never followed.
        let (is_dir, is_file) = if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => (false, true),
                _ => {
                    tracing::debug!("Skipping symlink {}", path.display());
                    continue;
                }
            }
        } else {
            (file_type.is_dir(), file_type.is_file())
        };

        if ignore.is_ignored(&path, is_dir) {
            tracing::debug!("Ignoring {}", path.display());
            continue;
        }

        if is_dir {
            expansion.dirs.push(path);
        } else if is_file {
            expansion.items.push(Ok(path));
        }
    }
    expansion
}

impl Iterator for TreeWalker {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let dir = self.frontier.pop_front()?;
            let expansion = expand(&dir, &self.ignore);
            self.absorb(expansion);
        }
    }
}
