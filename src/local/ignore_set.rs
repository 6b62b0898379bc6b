//! Ignore-file patterns (gitignore syntax)

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{DirsnapError, Result};

/// Uncompiled pattern list, shared by every backup target
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<String>,
    source: Option<PathBuf>,
}

impl IgnoreSet {
    /// A set that ignores nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            source: None,
        }
    }

    /// Read one pattern per line; blank lines and `#` comments are kept for
    /// the matcher to discard.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DirsnapError::Ignore(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self {
            patterns: content.lines().map(str::to_string).collect(),
            source: Some(path.to_path_buf()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.iter().all(|p| {
            let p = p.trim();
            p.is_empty() || p.starts_with('#')
        })
    }

    /// Compile against the directory that anchored patterns are relative to
    pub fn compile(&self, root: &Path) -> Result<IgnoreMatcher> {
        let mut builder = GitignoreBuilder::new(root);
        for line in &self.patterns {
            builder
                .add_line(self.source.clone(), line)
                .map_err(|e| DirsnapError::Ignore(format!("{}: {}", line, e)))?;
        }
        let inner = builder
            .build()
            .map_err(|e| DirsnapError::Ignore(e.to_string()))?;
        Ok(IgnoreMatcher { inner })
    }
}

/// Compiled patterns for one root
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    pub fn none() -> Self {
        Self {
            inner: Gitignore::empty(),
        }
    }

    /// Whether `path` (absolute, under the compiled root) is excluded
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.inner.matched(path, is_dir).is_ignore()
    }

    /// Whether the file at `path`, or any directory between it and the root,
    /// is excluded. Used for paths that were not reached by a walk.
    pub fn is_file_excluded(&self, path: &Path) -> bool {
        let root = self.inner.path();
        path.ancestors()
            .take_while(|p| p.starts_with(root) && *p != root)
            .enumerate()
            .any(|(depth, p)| self.is_ignored(p, depth > 0))
    }
}
