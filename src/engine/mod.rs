//! Backup engine
//!
//! One explicitly constructed [`BackupEngine`] owns the object backend, the
//! ignore patterns, the clock and the transfer settings. Its entry points are
//! the operations a scheduler or CLI drives:
//!
//! - [`BackupEngine::sync`]: bring today's daily snapshot (and any due
//!   weekly/monthly snapshot) in line with a local directory
//! - [`BackupEngine::prune`]: mirror local deletions and enforce retention
//! - [`BackupEngine::restore`]: download a snapshot into a local directory
//! - [`BackupEngine::catalog`]: list what can be restored from a bucket
//!
//! Directories configured under the same `(bucket, prefix)` are overlaid
//! into one snapshot namespace; [`BackupEngine::sync_dirs`] and
//! [`BackupEngine::prune_dirs`] treat them as a group.

mod catalog;
mod prune;
mod restore;
mod sync;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{DirsnapError, Result};
use crate::local::IgnoreSet;
use crate::retention::{Clock, SystemClock};
use crate::store::{ObjectBackend, RemoteStore, DEFAULT_PAGE_SIZE};
use crate::transfer::DEFAULT_CONCURRENCY;
use crate::types::{BackupTarget, RetentionConfig, RunSummary};

/// Tunables shared by all handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Keys requested per listing page
    pub page_size: i32,
    /// Transfer queue watermark: transfers run per drain
    pub concurrency: usize,
    /// Route sync uploads through the transfer queue instead of uploading inline
    pub parallel_uploads: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            parallel_uploads: false,
        }
    }
}

/// Snapshot synchronization and retention engine
pub struct BackupEngine {
    backend: Arc<dyn ObjectBackend>,
    ignore: IgnoreSet,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
    running: AtomicBool,
}

impl BackupEngine {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            ignore: IgnoreSet::empty(),
            clock: Arc::new(SystemClock),
            options: EngineOptions::default(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_ignore(mut self, ignore: IgnoreSet) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Store client bound to one bucket
    pub fn store(&self, bucket: &str) -> RemoteStore {
        RemoteStore::new(self.backend.clone(), bucket).with_page_size(self.options.page_size)
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sync then prune every target, each as one group of directories.
    ///
    /// Refuses to start while another run on this engine is in progress.
    /// Per-target failures are logged and counted; the pass always
    /// finishes.
    pub async fn run_backup(
        &self,
        targets: &[BackupTarget],
        retention: &RetentionConfig,
    ) -> Result<RunSummary> {
        let _guard = RunGuard::acquire(&self.running)?;
        let mut summary = RunSummary::default();

        for target in targets {
            let dirs = &target.directories;
            summary.directories += dirs.len();
            tracing::info!(
                "Starting backup of {} directories to s3://{}/{}",
                dirs.len(),
                target.bucket,
                target.prefix
            );

            match self
                .sync_dirs(dirs, &target.bucket, &target.prefix, retention)
                .await
            {
                Ok(report) => summary.sync.merge(report),
                Err(e) => {
                    tracing::error!("Sync to {}/{} failed: {}", target.bucket, target.prefix, e);
                    summary.setup_failures += 1;
                }
            }

            match self
                .prune_dirs(dirs, &target.bucket, &target.prefix, retention)
                .await
            {
                Ok(report) => summary.prune.merge(report),
                Err(e) => {
                    tracing::error!("Prune of {}/{} failed: {}", target.bucket, target.prefix, e);
                    summary.setup_failures += 1;
                }
            }
        }

        tracing::info!(
            "Backup pass finished: {} directories, {} uploaded, {} unchanged, {} deleted, {} snapshots pruned, {} failures",
            summary.directories,
            summary.sync.uploaded,
            summary.sync.unchanged,
            summary.prune.mirrored_deletions,
            summary.prune.pruned.len(),
            summary.sync.failed + summary.prune.failed + summary.setup_failures
        );
        Ok(summary)
    }
}

/// Whether `path` is a directory, checked without blocking the runtime
async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Clears the running flag when a run ends, including on early return
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(DirsnapError::AlreadyRunning);
        }
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::FixedClock;
    use crate::store::MemoryBackend;
    use tempfile::TempDir;

    #[test]
    fn test_run_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = RunGuard::acquire(&flag).unwrap();
        assert!(matches!(
            RunGuard::acquire(&flag),
            Err(DirsnapError::AlreadyRunning)
        ));
        drop(guard);
        assert!(RunGuard::acquire(&flag).is_ok());
    }

    #[tokio::test]
    async fn test_run_backup_covers_all_directories() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(first.path().join("a.txt"), "x").unwrap();
        std::fs::write(second.path().join("b.txt"), "y").unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let engine = BackupEngine::new(backend.clone())
            .with_clock(Arc::new(FixedClock::new(date)));
        let targets = vec![BackupTarget {
            bucket: "bucket".to_string(),
            prefix: "backup".to_string(),
            directories: vec![first.path().to_path_buf(), second.path().to_path_buf()],
        }];

        let summary = engine
            .run_backup(&targets, &RetentionConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.directories, 2);
        assert_eq!(summary.setup_failures, 0);
        // daily, weekly and monthly are all taken on the first run
        assert_eq!(summary.sync.uploaded, 6);
        assert_eq!(summary.prune.mirrored_deletions, 0);
        assert_eq!(backend.keys("bucket").len(), 6);
        assert!(!engine.is_running());
    }
}
