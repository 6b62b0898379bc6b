//! Sync handler: bring snapshot directories in line with a local tree

use std::path::{Path, PathBuf};

use tracing::Instrument;

use super::{is_directory, BackupEngine};
use crate::error::{DirsnapError, Result};
use crate::local::{file_digest_async, IgnoreMatcher, TreeWalker};
use crate::retention::RetentionPolicy;
use crate::store::RemoteStore;
use crate::transfer::{TransferQueue, TransferTask};
use crate::types::{
    relative_key_path, RetentionConfig, SnapshotDir, SnapshotKey, SyncReport, Tier,
};

/// What happened to one walked file
enum FileOutcome {
    Unchanged,
    Uploaded { replaced: bool },
    Queued { replaced: bool },
}

impl BackupEngine {
    /// Upload every new or changed file of `target_dir` into today's daily
    /// snapshot, and into a fresh weekly/monthly snapshot when one is due.
    pub async fn sync(
        &self,
        target_dir: &Path,
        bucket: &str,
        prefix: &str,
        retention: &RetentionConfig,
    ) -> Result<SyncReport> {
        self.sync_dirs(&[target_dir.to_path_buf()], bucket, prefix, retention)
            .await
    }

    /// Sync several directories that share one `(bucket, prefix)`. Their
    /// trees are overlaid into the same snapshots, which are chosen once for
    /// the whole group.
    pub async fn sync_dirs(
        &self,
        dirs: &[PathBuf],
        bucket: &str,
        prefix: &str,
        retention: &RetentionConfig,
    ) -> Result<SyncReport> {
        let span = tracing::info_span!(
            "sync",
            bucket = %bucket,
            prefix = %prefix,
            dirs = dirs.len()
        );
        self.sync_inner(dirs, bucket, prefix, retention)
            .instrument(span)
            .await
    }

    async fn sync_inner(
        &self,
        dirs: &[PathBuf],
        bucket: &str,
        prefix: &str,
        retention: &RetentionConfig,
    ) -> Result<SyncReport> {
        let mut trees = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if is_directory(dir).await {
                trees.push((dir.as_path(), self.ignore.compile(dir)?));
            } else {
                tracing::warn!("Skipping {}: not a directory", dir.display());
            }
        }
        if trees.is_empty() {
            return Err(DirsnapError::Walk {
                path: dirs.first().cloned().unwrap_or_default(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let store = self.store(bucket);
        let policy = RetentionPolicy::new(*retention);
        let today = self.today();
        let mut report = SyncReport::default();

        tracing::info!("Sync started");
        for tier in Tier::ALL {
            let due = match policy.due_snapshot(&store, prefix, tier, today).await {
                Ok(due) => due,
                Err(e) => {
                    tracing::error!("Cannot discover {} snapshots: {}", tier, e);
                    report.listing_errors += 1;
                    continue;
                }
            };
            let Some(snapshot) = due else {
                tracing::debug!("No {} snapshot due", tier);
                continue;
            };
            if tier != Tier::Daily {
                tracing::info!("Creating {} snapshot {}", tier, snapshot.name());
            }

            for (root, matcher) in &trees {
                let tree = self
                    .upload_tree(&store, root, matcher, prefix, &snapshot)
                    .await;
                report.merge(tree);
            }
            report.snapshots.push(snapshot);
        }

        tracing::info!(
            "Sync finished: {} scanned, {} uploaded, {} unchanged, {} failed",
            report.scanned,
            report.uploaded,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Walk `root` and upload each file missing from, or stale in, `snapshot`
    async fn upload_tree(
        &self,
        store: &RemoteStore,
        root: &Path,
        matcher: &IgnoreMatcher,
        prefix: &str,
        snapshot: &SnapshotDir,
    ) -> SyncReport {
        let queue = self
            .options
            .parallel_uploads
            .then(|| TransferQueue::new(self.options.concurrency));
        let mut report = SyncReport::default();

        let mut walker = TreeWalker::new(root, matcher.clone());
        while let Some(entry) = walker.next_entry().await {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Skipping unreadable subtree: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            match self
                .sync_file(store, root, &path, prefix, snapshot, queue.as_ref())
                .await
            {
                Ok(FileOutcome::Unchanged) => report.unchanged += 1,
                Ok(FileOutcome::Uploaded { replaced }) => {
                    report.uploaded += 1;
                    report.replaced += usize::from(replaced);
                }
                Ok(FileOutcome::Queued { replaced }) => {
                    report.replaced += usize::from(replaced);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }

            if let Some(queue) = &queue {
                if queue.is_full() {
                    let drained = queue.drain(store).await;
                    report.uploaded += drained.succeeded;
                    report.failed += drained.failed;
                }
            }
        }

        if let Some(queue) = &queue {
            let drained = queue.drain(store).await;
            report.uploaded += drained.succeeded;
            report.failed += drained.failed;
        }
        report
    }

    async fn sync_file(
        &self,
        store: &RemoteStore,
        root: &Path,
        path: &Path,
        prefix: &str,
        snapshot: &SnapshotDir,
        queue: Option<&TransferQueue>,
    ) -> Result<FileOutcome> {
        let relative = relative_key_path(root, path)?;
        let key = SnapshotKey::new(prefix, snapshot.tier, snapshot.date, relative).object_key();
        let digest = file_digest_async(path).await?;

        let status = store.exists(&key, &digest).await;
        if status.is_current() {
            tracing::debug!("Unchanged: {}", key);
            return Ok(FileOutcome::Unchanged);
        }

        let replaced = status.exists;
        if replaced {
            if let Err(e) = store.delete(&key).await {
                tracing::warn!("Could not delete stale {}: {}", key, e);
            }
        }

        match queue {
            Some(queue) => {
                queue.add(TransferTask::upload(path, key));
                Ok(FileOutcome::Queued { replaced })
            }
            None => {
                store.upload_with_digest(path, &key, &digest).await?;
                Ok(FileOutcome::Uploaded { replaced })
            }
        }
    }
}
