//! Prune handler: mirror local deletions, then enforce retention

use std::path::{Path, PathBuf};

use tracing::Instrument;

use super::{is_directory, BackupEngine};
use crate::error::Result;
use crate::local::IgnoreMatcher;
use crate::retention::RetentionPolicy;
use crate::store::RemoteStore;
use crate::types::{
    local_path_for, relative_path_of, snapshot_prefix, PruneReport, RetentionConfig, Tier,
};

impl BackupEngine {
    /// Delete remote objects of today's daily snapshot whose local file is
    /// gone, then drop the oldest snapshot directories of each tier beyond
    /// its retention limit.
    pub async fn prune(
        &self,
        target_dir: &Path,
        bucket: &str,
        prefix: &str,
        retention: &RetentionConfig,
    ) -> Result<PruneReport> {
        self.prune_dirs(&[target_dir.to_path_buf()], bucket, prefix, retention)
            .await
    }

    /// Prune for directories that share one `(bucket, prefix)`. A remote
    /// object is kept while any of them still holds the file.
    pub async fn prune_dirs(
        &self,
        dirs: &[PathBuf],
        bucket: &str,
        prefix: &str,
        retention: &RetentionConfig,
    ) -> Result<PruneReport> {
        let span = tracing::info_span!(
            "prune",
            bucket = %bucket,
            prefix = %prefix,
            dirs = dirs.len()
        );
        self.prune_inner(dirs, bucket, prefix, retention)
            .instrument(span)
            .await
    }

    async fn prune_inner(
        &self,
        dirs: &[PathBuf],
        bucket: &str,
        prefix: &str,
        retention: &RetentionConfig,
    ) -> Result<PruneReport> {
        let store = self.store(bucket);
        let mut report = PruneReport::default();
        tracing::info!("Prune started");

        // An absent tree would read as "everything deleted"
        let mut missing = None;
        for dir in dirs {
            if !is_directory(dir).await {
                missing = Some(dir);
                break;
            }
        }
        if let Some(missing) = missing {
            tracing::warn!(
                "Skipping deletion mirroring: {} is not a directory",
                missing.display()
            );
        } else {
            let mut trees = Vec::with_capacity(dirs.len());
            for dir in dirs {
                trees.push((dir.as_path(), self.ignore.compile(dir)?));
            }
            self.mirror_deletions(&store, &trees, prefix, &mut report)
                .await;
        }

        let policy = RetentionPolicy::new(*retention);
        for tier in Tier::ALL {
            match policy.enforce(&store, prefix, tier).await {
                Ok(outcome) => {
                    report.failed += outcome.failed;
                    report.pruned.extend(outcome.pruned);
                }
                Err(e) => {
                    tracing::error!("Retention of {} snapshots aborted: {}", tier, e);
                    report.listing_errors += 1;
                }
            }
        }

        tracing::info!(
            "Prune finished: {} scanned, {} deleted, {} snapshots pruned, {} failed",
            report.scanned,
            report.mirrored_deletions,
            report.pruned.len(),
            report.failed
        );
        Ok(report)
    }

    async fn mirror_deletions(
        &self,
        store: &RemoteStore,
        trees: &[(&Path, IgnoreMatcher)],
        prefix: &str,
        report: &mut PruneReport,
    ) {
        let daily = snapshot_prefix(prefix, Tier::Daily, self.today());
        let mut lister = store.lister(daily.as_str());

        while lister.has_more() {
            let keys = match lister.next_page().await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::error!("Listing {} aborted: {}", daily, e);
                    report.listing_errors += 1;
                    return;
                }
            };

            for key in keys {
                report.scanned += 1;
                let relative = match relative_path_of(&key) {
                    Ok(relative) => relative,
                    Err(e) => {
                        tracing::warn!("Leaving unrecognized key {}: {}", key, e);
                        report.failed += 1;
                        continue;
                    }
                };

                match still_wanted(trees, relative).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Leaving unrecognized key {}: {}", key, e);
                        report.failed += 1;
                        continue;
                    }
                }

                match store.delete(&key).await {
                    Ok(()) => report.mirrored_deletions += 1,
                    Err(e) => {
                        tracing::warn!("Failed to delete {}: {}", key, e);
                        report.failed += 1;
                    }
                }
            }
        }
    }
}

/// Whether any tree still has the file, or excludes it from mirroring.
/// Unknown local state keeps the remote copy.
async fn still_wanted(trees: &[(&Path, IgnoreMatcher)], relative: &str) -> Result<bool> {
    for (root, matcher) in trees {
        let local = local_path_for(root, relative)?;
        if matcher.is_file_excluded(&local) {
            return Ok(true);
        }
        if tokio::fs::try_exists(&local).await.unwrap_or(true) {
            return Ok(true);
        }
    }
    Ok(false)
}
