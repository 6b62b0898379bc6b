//! Restore orchestrator: download a snapshot into a local directory

use std::path::Path;

use tracing::Instrument;

use super::BackupEngine;
use crate::error::{DirsnapError, Result};
use crate::transfer::{DrainReport, TransferQueue, TransferTask};
use crate::types::{local_path_for, relative_path_of, RestoreReport, SNAPSHOT_KEY_ARITY};

impl BackupEngine {
    /// Download every object under `snapshot` (`<prefix>/<tier>/<date>`) that
    /// has no local counterpart in `target_dir`. Existing files are kept.
    pub async fn restore(
        &self,
        target_dir: &Path,
        bucket: &str,
        snapshot: &str,
    ) -> Result<RestoreReport> {
        let span = tracing::info_span!(
            "restore",
            bucket = %bucket,
            snapshot = %snapshot,
            dir = %target_dir.display()
        );
        self.restore_inner(target_dir, bucket, snapshot)
            .instrument(span)
            .await
    }

    async fn restore_inner(
        &self,
        target_dir: &Path,
        bucket: &str,
        snapshot: &str,
    ) -> Result<RestoreReport> {
        let snapshot = snapshot.trim_matches('/');
        if snapshot.split('/').count() != SNAPSHOT_KEY_ARITY
            || snapshot.split('/').any(str::is_empty)
        {
            return Err(DirsnapError::InvalidKey(format!(
                "snapshot must be <prefix>/<tier>/<date>, got {}",
                snapshot
            )));
        }

        tokio::fs::create_dir_all(target_dir).await?;
        let store = self.store(bucket);
        let queue = TransferQueue::new(self.options.concurrency);
        let listing_prefix = format!("{}/", snapshot);
        let mut lister = store.lister(listing_prefix.as_str());
        let mut report = RestoreReport::default();

        tracing::info!("Restore started");
        while lister.has_more() {
            let keys = match lister.next_page().await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::error!("Listing {} aborted: {}", listing_prefix, e);
                    report.listing_errors += 1;
                    break;
                }
            };

            for key in keys {
                report.listed += 1;
                let mapped =
                    relative_path_of(&key).and_then(|rel| local_path_for(target_dir, rel));
                let local = match mapped {
                    Ok(local) => local,
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", key, e);
                        report.failed += 1;
                        continue;
                    }
                };

                if tokio::fs::try_exists(&local).await.unwrap_or(false) {
                    tracing::debug!("Already present: {}", local.display());
                    report.already_present += 1;
                    continue;
                }
                if let Some(parent) = local.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        tracing::warn!("Cannot create {}: {}", parent.display(), e);
                        report.failed += 1;
                        continue;
                    }
                }

                queue.add(TransferTask::download(key, local));
                if queue.is_full() {
                    tally(&mut report, queue.drain(&store).await);
                }
            }
        }
        tally(&mut report, queue.drain(&store).await);

        tracing::info!(
            "Restore finished: {} listed, {} downloaded, {} already present, {} failed",
            report.listed,
            report.downloaded,
            report.already_present,
            report.failed
        );
        Ok(report)
    }
}

fn tally(report: &mut RestoreReport, drained: DrainReport) {
    report.downloaded += drained.succeeded;
    report.failed += drained.failed;
}
