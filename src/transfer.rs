//! Bounded, deduplicating transfer queue
//!
//! Tasks are indexed by remote key in insertion order. A drain spawns one
//! tokio task per queued transfer, waits for the whole batch and removes each
//! entry once its transfer has finished, whether it succeeded or not. Callers
//! bound concurrency by draining whenever [`TransferQueue::is_full`] reports
//! the watermark has been reached.

use std::path::PathBuf;

use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{DirsnapError, Result};
use crate::store::RemoteStore;

/// Default number of transfers run per drain
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Which way bytes move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// A single queued transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub remote_key: String,
    pub local_path: PathBuf,
    pub direction: TransferDirection,
}

impl TransferTask {
    pub fn upload(local_path: impl Into<PathBuf>, remote_key: impl Into<String>) -> Self {
        Self {
            remote_key: remote_key.into(),
            local_path: local_path.into(),
            direction: TransferDirection::Upload,
        }
    }

    pub fn download(remote_key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_key: remote_key.into(),
            local_path: local_path.into(),
            direction: TransferDirection::Download,
        }
    }
}

/// Outcome of one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
    /// Remote keys whose transfer failed
    pub failed_keys: Vec<String>,
}

/// Run one transfer against the store
pub async fn execute(store: &RemoteStore, task: &TransferTask) -> Result<u64> {
    match task.direction {
        TransferDirection::Download => store.download(&task.remote_key, &task.local_path).await,
        TransferDirection::Upload => {
            store.upload(&task.local_path, &task.remote_key).await?;
            let size = tokio::fs::metadata(&task.local_path).await?.len();
            Ok(size)
        }
    }
}

/// In-memory queue of pending transfers, keyed by remote key
pub struct TransferQueue {
    tasks: Mutex<IndexMap<String, TransferTask>>,
    watermark: usize,
}

impl TransferQueue {
    pub fn new(watermark: usize) -> Self {
        Self {
            tasks: Mutex::new(IndexMap::new()),
            watermark: watermark.max(1),
        }
    }

    /// Queue a task. Returns false, leaving the queued task in place, when a
    /// task for the same remote key is already pending.
    pub fn add(&self, task: TransferTask) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&task.remote_key) {
            return false;
        }
        tasks.insert(task.remote_key.clone(), task);
        true
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    /// The queue holds as many tasks as should run at once
    pub fn is_full(&self) -> bool {
        self.len() >= self.watermark
    }

    fn remove(&self, remote_key: &str) -> bool {
        self.tasks.lock().shift_remove(remote_key).is_some()
    }

    /// Run every queued task concurrently and wait for all of them
    pub async fn drain(&self, store: &RemoteStore) -> DrainReport {
        let batch: Vec<TransferTask> = self.tasks.lock().values().cloned().collect();
        if batch.is_empty() {
            return DrainReport::default();
        }
        tracing::debug!("Draining {} transfers", batch.len());

        let handles = batch.into_iter().map(|task| {
            let store = store.clone();
            let key = task.remote_key.clone();
            let handle = tokio::spawn(async move { execute(&store, &task).await });
            async move {
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(DirsnapError::Internal(format!(
                        "transfer task panicked: {}",
                        e
                    ))),
                };
                (key, outcome)
            }
        });

        let mut report = DrainReport::default();
        for (key, outcome) in join_all(handles).await {
            self.remove(&key);
            match outcome {
                Ok(bytes) => {
                    report.succeeded += 1;
                    report.bytes += bytes;
                }
                Err(e) => {
                    tracing::warn!("Transfer of {} failed: {}", key, e);
                    report.failed += 1;
                    report.failed_keys.push(key);
                }
            }
        }
        report
    }
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, Operation};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (Arc<MemoryBackend>, RemoteStore, TempDir) {
        let backend = Arc::new(MemoryBackend::new());
        for name in ["a", "b", "c"] {
            let key = format!("p/daily/2024-01-01/{}", name);
            backend.insert("bucket", &key, name, HashMap::new());
        }
        let store = RemoteStore::new(backend.clone(), "bucket");
        (backend, store, TempDir::new().unwrap())
    }

    #[test]
    fn test_add_dedups_by_remote_key() {
        let queue = TransferQueue::new(5);
        assert!(queue.add(TransferTask::download("k", "/tmp/one")));
        assert!(!queue.add(TransferTask::download("k", "/tmp/two")));
        assert_eq!(queue.len(), 1);

        let kept = queue.tasks.lock().get("k").cloned().unwrap();
        assert_eq!(kept.local_path, PathBuf::from("/tmp/one"));
    }

    #[test]
    fn test_watermark() {
        let queue = TransferQueue::new(2);
        assert!(!queue.is_full());
        queue.add(TransferTask::download("a", "/tmp/a"));
        queue.add(TransferTask::download("b", "/tmp/b"));
        assert!(queue.is_full());
        assert_eq!(TransferQueue::new(0).watermark(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_runs_once() {
        let (backend, store, dir) = setup();
        let queue = TransferQueue::default();
        let target = dir.path().join("a");

        queue.add(TransferTask::download("p/daily/2024-01-01/a", &target));
        queue.add(TransferTask::download("p/daily/2024-01-01/a", &target));
        let report = queue.drain(&store).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(backend.calls(Operation::Get), 1);
        assert!(queue.is_empty());
        assert_eq!(std::fs::read_to_string(target).unwrap(), "a");
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let (backend, store, dir) = setup();
        backend.fail_key("p/daily/2024-01-01/b");
        let queue = TransferQueue::default();
        for name in ["a", "b", "c"] {
            queue.add(TransferTask::download(
                format!("p/daily/2024-01-01/{}", name),
                dir.path().join(name),
            ));
        }

        let report = queue.drain(&store).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_keys, vec!["p/daily/2024-01-01/b"]);
        assert!(queue.is_empty());
        assert!(dir.path().join("a").exists());
        assert!(dir.path().join("c").exists());
    }

    #[tokio::test]
    async fn test_upload_direction() {
        let (backend, store, dir) = setup();
        let local = dir.path().join("up.bin");
        std::fs::write(&local, b"payload").unwrap();

        let queue = TransferQueue::default();
        queue.add(TransferTask::upload(&local, "p/daily/2024-01-01/up.bin"));
        let report = queue.drain(&store).await;

        assert_eq!(report.bytes, 7);
        assert_eq!(
            backend.object("bucket", "p/daily/2024-01-01/up.bin").unwrap().data,
            b"payload"
        );
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let (_, store, _dir) = setup();
        let report = TransferQueue::default().drain(&store).await;
        assert_eq!(report, DrainReport::default());
    }
}
