//! In-process object backend
//!
//! Keeps objects in a sorted map so listings come back in the same
//! lexicographic order S3 uses, and paginates with the last returned key as
//! the continuation token. Individual keys can be made to fail, and the
//! backend counts every call, which lets tests observe upload and delete
//! behavior exactly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{ListPage, ObjectBackend, ObjectHead, PutObject};
use crate::error::{DirsnapError, Result};

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
}

/// Which backend call a reported count refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Head,
    Put,
    Delete,
    Get,
}

#[derive(Default)]
struct CallCounters {
    list: AtomicUsize,
    head: AtomicUsize,
    put: AtomicUsize,
    delete: AtomicUsize,
    get: AtomicUsize,
}

impl CallCounters {
    fn slot(&self, op: Operation) -> &AtomicUsize {
        match op {
            Operation::List => &self.list,
            Operation::Head => &self.head,
            Operation::Put => &self.put,
            Operation::Delete => &self.delete,
            Operation::Get => &self.get,
        }
    }
}

/// Object backend held entirely in memory
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    failing_keys: Mutex<HashSet<String>>,
    failing_prefixes: Mutex<HashSet<String>>,
    calls: CallCounters,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, bypassing counters
    pub fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        metadata: HashMap<String, String>,
    ) {
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                metadata,
                content_type: None,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys of a bucket in listing order
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Make put/head/delete/get on this key fail until cleared
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_string());
    }

    /// Make listings of exactly this prefix fail until cleared
    pub fn fail_listing(&self, prefix: &str) {
        self.failing_prefixes.lock().insert(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_keys.lock().clear();
        self.failing_prefixes.lock().clear();
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.calls.slot(op).load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        for op in [
            Operation::List,
            Operation::Head,
            Operation::Put,
            Operation::Delete,
            Operation::Get,
        ] {
            self.calls.slot(op).store(0, Ordering::SeqCst);
        }
    }

    fn record(&self, op: Operation) {
        self.calls.slot(op).fetch_add(1, Ordering::SeqCst);
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if self.failing_keys.lock().contains(key) {
            return Err(DirsnapError::Store(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        self.record(Operation::List);
        if self.failing_prefixes.lock().contains(prefix) {
            return Err(DirsnapError::Listing(format!(
                "injected failure listing {}",
                prefix
            )));
        }

        let limit = usize::try_from(max_keys.max(1)).unwrap_or(1);
        let start = match token {
            Some(after) => Bound::Excluded((bucket.to_string(), after.to_string())),
            None => Bound::Included((bucket.to_string(), prefix.to_string())),
        };

        let objects = self.objects.lock();
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .map(|((b, k), _)| (b, k))
            .take_while(|(b, k)| *b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone());

        let keys: Vec<String> = matching.by_ref().take(limit).collect();
        let has_more = matching.next().is_some();

        Ok(ListPage {
            continuation_token: if has_more { keys.last().cloned() } else { None },
            keys,
            has_more,
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        self.record(Operation::Head);
        self.check_key(key)?;
        self.object(bucket, key)
            .map(|o| ObjectHead { metadata: o.metadata })
            .ok_or_else(|| DirsnapError::Store(format!("NoSuchKey: {}", key)))
    }

    async fn put_file(&self, bucket: &str, object: PutObject) -> Result<()> {
        self.record(Operation::Put);
        self.check_key(&object.key)?;
        let data = tokio::fs::read(&object.local_path).await?;
        self.objects.lock().insert(
            (bucket.to_string(), object.key),
            StoredObject {
                data,
                metadata: object.metadata,
                content_type: object.content_type,
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(Operation::Delete);
        self.check_key(key)?;
        self.objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn get_to_file(&self, bucket: &str, key: &str, local_path: &Path) -> Result<u64> {
        self.record(Operation::Get);
        self.check_key(key)?;
        let object = self
            .object(bucket, key)
            .ok_or_else(|| DirsnapError::Store(format!("NoSuchKey: {}", key)))?;
        tokio::fs::write(local_path, &object.data).await?;
        Ok(object.data.len() as u64)
    }
}
