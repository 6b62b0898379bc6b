//! Remote store client
//!
//! Wraps an [`ObjectBackend`] for one bucket and implements the operations the
//! handlers rely on: paginated listing, digest-aware existence checks, uploads
//! carrying digest metadata, idempotent deletes and downloads.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use super::backend::{ListPage, ObjectBackend, PutObject, DEFAULT_PAGE_SIZE};
use crate::error::{DirsnapError, Result};
use crate::local::{digest_to_base64, file_digest_async};
use crate::types::ObjectStatus;

/// User-metadata field holding the hex SHA-256 of the uploaded bytes
pub const DIGEST_METADATA_KEY: &str = "checksumsha256";

/// Largest page S3 will return
pub const MAX_PAGE_SIZE: i32 = 1000;

/// Handle on one bucket of a remote object store
#[derive(Clone)]
pub struct RemoteStore {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
    page_size: i32,
}

impl RemoteStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, bucket: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    /// Fetch a single page. A fresh listing starts with `token = None`.
    pub async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        self.backend
            .list_page(&self.bucket, prefix, token, self.page_size)
            .await
    }

    /// Start a new listing traversal with its own cursor
    pub fn lister(&self, prefix: impl Into<String>) -> Lister<'_> {
        Lister {
            store: self,
            prefix: prefix.into(),
            token: None,
            started: false,
            has_more: false,
        }
    }

    /// Every key under `prefix`, draining pagination
    pub async fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        let mut lister = self.lister(prefix);
        let mut keys = Vec::new();
        while lister.has_more() {
            keys.extend(lister.next_page().await?);
        }
        Ok(keys)
    }

    /// Whether `key` exists and carries `expected_digest` as its digest metadata.
    ///
    /// Any lookup failure reads as absent. An object without digest metadata
    /// exists but never matches, so it gets re-uploaded.
    pub async fn exists(&self, key: &str, expected_digest: &str) -> ObjectStatus {
        match self.backend.head(&self.bucket, key).await {
            Ok(head) => ObjectStatus {
                exists: true,
                digest_matches: head
                    .metadata
                    .get(DIGEST_METADATA_KEY)
                    .is_some_and(|digest| digest == expected_digest),
            },
            Err(e) => {
                tracing::debug!("Treating {} as absent: {}", key, e);
                ObjectStatus::missing()
            }
        }
    }

    /// Upload a local file, computing its digest first. Returns the digest.
    pub async fn upload(&self, local_path: &Path, key: &str) -> Result<String> {
        let digest = file_digest_async(local_path).await?;
        self.upload_with_digest(local_path, key, &digest).await?;
        Ok(digest)
    }

    /// Upload a local file whose digest the caller already computed
    pub async fn upload_with_digest(
        &self,
        local_path: &Path,
        key: &str,
        digest: &str,
    ) -> Result<()> {
        let content_type = mime_guess::from_path(local_path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        let mut metadata = HashMap::new();
        metadata.insert(DIGEST_METADATA_KEY.to_string(), digest.to_string());

        tracing::info!(
            "Uploading {} to s3://{}/{}",
            local_path.display(),
            self.bucket,
            key
        );
        self.backend
            .put_file(
                &self.bucket,
                PutObject {
                    key: key.to_string(),
                    local_path: local_path.to_path_buf(),
                    metadata,
                    content_type,
                    checksum_sha256: Some(digest_to_base64(digest)?),
                },
            )
            .await
    }

    /// Delete a key; absent keys are not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(&self.bucket, key).await?;
        tracing::info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }

    /// Download `key` to `local_path`, replacing any file already there.
    /// A failed download may leave a partial file behind.
    pub async fn download(&self, key: &str, local_path: &Path) -> Result<u64> {
        match tokio::fs::remove_file(local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let bytes = self
            .backend
            .get_to_file(&self.bucket, key, local_path)
            .await?;
        tracing::info!(
            "Downloaded {} bytes from s3://{}/{} to {}",
            bytes,
            self.bucket,
            key,
            local_path.display()
        );
        Ok(bytes)
    }

    /// Distinct first path segments below `prefix`. Keys with no `/` after
    /// the prefix are plain objects and are not reported.
    pub async fn list_top_level_names(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut lister = self.lister(prefix);
        while lister.has_more() {
            for key in lister.next_page().await? {
                if let Some(name) = top_level_name(prefix, &key) {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Delete every key under `prefix`. Individual delete failures are
    /// logged and counted; a listing failure aborts.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<DeleteSummary> {
        let mut summary = DeleteSummary::default();
        let mut lister = self.lister(prefix);
        while lister.has_more() {
            for key in lister.next_page().await? {
                match self.delete(&key).await {
                    Ok(()) => summary.deleted += 1,
                    Err(e) => {
                        tracing::warn!("Failed to delete {}: {}", key, e);
                        summary.failed += 1;
                    }
                }
            }
        }
        Ok(summary)
    }
}

/// Outcome of a prefix delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: usize,
    pub failed: usize,
}

/// Pagination cursor owned by a single listing traversal
pub struct Lister<'a> {
    store: &'a RemoteStore,
    prefix: String,
    token: Option<String>,
    started: bool,
    has_more: bool,
}

impl Lister<'_> {
    /// True before the first page and while the store reports truncation
    pub fn has_more(&self) -> bool {
        !self.started || self.has_more
    }

    pub async fn next_page(&mut self) -> Result<Vec<String>> {
        if !self.has_more() {
            return Ok(Vec::new());
        }

        let page = self
            .store
            .list_page(&self.prefix, self.token.as_deref())
            .await?;

        if page.has_more && page.continuation_token.is_none() {
            return Err(DirsnapError::Listing(format!(
                "truncated listing of {} without continuation token",
                self.prefix
            )));
        }

        self.started = true;
        self.has_more = page.has_more;
        self.token = page.continuation_token;
        Ok(page.keys)
    }
}

fn top_level_name<'k>(prefix: &str, key: &'k str) -> Option<&'k str> {
    let rest = key.strip_prefix(prefix)?;
    let (name, _) = rest.split_once('/')?;
    (!name.is_empty()).then_some(name)
}
