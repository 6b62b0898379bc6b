//! Object backend trait
//!
//! This is the raw seam between the engine and a concrete object store. An
//! adapter only moves bytes and metadata. Pagination bookkeeping,
//! digest comparison and prefix handling live in [`super::RemoteStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Default number of keys requested per listing call
pub const DEFAULT_PAGE_SIZE: i32 = 100;

/// One page of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Opaque token to pass back for the next page
    pub continuation_token: Option<String>,
    /// False once the listing is exhausted
    pub has_more: bool,
}

/// Metadata returned by a HEAD-style lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// User metadata attached at upload time
    pub metadata: HashMap<String, String>,
}

/// Everything needed to store one local file
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub local_path: PathBuf,
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
    /// Base64 SHA-256 for server-side integrity checking, when supported
    pub checksum_sha256: Option<String>,
}

/// Storage adapter for one kind of object store (S3-compatible, in-memory, ...)
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// List at most `max_keys` keys under `prefix`, resuming after `token`
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// Fetch metadata for a key. Any failure, including absence, is an error.
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead>;

    /// Stream a local file into the store
    async fn put_file(&self, bucket: &str, object: PutObject) -> Result<()>;

    /// Remove a key. Absent keys succeed.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Stream an object into a freshly created local file, returning bytes written
    async fn get_to_file(&self, bucket: &str, key: &str, local_path: &Path) -> Result<u64>;
}
