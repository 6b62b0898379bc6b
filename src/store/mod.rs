//! Remote object storage
//!
//! # Feature Flags
//!
//! The S3 backend requires the `cloud` feature. The in-memory backend and the
//! [`RemoteStore`] client are always available.

mod backend;
mod client;
mod memory;
#[cfg(feature = "cloud")]
mod s3;

pub use backend::{ListPage, ObjectBackend, ObjectHead, PutObject, DEFAULT_PAGE_SIZE};
pub use client::{DeleteSummary, Lister, RemoteStore, DIGEST_METADATA_KEY, MAX_PAGE_SIZE};
pub use memory::{MemoryBackend, Operation, StoredObject};
#[cfg(feature = "cloud")]
pub use s3::S3Backend;
