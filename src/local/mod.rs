//! Local filesystem side of a backup: traversal, filtering and digests

mod fingerprint;
mod ignore_set;
mod walker;

pub use fingerprint::{digest_bytes, digest_to_base64, file_digest, file_digest_async};
pub use ignore_set::{IgnoreMatcher, IgnoreSet};
pub use walker::TreeWalker;
