//! Dirsnap - tiered directory snapshots on object storage
//!
//! Incrementally mirrors local directory trees into an S3-compatible bucket
//! under daily, weekly and monthly snapshot directories, propagates local
//! deletions, enforces per-tier retention and restores any snapshot back to
//! disk.

pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod retention;
pub mod store;
pub mod transfer;
pub mod types;

pub use config::Config;
pub use engine::{BackupEngine, EngineOptions};
pub use error::{DirsnapError, Result};
pub use store::RemoteStore;
pub use transfer::TransferQueue;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
