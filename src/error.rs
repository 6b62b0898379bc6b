//! Error types for dirsnap

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for dirsnap operations
pub type Result<T> = std::result::Result<T, DirsnapError>;

/// Main error type for dirsnap
#[derive(Error, Debug)]
pub enum DirsnapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store error: {0}")]
    Store(String),

    #[error("Listing failed: {0}")]
    Listing(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ignore pattern error: {0}")]
    Ignore(String),

    #[error("A backup run is already in progress")]
    AlreadyRunning,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DirsnapError {
    /// Per-item failure that should be logged and skipped, never fatal to a run
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirsnapError::Io(_)
                | DirsnapError::Walk { .. }
                | DirsnapError::Fingerprint { .. }
                | DirsnapError::Store(_)
        )
    }

    /// Failure during setup; the engine must not start
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DirsnapError::Config(_) | DirsnapError::Toml(_) | DirsnapError::Ignore(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let io = DirsnapError::Io(std::io::Error::other("disk"));
        assert!(io.is_transient());
        assert!(!io.is_config());

        let config = DirsnapError::Config("missing bucket".to_string());
        assert!(config.is_config());
        assert!(!config.is_transient());

        let listing = DirsnapError::Listing("truncated response".to_string());
        assert!(!listing.is_transient());
        assert!(!listing.is_config());
    }

    #[test]
    fn test_walk_error_mentions_path() {
        let err = DirsnapError::Walk {
            path: PathBuf::from("/srv/data"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/srv/data"));
    }
}
