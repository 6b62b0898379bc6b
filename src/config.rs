//! Configuration file model
//!
//! ```toml
//! [remote]
//! endpoint = "https://s3.eu-central-1.wasabisys.com"
//! region = "eu-central-1"
//! access_key = "..."
//! secret_key = "..."
//!
//! [dirbackup]
//! seconds_interval = 3600
//! dirs = "my-bucket|www|/var/www, my-bucket|etc|/etc/nginx"
//! ignore_file = "~/.config/dirsnap/ignore"
//! daily_rotation = 7
//! weekly_rotation = 4
//! monthly_rotation = 6
//!
//! [transfer]
//! page_size = 100
//! concurrency = 5
//! parallel_uploads = false
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{DirsnapError, Result};
use crate::engine::EngineOptions;
use crate::local::IgnoreSet;
use crate::store::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::transfer::DEFAULT_CONCURRENCY;
use crate::types::{BackupTarget, RetentionConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub dirbackup: DirBackupConfig,
    pub transfer: TransferConfig,
}

/// Connection settings for the object store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Path-style addressing, needed by most non-AWS endpoints
    pub force_path_style: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            force_path_style: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirBackupConfig {
    pub enabled: bool,
    pub seconds_interval: u64,
    /// Comma separated `bucket|prefix|directory` triples
    pub dirs: String,
    pub ignore_file: Option<String>,
    pub daily_rotation: usize,
    pub weekly_rotation: usize,
    pub monthly_rotation: usize,
}

impl Default for DirBackupConfig {
    fn default() -> Self {
        let retention = RetentionConfig::default();
        Self {
            enabled: true,
            seconds_interval: 3600,
            dirs: String::new(),
            ignore_file: None,
            daily_rotation: retention.daily,
            weekly_rotation: retention.weekly,
            monthly_rotation: retention.monthly,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub page_size: i32,
    pub concurrency: usize,
    /// Upload through the transfer queue during sync
    pub parallel_uploads: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            parallel_uploads: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DirsnapError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let backup = &self.dirbackup;
        for (name, value) in [
            ("daily_rotation", backup.daily_rotation),
            ("weekly_rotation", backup.weekly_rotation),
            ("monthly_rotation", backup.monthly_rotation),
        ] {
            if value == 0 {
                return Err(DirsnapError::Config(format!("{} must be at least 1", name)));
            }
        }
        if backup.enabled && backup.seconds_interval == 0 {
            return Err(DirsnapError::Config(
                "seconds_interval must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.transfer.page_size) {
            return Err(DirsnapError::Config(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if self.transfer.concurrency == 0 {
            return Err(DirsnapError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        parse_directory_spec(&backup.dirs)?;
        Ok(())
    }

    pub fn retention(&self) -> RetentionConfig {
        RetentionConfig {
            daily: self.dirbackup.daily_rotation,
            weekly: self.dirbackup.weekly_rotation,
            monthly: self.dirbackup.monthly_rotation,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            page_size: self.transfer.page_size,
            concurrency: self.transfer.concurrency,
            parallel_uploads: self.transfer.parallel_uploads,
        }
    }

    /// Configured targets, with directories that are missing on disk dropped
    pub fn targets(&self) -> Result<Vec<BackupTarget>> {
        let targets = parse_directory_spec(&self.dirbackup.dirs)?;
        Ok(retain_existing_directories(targets))
    }

    pub fn ignore_set(&self) -> Result<IgnoreSet> {
        match &self.dirbackup.ignore_file {
            Some(path) => IgnoreSet::from_file(&expand_path(path)),
            None => Ok(IgnoreSet::empty()),
        }
    }
}

/// Expand a leading `~` the way a shell would
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Parse `bucket|prefix|directory[, ...]` into targets grouped by
/// `(bucket, prefix)`, in first-seen order, with duplicate entries removed.
pub fn parse_directory_spec(spec: &str) -> Result<Vec<BackupTarget>> {
    let mut grouped: IndexMap<(String, String), Vec<PathBuf>> = IndexMap::new();

    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, '|');
        let (bucket, prefix, directory) = match (parts.next(), parts.next(), parts.next()) {
            (Some(bucket), Some(prefix), Some(directory)) => {
                (bucket.trim(), prefix.trim(), directory.trim())
            }
            (_, None, _) => {
                return Err(DirsnapError::Config(format!(
                    "invalid directory {}: no bucket specified",
                    entry
                )))
            }
            _ => {
                return Err(DirsnapError::Config(format!(
                    "invalid directory {}: no bucket prefix specified",
                    entry
                )))
            }
        };

        if bucket.is_empty() || prefix.is_empty() || directory.is_empty() {
            return Err(DirsnapError::Config(format!(
                "invalid directory {}: bucket, prefix and directory are required",
                entry
            )));
        }
        if prefix.contains('/') {
            return Err(DirsnapError::Config(format!(
                "invalid directory {}: prefix must be a single path segment",
                entry
            )));
        }

        let directories = grouped
            .entry((bucket.to_string(), prefix.to_string()))
            .or_default();
        let directory = expand_path(directory);
        if !directories.contains(&directory) {
            directories.push(directory);
        }
    }

    Ok(grouped
        .into_iter()
        .map(|((bucket, prefix), directories)| BackupTarget {
            bucket,
            prefix,
            directories,
        })
        .collect())
}

/// Drop directories that do not exist or are not directories, and targets left empty
pub fn retain_existing_directories(targets: Vec<BackupTarget>) -> Vec<BackupTarget> {
    targets
        .into_iter()
        .filter_map(|mut target| {
            target.directories.retain(|dir| {
                let is_dir = dir.is_dir();
                if !is_dir {
                    tracing::warn!("Skipping {}: not a directory", dir.display());
                }
                is_dir
            });
            (!target.directories.is_empty()).then_some(target)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_groups_and_dedups() {
        let targets = parse_directory_spec(
            "b1|www|/var/www , b1|www|/srv/www,b2|etc|/etc/nginx, b1|www|/var/www",
        )
        .unwrap();

        assert_eq!(
            targets,
            vec![
                BackupTarget {
                    bucket: "b1".to_string(),
                    prefix: "www".to_string(),
                    directories: vec![PathBuf::from("/var/www"), PathBuf::from("/srv/www")],
                },
                BackupTarget {
                    bucket: "b2".to_string(),
                    prefix: "etc".to_string(),
                    directories: vec![PathBuf::from("/etc/nginx")],
                },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        assert!(parse_directory_spec("just-a-path").unwrap_err().is_config());
        assert!(parse_directory_spec("bucket|/path").unwrap_err().is_config());
        assert!(parse_directory_spec("|prefix|/path").unwrap_err().is_config());
        assert!(parse_directory_spec("bucket|a/b|/path").unwrap_err().is_config());
        assert!(parse_directory_spec("").unwrap().is_empty());
    }

    #[test]
    fn test_missing_directories_are_dropped() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let spec = format!(
            "b|p|{}, b|p|{}, b|q|{}",
            dir.path().display(),
            file.display(),
            dir.path().join("missing").display()
        );

        let targets = retain_existing_directories(parse_directory_spec(&spec).unwrap());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].prefix, "p");
        assert_eq!(targets[0].directories, vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [remote]
            endpoint = "http://localhost:9000"
            access_key = "minio"
            secret_key = "minio123"

            [dirbackup]
            dirs = "bucket|backup|/data"
            daily_rotation = 3
            weekly_rotation = 2
            monthly_rotation = 1

            [transfer]
            concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.remote.force_path_style);
        assert_eq!(
            config.retention(),
            RetentionConfig {
                daily: 3,
                weekly: 2,
                monthly: 1
            }
        );
        assert_eq!(config.transfer.concurrency, 8);
        assert_eq!(config.transfer.page_size, DEFAULT_PAGE_SIZE);
        assert!(!config.engine_options().parallel_uploads);
    }

    #[test]
    fn test_config_validation() {
        let zero_rotation = "[dirbackup]\nweekly_rotation = 0\n";
        assert!(Config::from_toml_str(zero_rotation).unwrap_err().is_config());

        let big_page = "[transfer]\npage_size = 5000\n";
        assert!(Config::from_toml_str(big_page).unwrap_err().is_config());

        let bad_dirs = "[dirbackup]\ndirs = \"nope\"\n";
        assert!(Config::from_toml_str(bad_dirs).unwrap_err().is_config());

        assert!(Config::from_toml_str("[remote\n").unwrap_err().is_config());
        assert!(Config::from_toml_str("").is_ok());
    }
}
