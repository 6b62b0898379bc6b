//! Core types for dirsnap

use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{DirsnapError, Result};

/// Calendar-date format used for snapshot directory names
pub const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Number of `/`-delimited segments in front of a snapshot's relative path
/// (`<prefix>/<tier>/<date>/`)
pub const SNAPSHOT_KEY_ARITY: usize = 3;

/// Retention category of a snapshot directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }

    /// Days that must strictly elapse before a new snapshot of this tier is taken.
    /// `None` means the tier is refreshed on every run.
    pub fn cadence_days(&self) -> Option<i64> {
        match self {
            Tier::Daily => None,
            Tier::Weekly => Some(7),
            Tier::Monthly => Some(30),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            _ => Err(format!("Unknown rotation: {} (expected daily|weekly|monthly)", s)),
        }
    }
}

/// Fully qualified location of one file inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    pub prefix: String,
    pub tier: Tier,
    pub date: NaiveDate,
    /// Forward-slash separated path relative to the backed up directory
    pub relative_path: String,
}

impl SnapshotKey {
    pub fn new(
        prefix: impl Into<String>,
        tier: Tier,
        date: NaiveDate,
        relative_path: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            tier,
            date,
            relative_path: relative_path.into(),
        }
    }

    /// Remote object key: `<prefix>/<tier>/<date>/<relative_path>`
    pub fn object_key(&self) -> String {
        format!(
            "{}{}",
            snapshot_prefix(&self.prefix, self.tier, self.date),
            self.relative_path
        )
    }
}

/// Key prefix (with trailing slash) of a whole snapshot directory
pub fn snapshot_prefix(prefix: &str, tier: Tier, date: NaiveDate) -> String {
    format!(
        "{}/{}/{}/",
        prefix,
        tier.as_str(),
        date.format(SNAPSHOT_DATE_FORMAT)
    )
}

/// Key prefix (with trailing slash) under which all snapshot directories of a tier live
pub fn tier_prefix(prefix: &str, tier: Tier) -> String {
    format!("{}/{}/", prefix, tier.as_str())
}

/// Recover the relative path of an object key by dropping exactly the first
/// three segments. Keys with fewer segments, or an empty remainder, are rejected.
pub fn relative_path_of(key: &str) -> Result<&str> {
    let mut segments = key.splitn(SNAPSHOT_KEY_ARITY + 1, '/');
    for _ in 0..SNAPSHOT_KEY_ARITY {
        match segments.next() {
            Some(segment) if !segment.is_empty() => {}
            _ => return Err(DirsnapError::InvalidKey(key.to_string())),
        }
    }
    match segments.next() {
        Some(rest) if !rest.is_empty() => Ok(rest),
        _ => Err(DirsnapError::InvalidKey(key.to_string())),
    }
}

/// Map a forward-slash relative path onto a local root, refusing anything
/// that would escape it.
pub fn local_path_for(root: &Path, relative_path: &str) -> Result<PathBuf> {
    let relative = Path::new(relative_path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(DirsnapError::InvalidKey(format!(
            "relative path escapes target directory: {}",
            relative_path
        )));
    }
    Ok(relative_path
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment)))
}

/// Forward-slash relative path of `path` under `root`, independent of host separators
pub fn relative_key_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        DirsnapError::Internal(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_str().ok_or_else(|| {
                DirsnapError::InvalidKey(format!("non UTF-8 file name: {}", path.display()))
            })?),
            _ => {
                return Err(DirsnapError::InvalidKey(format!(
                    "unexpected path component in {}",
                    path.display()
                )))
            }
        }
    }
    Ok(segments.join("/"))
}

/// A dated snapshot directory of one tier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotDir {
    pub tier: Tier,
    pub date: NaiveDate,
}

impl SnapshotDir {
    pub fn new(tier: Tier, date: NaiveDate) -> Self {
        Self { tier, date }
    }

    /// Directory name as stored remotely
    pub fn name(&self) -> String {
        self.date.format(SNAPSHOT_DATE_FORMAT).to_string()
    }

    pub fn prefix(&self, prefix: &str) -> String {
        snapshot_prefix(prefix, self.tier, self.date)
    }
}

/// Result of an existence check against the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectStatus {
    pub exists: bool,
    /// True only when stored digest metadata equals the expected digest
    pub digest_matches: bool,
}

impl ObjectStatus {
    pub fn missing() -> Self {
        Self::default()
    }

    /// An object that is present and needs no upload
    pub fn is_current(&self) -> bool {
        self.exists && self.digest_matches
    }
}

/// Maximum number of snapshot directories kept per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
}

impl RetentionConfig {
    pub fn limit(&self, tier: Tier) -> usize {
        match tier {
            Tier::Daily => self.daily,
            Tier::Weekly => self.weekly,
            Tier::Monthly => self.monthly,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
        }
    }
}

/// One `(bucket, prefix)` destination and the local directories mirrored into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub bucket: String,
    pub prefix: String,
    pub directories: Vec<PathBuf>,
}

/// Node of the catalog tree shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// `None` on leaves (snapshot dates)
    pub children: Option<Vec<CatalogEntry>>,
}

impl CatalogEntry {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: None,
        }
    }

    pub fn branch(name: impl Into<String>, children: Vec<CatalogEntry>) -> Self {
        Self {
            name: name.into(),
            children: Some(children),
        }
    }
}

/// Everything restorable from one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub keys: Vec<CatalogEntry>,
}

impl Catalog {
    /// Indented JSON as printed by `dirsnap view`
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Counters for one sync pass over a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub uploaded: usize,
    /// Uploads that replaced an object with a different (or missing) digest
    pub replaced: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Remote listings that aborted (snapshot discovery)
    pub listing_errors: usize,
    /// Snapshot directories populated during this run
    pub snapshots: Vec<SnapshotDir>,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.scanned += other.scanned;
        self.uploaded += other.uploaded;
        self.replaced += other.replaced;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.listing_errors += other.listing_errors;
        self.snapshots.extend(other.snapshots);
    }
}

/// Counters for one prune pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub scanned: usize,
    /// Remote objects removed because the local file disappeared
    pub mirrored_deletions: usize,
    /// Snapshot directories removed by retention
    pub pruned: Vec<SnapshotDir>,
    pub failed: usize,
    pub listing_errors: usize,
}

impl PruneReport {
    pub fn merge(&mut self, other: PruneReport) {
        self.scanned += other.scanned;
        self.mirrored_deletions += other.mirrored_deletions;
        self.pruned.extend(other.pruned);
        self.failed += other.failed;
        self.listing_errors += other.listing_errors;
    }
}

/// Counters for one restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub listed: usize,
    pub already_present: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub listing_errors: usize,
}

/// Totals of one scheduled pass over every configured target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub directories: usize,
    /// Directories whose sync or prune could not start
    pub setup_failures: usize,
    pub sync: SyncReport,
    pub prune: PruneReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, SNAPSHOT_DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_object_key_layout() {
        let key = SnapshotKey::new("backup", Tier::Daily, date("2024-01-01"), "sub/b.txt");
        assert_eq!(key.object_key(), "backup/daily/2024-01-01/sub/b.txt");
    }

    #[test]
    fn test_relative_path_strips_three_segments() {
        assert_eq!(
            relative_path_of("backup/daily/2024-01-01/sub/b.txt").unwrap(),
            "sub/b.txt"
        );
        assert_eq!(
            relative_path_of("backup/weekly/2024-01-01/a.txt").unwrap(),
            "a.txt"
        );
    }

    #[test]
    fn test_relative_path_rejects_short_keys() {
        assert!(relative_path_of("backup/daily/2024-01-01").is_err());
        assert!(relative_path_of("backup/daily/2024-01-01/").is_err());
        assert!(relative_path_of("backup/daily").is_err());
        assert!(relative_path_of("//x/y").is_err());
        assert!(relative_path_of("").is_err());
    }

    #[test]
    fn test_local_path_rejects_escape() {
        let root = Path::new("/restore");
        assert!(local_path_for(root, "../etc/passwd").is_err());
        assert!(local_path_for(root, "a/../../b").is_err());
        assert_eq!(
            local_path_for(root, "sub/b.txt").unwrap(),
            PathBuf::from("/restore").join("sub").join("b.txt")
        );
    }

    #[test]
    fn test_relative_key_path_uses_forward_slashes() {
        let root = Path::new("/data");
        let path = root.join("sub").join("deep").join("c.txt");
        assert_eq!(relative_key_path(root, &path).unwrap(), "sub/deep/c.txt");
        assert!(relative_key_path(root, Path::new("/elsewhere/x")).is_err());
    }

    #[test]
    fn test_tier_parse_roundtrip() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert_eq!("WEEKLY".parse::<Tier>().unwrap(), Tier::Weekly);
        assert!("hourly".parse::<Tier>().is_err());
    }

    #[test]
    fn test_catalog_serializes_null_leaf_children() {
        let catalog = Catalog {
            keys: vec![CatalogEntry::branch(
                "backup",
                vec![CatalogEntry::branch(
                    "daily",
                    vec![CatalogEntry::leaf("2024-01-01")],
                )],
            )],
        };
        let json = serde_json::to_value(&catalog).unwrap();
        assert_eq!(
            json["keys"][0]["children"][0]["children"][0]["children"],
            serde_json::Value::Null
        );

        let pretty = catalog.to_pretty_json().unwrap();
        assert!(pretty.starts_with("{\n  \"keys\": ["));
        assert!(pretty.contains("\"name\": \"2024-01-01\""));
    }
}
