//! Tiered snapshot retention
//!
//! Each tier is evaluated independently:
//! - daily: today's directory is the sync target on every run
//! - weekly/monthly: a new directory is taken when strictly more whole days
//!   than the tier cadence have passed since the newest one
//! - pruning keeps the N most recent directories of a tier and deletes the rest
//!
//! Directory names that do not parse as `YYYY-MM-DD` are left alone: they
//! are neither counted toward the limit nor deleted.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::store::RemoteStore;
use crate::types::{tier_prefix, RetentionConfig, SnapshotDir, Tier, SNAPSHOT_DATE_FORMAT};

/// Source of "today" for cadence decisions
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// UTC calendar date of the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock pinned to a settable date
#[derive(Debug)]
pub struct FixedClock {
    date: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Mutex::new(date),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        *self.date.lock() = date;
    }

    pub fn advance_days(&self, days: u64) {
        let mut date = self.date.lock();
        if let Some(next) = date.checked_add_days(chrono::Days::new(days)) {
            *date = next;
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.date.lock()
    }
}

/// Whole calendar days from `last` to `today` (negative if `last` is in the future)
pub fn elapsed_days(last: NaiveDate, today: NaiveDate) -> i64 {
    (today - last).num_days()
}

/// Parse remote directory names into snapshot directories, ascending by date
pub fn parse_snapshot_dirs<I, S>(tier: Tier, names: I) -> Vec<SnapshotDir>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut dirs: Vec<SnapshotDir> = names
        .into_iter()
        .filter_map(|name| {
            let name = name.as_ref();
            match NaiveDate::parse_from_str(name, SNAPSHOT_DATE_FORMAT) {
                Ok(date) => Some(SnapshotDir::new(tier, date)),
                Err(_) => {
                    tracing::warn!("Ignoring non-date {} directory {:?}", tier, name);
                    None
                }
            }
        })
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Whether a new snapshot of `tier` should be taken today.
/// `existing` must be sorted ascending.
pub fn needs_snapshot(tier: Tier, existing: &[SnapshotDir], today: NaiveDate) -> bool {
    let Some(cadence) = tier.cadence_days() else {
        return true;
    };
    match existing.last() {
        None => true,
        Some(newest) => elapsed_days(newest.date, today) > cadence,
    }
}

/// The oldest directories beyond `limit`. `existing` must be sorted ascending.
pub fn excess_snapshots(existing: &[SnapshotDir], limit: usize) -> &[SnapshotDir] {
    let excess = existing.len().saturating_sub(limit);
    &existing[..excess]
}

/// Result of enforcing a tier's limit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPrune {
    pub pruned: Vec<SnapshotDir>,
    pub objects_deleted: usize,
    pub failed: usize,
}

/// Retention limits bound to the decisions above
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    config: RetentionConfig,
}

impl RetentionPolicy {
    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Existing snapshot directories of a tier, ascending by date
    pub async fn discover(
        &self,
        store: &RemoteStore,
        prefix: &str,
        tier: Tier,
    ) -> Result<Vec<SnapshotDir>> {
        let names = store
            .list_top_level_names(&tier_prefix(prefix, tier))
            .await?;
        Ok(parse_snapshot_dirs(tier, names))
    }

    /// The directory to populate for `tier` today, if any
    pub async fn due_snapshot(
        &self,
        store: &RemoteStore,
        prefix: &str,
        tier: Tier,
        today: NaiveDate,
    ) -> Result<Option<SnapshotDir>> {
        if tier == Tier::Daily {
            return Ok(Some(SnapshotDir::new(tier, today)));
        }
        let existing = self.discover(store, prefix, tier).await?;
        Ok(needs_snapshot(tier, &existing, today).then(|| SnapshotDir::new(tier, today)))
    }

    /// Delete the oldest directories of `tier` beyond its configured limit
    pub async fn enforce(
        &self,
        store: &RemoteStore,
        prefix: &str,
        tier: Tier,
    ) -> Result<TierPrune> {
        let existing = self.discover(store, prefix, tier).await?;
        let limit = self.config.limit(tier);
        let mut outcome = TierPrune::default();

        for dir in excess_snapshots(&existing, limit) {
            tracing::info!(
                "Pruning {} snapshot {} of {} (limit {})",
                tier,
                dir.name(),
                prefix,
                limit
            );
            let summary = store.delete_prefix(&dir.prefix(prefix)).await?;
            outcome.objects_deleted += summary.deleted;
            outcome.failed += summary.failed;
            outcome.pruned.push(dir.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, SNAPSHOT_DATE_FORMAT).unwrap()
    }

    fn dirs(tier: Tier, dates: &[&str]) -> Vec<SnapshotDir> {
        parse_snapshot_dirs(tier, dates.iter().copied())
    }

    #[test]
    fn test_parse_sorts_and_skips_garbage() {
        let parsed = dirs(Tier::Weekly, &["2024-03-01", "latest", "2024-01-15", "2024-02-30"]);
        assert_eq!(
            parsed,
            vec![
                SnapshotDir::new(Tier::Weekly, date("2024-01-15")),
                SnapshotDir::new(Tier::Weekly, date("2024-03-01")),
            ]
        );
    }

    #[test]
    fn test_weekly_cadence() {
        let today = date("2024-06-10");
        let eight_days = dirs(Tier::Weekly, &["2024-06-02"]);
        let seven_days = dirs(Tier::Weekly, &["2024-06-03"]);
        let three_days = dirs(Tier::Weekly, &["2024-05-01", "2024-06-07"]);

        assert!(needs_snapshot(Tier::Weekly, &eight_days, today));
        assert!(!needs_snapshot(Tier::Weekly, &seven_days, today));
        assert!(!needs_snapshot(Tier::Weekly, &three_days, today));
        assert!(needs_snapshot(Tier::Weekly, &[], today));
    }

    #[test]
    fn test_same_day_rerun_never_creates_second_snapshot() {
        let today = date("2024-06-10");
        let existing = dirs(Tier::Monthly, &["2024-06-10"]);
        assert!(!needs_snapshot(Tier::Monthly, &existing, today));
        assert!(needs_snapshot(Tier::Daily, &existing, today));
    }

    #[test]
    fn test_excess_snapshots_are_oldest() {
        let existing = dirs(
            Tier::Weekly,
            &["2024-01-01", "2024-01-08", "2024-01-15", "2024-01-22", "2024-01-29"],
        );
        let excess = excess_snapshots(&existing, 3);
        assert_eq!(excess, &existing[..2]);
        assert!(excess_snapshots(&existing, 5).is_empty());
        assert!(excess_snapshots(&existing, 10).is_empty());
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(date("2024-02-28"));
        clock.advance_days(1);
        assert_eq!(clock.today(), date("2024-02-29"));
        clock.set(date("2025-01-01"));
        assert_eq!(clock.today(), date("2025-01-01"));
    }

    #[tokio::test]
    async fn test_enforce_deletes_whole_directories() {
        let backend = Arc::new(MemoryBackend::new());
        for day in ["2024-01-01", "2024-01-08", "2024-01-15"] {
            for file in ["a.txt", "sub/b.txt"] {
                let key = format!("backup/weekly/{}/{}", day, file);
                backend.insert("bucket", &key, "v", HashMap::new());
            }
        }
        backend.insert("bucket", "backup/daily/2024-01-01/a.txt", "v", HashMap::new());
        let store = RemoteStore::new(backend.clone(), "bucket");
        let policy = RetentionPolicy::new(RetentionConfig {
            daily: 1,
            weekly: 2,
            monthly: 1,
        });

        let outcome = policy.enforce(&store, "backup", Tier::Weekly).await.unwrap();
        assert_eq!(outcome.pruned, dirs(Tier::Weekly, &["2024-01-01"]));
        assert_eq!(outcome.objects_deleted, 2);

        let remaining = policy.discover(&store, "backup", Tier::Weekly).await.unwrap();
        assert_eq!(remaining, dirs(Tier::Weekly, &["2024-01-08", "2024-01-15"]));
        assert!(backend
            .object("bucket", "backup/daily/2024-01-01/a.txt")
            .is_some());
    }

    #[tokio::test]
    async fn test_due_snapshot_per_tier() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("bucket", "backup/weekly/2024-06-07/a", "v", HashMap::new());
        let store = RemoteStore::new(backend, "bucket");
        let policy = RetentionPolicy::new(RetentionConfig::default());
        let today = date("2024-06-10");

        assert_eq!(
            policy.due_snapshot(&store, "backup", Tier::Daily, today).await.unwrap(),
            Some(SnapshotDir::new(Tier::Daily, today))
        );
        assert_eq!(
            policy.due_snapshot(&store, "backup", Tier::Weekly, today).await.unwrap(),
            None
        );
        assert_eq!(
            policy.due_snapshot(&store, "backup", Tier::Monthly, today).await.unwrap(),
            Some(SnapshotDir::new(Tier::Monthly, today))
        );
    }
}
