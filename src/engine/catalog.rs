//! Read-only view of what a bucket holds

use super::BackupEngine;
use crate::error::Result;
use crate::types::{tier_prefix, Catalog, CatalogEntry, Tier};

impl BackupEngine {
    /// Backup roots of `bucket`, each with its tiers and their snapshot dates
    pub async fn catalog(&self, bucket: &str) -> Result<Catalog> {
        let store = self.store(bucket);
        let mut keys = Vec::new();

        for root in store.list_top_level_names("").await? {
            let mut tiers = Vec::with_capacity(Tier::ALL.len());
            for tier in Tier::ALL {
                let dates = store
                    .list_top_level_names(&tier_prefix(&root, tier))
                    .await?
                    .into_iter()
                    .map(CatalogEntry::leaf)
                    .collect();
                tiers.push(CatalogEntry::branch(tier.as_str(), dates));
            }
            keys.push(CatalogEntry::branch(root, tiers));
        }

        tracing::debug!("Catalog of {} has {} roots", bucket, keys.len());
        Ok(Catalog { keys })
    }
}
