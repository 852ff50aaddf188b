//! In-memory [`SpecStore`] implementation for tests and single-process use.
//!
//! Specs live in a `Vec` behind `std::sync::RwLock`. Lookups are linear
//! scans, which is fine at the sizes this backend is meant for.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{PopularRepo, StoredSpec};

use super::{InsertOutcome, SpecStore};

pub struct InMemorySpecStore {
    specs: RwLock<Vec<StoredSpec>>,
}

impl InMemorySpecStore {
    pub fn new() -> Self {
        Self {
            specs: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored specs.
    pub fn len(&self) -> usize {
        self.specs.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<StoredSpec>>> {
        self.specs
            .read()
            .map_err(|_| anyhow!("spec store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredSpec>>> {
        self.specs
            .write()
            .map_err(|_| anyhow!("spec store lock poisoned"))
    }
}

impl Default for InMemorySpecStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpecStore for InMemorySpecStore {
    async fn insert(&self, spec: &StoredSpec) -> Result<InsertOutcome> {
        let mut specs = self.write()?;
        if specs.iter().any(|s| s.share_id == spec.share_id) {
            return Ok(InsertOutcome::ShareIdTaken);
        }
        specs.push(spec.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn latest_for_repo(
        &self,
        cache_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredSpec>> {
        let specs = self.read()?;
        Ok(specs
            .iter()
            .filter(|s| s.is_public && s.created_at >= since && s.cache_key() == cache_key)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_by_share_id(&self, share_id: &str) -> Result<Option<StoredSpec>> {
        let specs = self.read()?;
        Ok(specs.iter().find(|s| s.share_id == share_id).cloned())
    }

    async fn increment_view(&self, share_id: &str) -> Result<bool> {
        let mut specs = self.write()?;
        match specs.iter_mut().find(|s| s.share_id == share_id) {
            Some(spec) => {
                spec.view_count += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<StoredSpec>> {
        let specs = self.read()?;
        let mut owned: Vec<StoredSpec> = specs
            .iter()
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }

    async fn set_visibility(
        &self,
        share_id: &str,
        user_id: &str,
        is_public: bool,
    ) -> Result<bool> {
        let mut specs = self.write()?;
        match specs
            .iter_mut()
            .find(|s| s.share_id == share_id && s.user_id.as_deref() == Some(user_id))
        {
            Some(spec) => {
                spec.is_public = is_public;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, share_id: &str, user_id: &str) -> Result<bool> {
        let mut specs = self.write()?;
        let before = specs.len();
        specs.retain(|s| !(s.share_id == share_id && s.user_id.as_deref() == Some(user_id)));
        Ok(specs.len() != before)
    }

    async fn publish(&self, share_id: &str) -> Result<bool> {
        let mut specs = self.write()?;
        match specs.iter_mut().find(|s| s.share_id == share_id) {
            Some(spec) => {
                spec.is_public = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn discard_unpublished(&self, share_id: &str) -> Result<bool> {
        let mut specs = self.write()?;
        let before = specs.len();
        specs.retain(|s| !(s.share_id == share_id && !s.is_public));
        Ok(specs.len() != before)
    }

    async fn popular_repos(&self, limit: i64) -> Result<Vec<PopularRepo>> {
        let specs = self.read()?;
        let mut groups: BTreeMap<String, (&StoredSpec, PopularRepo)> = BTreeMap::new();
        for spec in specs.iter().filter(|s| s.is_public) {
            let entry = groups.entry(spec.cache_key()).or_insert_with(|| {
                (
                    spec,
                    PopularRepo {
                        repo_owner: String::new(),
                        repo_name: String::new(),
                        repo_url: String::new(),
                        analysis_count: 0,
                        total_views: 0,
                    },
                )
            });
            if spec.created_at > entry.0.created_at {
                entry.0 = spec;
            }
            entry.1.analysis_count += 1;
            entry.1.total_views += spec.view_count;
        }

        // BTreeMap iteration keeps owner/repo order for the final tie-break.
        let mut ranked: Vec<PopularRepo> = groups
            .into_values()
            .map(|(newest, mut repo)| {
                repo.repo_owner = newest.metadata.repo_owner.clone();
                repo.repo_name = newest.metadata.repo_name.clone();
                repo.repo_url = newest.metadata.repo_url.clone();
                repo
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.total_views
                .cmp(&a.total_views)
                .then(b.analysis_count.cmp(&a.analysis_count))
        });
        ranked.truncate(limit.max(0) as usize);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpecMetadata;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn spec(share_id: &str, owner: &str, user: Option<&str>, created_at: DateTime<Utc>) -> StoredSpec {
        StoredSpec {
            id: format!("id-{}", share_id),
            share_id: share_id.into(),
            markdown: format!("# {}", share_id),
            sections: BTreeMap::new(),
            metadata: SpecMetadata {
                repo_owner: owner.into(),
                repo_name: "Widgets".into(),
                repo_url: format!("https://github.com/{}/Widgets", owner),
                generated_at: created_at,
                analysis_version: "1.0".into(),
                commit_sha: None,
            },
            view_count: 0,
            is_public: true,
            user_id: user.map(str::to_string),
            created_at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn duplicate_share_id_is_rejected() {
        let store = InMemorySpecStore::new();
        let first = spec("aaaa", "acme", None, t0());
        let mut second = spec("aaaa", "other", None, t0());
        second.markdown = "# different".into();

        assert_eq!(store.insert(&first).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&second).await.unwrap(), InsertOutcome::ShareIdTaken);
        assert_eq!(store.len(), 1);
        let kept = store.get_by_share_id("aaaa").await.unwrap().unwrap();
        assert_eq!(kept.markdown, "# aaaa");
    }

    #[tokio::test]
    async fn latest_for_repo_picks_newest_public_within_window() {
        let store = InMemorySpecStore::new();
        store.insert(&spec("old", "Acme", None, t0())).await.unwrap();
        store
            .insert(&spec("new", "ACME", None, t0() + Duration::hours(2)))
            .await
            .unwrap();
        let mut hidden = spec("hidden", "acme", Some("u1"), t0() + Duration::hours(3));
        hidden.is_public = false;
        store.insert(&hidden).await.unwrap();

        let hit = store
            .latest_for_repo("acme/widgets", t0() - Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.share_id, "new");

        let miss = store
            .latest_for_repo("acme/widgets", t0() + Duration::hours(5))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn views_and_owner_scoped_mutations() {
        let store = InMemorySpecStore::new();
        store.insert(&spec("s1", "acme", Some("u1"), t0())).await.unwrap();

        assert!(store.increment_view("s1").await.unwrap());
        assert!(store.increment_view("s1").await.unwrap());
        assert!(!store.increment_view("nope").await.unwrap());
        assert_eq!(store.get_by_share_id("s1").await.unwrap().unwrap().view_count, 2);

        assert!(!store.set_visibility("s1", "u2", false).await.unwrap());
        assert!(store.set_visibility("s1", "u1", false).await.unwrap());
        assert!(!store.get_by_share_id("s1").await.unwrap().unwrap().is_public);

        assert!(!store.delete("s1", "u2").await.unwrap());
        assert!(store.delete("s1", "u1").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn publish_and_discard_unpublished() {
        let store = InMemorySpecStore::new();
        let mut pending = spec("p1", "acme", None, t0());
        pending.is_public = false;
        store.insert(&pending).await.unwrap();

        assert!(store.publish("p1").await.unwrap());
        assert!(!store.publish("nope").await.unwrap());
        assert!(store.get_by_share_id("p1").await.unwrap().unwrap().is_public);
        assert!(!store.discard_unpublished("p1").await.unwrap());
        assert_eq!(store.len(), 1);

        let mut abandoned = spec("p2", "acme", None, t0());
        abandoned.is_public = false;
        store.insert(&abandoned).await.unwrap();
        assert!(store.discard_unpublished("p2").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn popular_repos_rank_by_views_then_analyses() {
        let store = InMemorySpecStore::new();
        let mut a1 = spec("a1", "acme", None, t0());
        a1.view_count = 3;
        let mut a2 = spec("a2", "Acme", None, t0() + Duration::hours(1));
        a2.view_count = 4;
        let mut b1 = spec("b1", "beta", None, t0());
        b1.view_count = 7;
        let mut c1 = spec("c1", "gamma", None, t0());
        c1.view_count = 1;
        let mut hidden = spec("h1", "delta", Some("u1"), t0());
        hidden.view_count = 100;
        hidden.is_public = false;
        for s in [&a1, &a2, &b1, &c1, &hidden] {
            store.insert(s).await.unwrap();
        }

        let popular = store.popular_repos(10).await.unwrap();
        let owners: Vec<&str> = popular.iter().map(|p| p.repo_owner.as_str()).collect();
        assert_eq!(owners, vec!["Acme", "beta", "gamma"]);
        assert_eq!(popular[0].analysis_count, 2);
        assert_eq!(popular[0].total_views, 7);
        assert_eq!(popular[1].analysis_count, 1);

        assert_eq!(store.popular_repos(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_for_user_is_newest_first_and_limited() {
        let store = InMemorySpecStore::new();
        for i in 0..4 {
            store
                .insert(&spec(&format!("s{}", i), "acme", Some("u1"), t0() + Duration::minutes(i)))
                .await
                .unwrap();
        }
        store.insert(&spec("x", "acme", Some("u2"), t0())).await.unwrap();

        let listed = store.list_for_user("u1", 3).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.share_id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s2", "s1"]);
    }
}
