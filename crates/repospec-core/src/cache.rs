//! Cache and share layer over a [`SpecStore`].
//!
//! [`SpecCache`] decides whether a stored spec is still fresh enough to
//! serve instead of regenerating, allocates short share ids for new specs,
//! and serves shared specs by id. Lookup failures are logged and treated as
//! misses; only the writes ([`SpecCache::put`], [`SpecCache::put_unpublished`]
//! and [`SpecCache::publish`]) report errors to the caller.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::models::{GeneratedSpec, StoredSpec};
use crate::reference::RepoReference;
use crate::store::{InsertOutcome, SpecStore};

/// Longest share id accepted on lookup.
const MAX_SHARE_ID_LEN: usize = 64;

/// How long a stored spec may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub window: Duration,
}

impl FreshnessPolicy {
    pub fn hours(hours: i64) -> Self {
        Self {
            window: Duration::hours(hours),
        }
    }

    /// Oldest `created_at` still considered fresh at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::hours(24)
    }
}

type ShareIdFn = Box<dyn Fn(usize) -> String + Send + Sync>;

pub struct SpecCache {
    store: Arc<dyn SpecStore>,
    policy: FreshnessPolicy,
    share_id_length: usize,
    max_attempts: u32,
    next_share_id: ShareIdFn,
}

impl SpecCache {
    pub fn new(
        store: Arc<dyn SpecStore>,
        policy: FreshnessPolicy,
        share_id_length: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            policy,
            share_id_length,
            max_attempts,
            next_share_id: Box::new(random_share_id),
        }
    }

    /// Replace the share id source. Used by tests to force collisions.
    pub fn with_share_id_source<F>(mut self, source: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.next_share_id = Box::new(source);
        self
    }

    pub fn store(&self) -> &Arc<dyn SpecStore> {
        &self.store
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Newest public spec for `reference` within the freshness window.
    pub async fn get_fresh(&self, reference: &RepoReference) -> Option<StoredSpec> {
        self.get_fresh_at(reference, Utc::now()).await
    }

    pub async fn get_fresh_at(
        &self,
        reference: &RepoReference,
        now: DateTime<Utc>,
    ) -> Option<StoredSpec> {
        let key = reference.cache_key();
        match self
            .store
            .latest_for_repo(&key, self.policy.cutoff(now))
            .await
        {
            Ok(hit) => {
                if let Some(spec) = &hit {
                    tracing::debug!(repo = %key, share_id = %spec.share_id, "cache hit");
                }
                hit
            }
            Err(e) => {
                tracing::warn!(repo = %key, error = %e, "cache lookup failed; treating as miss");
                None
            }
        }
    }

    /// Persist `spec` under a freshly allocated share id.
    ///
    /// Retries on share id collisions up to the configured attempt limit.
    pub async fn put(&self, spec: &GeneratedSpec, owner_id: Option<&str>) -> Result<StoredSpec> {
        self.insert_new(spec, owner_id, true).await
    }

    /// Like [`put`](Self::put), but the spec stays private (not served and
    /// not a cache hit) until [`publish`](Self::publish) is called.
    pub async fn put_unpublished(
        &self,
        spec: &GeneratedSpec,
        owner_id: Option<&str>,
    ) -> Result<StoredSpec> {
        self.insert_new(spec, owner_id, false).await
    }

    /// Make a spec stored with [`put_unpublished`](Self::put_unpublished)
    /// public.
    pub async fn publish(&self, share_id: &str) -> Result<()> {
        if !self.store.publish(share_id).await? {
            bail!("no spec with share id {}", share_id);
        }
        Ok(())
    }

    /// Drop a spec that was never published. Never fails.
    pub async fn discard(&self, share_id: &str) {
        match self.store.discard_unpublished(share_id).await {
            Ok(true) => tracing::debug!(share_id, "discarded unpublished spec"),
            Ok(false) => {}
            Err(e) => tracing::warn!(share_id, error = %e, "failed to discard unpublished spec"),
        }
    }

    async fn insert_new(
        &self,
        spec: &GeneratedSpec,
        owner_id: Option<&str>,
        is_public: bool,
    ) -> Result<StoredSpec> {
        let mut stored = StoredSpec {
            id: Uuid::new_v4().to_string(),
            share_id: String::new(),
            markdown: spec.markdown.clone(),
            sections: spec.sections.clone(),
            metadata: spec.metadata.clone(),
            view_count: 0,
            is_public,
            user_id: owner_id.map(str::to_string),
            created_at: Utc::now(),
        };

        for attempt in 1..=self.max_attempts {
            stored.share_id = (self.next_share_id)(self.share_id_length);
            match self.store.insert(&stored).await? {
                InsertOutcome::Inserted => {
                    tracing::info!(
                        share_id = %stored.share_id,
                        repo = %stored.cache_key(),
                        is_public,
                        "stored spec"
                    );
                    return Ok(stored);
                }
                InsertOutcome::ShareIdTaken => {
                    tracing::debug!(attempt, share_id = %stored.share_id, "share id collision");
                }
            }
        }

        bail!(
            "could not allocate a unique share id after {} attempts",
            self.max_attempts
        )
    }

    /// Public spec with this share id. Malformed ids, private specs and
    /// store errors all yield `None`.
    pub async fn get_by_share_id(&self, share_id: &str) -> Option<StoredSpec> {
        if !is_well_formed(share_id) {
            return None;
        }
        match self.store.get_by_share_id(share_id).await {
            Ok(Some(spec)) if spec.is_public => Some(spec),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(share_id, error = %e, "share lookup failed");
                None
            }
        }
    }

    /// Count one view. Never fails.
    pub async fn increment_view(&self, share_id: &str) {
        if !is_well_formed(share_id) {
            return;
        }
        if let Err(e) = self.store.increment_view(share_id).await {
            tracing::warn!(share_id, error = %e, "view count update failed");
        }
    }
}

/// Random base62 string of `len` characters.
pub fn random_share_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn is_well_formed(share_id: &str) -> bool {
    !share_id.is_empty()
        && share_id.len() <= MAX_SHARE_ID_LEN
        && share_id.bytes().all(|b| b.is_ascii_alphanumeric())
}
