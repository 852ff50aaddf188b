//! Storage abstraction for generated specs.
//!
//! The [`SpecStore`] trait covers the one table the pipeline touches:
//! stored specs with their share ids and view counters. Implementations
//! must be `Send + Sync`; they are shared by every request.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert`](SpecStore::insert) | Persist a new spec unless its share id is taken |
//! | [`latest_for_repo`](SpecStore::latest_for_repo) | Newest public spec for a repo created since a cutoff |
//! | [`get_by_share_id`](SpecStore::get_by_share_id) | Exact lookup by share id |
//! | [`increment_view`](SpecStore::increment_view) | Atomically bump a view counter |
//! | [`list_for_user`](SpecStore::list_for_user) | Specs owned by a user, newest first |
//! | [`set_visibility`](SpecStore::set_visibility) | Owner-scoped public/private switch |
//! | [`delete`](SpecStore::delete) | Owner-scoped delete |
//! | [`publish`](SpecStore::publish) | Make a freshly inserted spec public |
//! | [`discard_unpublished`](SpecStore::discard_unpublished) | Drop a spec that was never published |
//! | [`popular_repos`](SpecStore::popular_repos) | Repositories ranked by views of their public specs |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{PopularRepo, StoredSpec};

/// Result of [`SpecStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another spec already uses this share id; nothing was written.
    ShareIdTaken,
}

#[async_trait]
pub trait SpecStore: Send + Sync {
    /// Persist `spec`. Must not overwrite an existing row with the same
    /// share id.
    async fn insert(&self, spec: &StoredSpec) -> Result<InsertOutcome>;

    /// Newest public spec whose lowercased `owner/repo` equals `cache_key`
    /// and whose `created_at >= since`.
    async fn latest_for_repo(
        &self,
        cache_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredSpec>>;

    async fn get_by_share_id(&self, share_id: &str) -> Result<Option<StoredSpec>>;

    /// Returns `false` when no spec has this share id.
    async fn increment_view(&self, share_id: &str) -> Result<bool>;

    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<StoredSpec>>;

    /// Returns `false` when the spec does not exist or is not owned by `user_id`.
    async fn set_visibility(&self, share_id: &str, user_id: &str, is_public: bool)
        -> Result<bool>;

    /// Returns `false` when the spec does not exist or is not owned by `user_id`.
    async fn delete(&self, share_id: &str, user_id: &str) -> Result<bool>;

    /// Mark a spec public regardless of owner. Returns `false` when no spec
    /// has this share id.
    async fn publish(&self, share_id: &str) -> Result<bool>;

    /// Delete a spec only if it is still private. Returns `false` when
    /// nothing was deleted.
    async fn discard_unpublished(&self, share_id: &str) -> Result<bool>;

    /// Public specs grouped by repository, most viewed first. Ties go to
    /// the repository analyzed more often, then to `owner/repo` order.
    /// Owner, name and URL come from the newest spec of each repository.
    async fn popular_repos(&self, limit: i64) -> Result<Vec<PopularRepo>>;
}
