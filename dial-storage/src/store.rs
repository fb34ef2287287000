//! Store contract for setting aggregates.
//!
//! One `SettingStore<A>` per aggregate type. Implementations are the system
//! of record; the cache and the event bus are derived state.

use async_trait::async_trait;
use dial_core::{Aggregate, DialResult, ListFilters, ListOptions};

/// Persistence operations for one aggregate type.
///
/// # Concurrency
///
/// `update` is a compare-and-set on the stored version. When zero rows match
/// it returns `NotFound`, whether the row never existed, was deleted
/// concurrently, or carries a different version. Callers treat all three the
/// same way: reload and retry the read-modify-write.
///
/// # Bulk operations
///
/// Bulk variants are not transactional. They apply entries in order, stop at
/// the first failure and return it; entries already applied stay applied.
#[async_trait]
pub trait SettingStore<A: Aggregate>: Send + Sync {
    /// Insert or replace by id. Fails with `AlreadyExists` when a different
    /// aggregate already holds the same scope.
    async fn save(&self, aggregate: &A) -> DialResult<()>;

    /// Replace the stored row only if its version equals `expected_version`.
    async fn update(&self, aggregate: &A, expected_version: i64) -> DialResult<()>;

    async fn delete(&self, id: A::Id) -> DialResult<()>;

    async fn find_by_id(&self, id: A::Id) -> DialResult<Option<A>>;

    /// Exact scope match. An absent organization or service matches only rows
    /// where that dimension is also absent, never as a wildcard.
    async fn find_by_scope(&self, scope: &A::Scope) -> DialResult<Option<A>>;

    async fn exists_by_scope(&self, scope: &A::Scope) -> DialResult<bool> {
        Ok(self.find_by_scope(scope).await?.is_some())
    }

    async fn exists_by_id(&self, id: A::Id) -> DialResult<bool> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    async fn list(&self, options: &ListOptions) -> DialResult<Vec<A>>;

    async fn count(&self, filters: &ListFilters) -> DialResult<u64>;

    async fn bulk_save(&self, aggregates: &[A]) -> DialResult<()> {
        for aggregate in aggregates {
            self.save(aggregate).await?;
        }
        Ok(())
    }

    /// Each entry pairs the mutated aggregate with the version it was loaded at.
    async fn bulk_update(&self, updates: &[(A, i64)]) -> DialResult<()> {
        for (aggregate, expected_version) in updates {
            self.update(aggregate, *expected_version).await?;
        }
        Ok(())
    }

    async fn bulk_delete(&self, ids: &[A::Id]) -> DialResult<()> {
        for id in ids {
            self.delete(*id).await?;
        }
        Ok(())
    }
}
