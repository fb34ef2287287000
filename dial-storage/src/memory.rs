//! In-memory system of record.

use async_trait::async_trait;
use dial_core::{
    Aggregate, DialError, DialResult, ListFilters, ListOptions, SortField, SortOrder,
    StorageError,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::store::SettingStore;

struct Table<A: Aggregate> {
    rows: HashMap<A::Id, A>,
    /// Unique index: one aggregate per scope.
    by_scope: HashMap<A::Scope, A::Id>,
}

impl<A: Aggregate> Default for Table<A> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            by_scope: HashMap::new(),
        }
    }
}

/// `SettingStore` backed by a locked map with a unique scope index.
///
/// Stored rows never carry pending events; the outbox belongs to the
/// instance the caller mutated.
pub struct InMemoryStore<A: Aggregate> {
    table: Arc<RwLock<Table<A>>>,
}

impl<A: Aggregate> Clone for InMemoryStore<A> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<A: Aggregate> Default for InMemoryStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> InMemoryStore<A> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
        }
    }

    fn read(&self) -> DialResult<RwLockReadGuard<'_, Table<A>>> {
        self.table
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> DialResult<RwLockWriteGuard<'_, Table<A>>> {
        self.table
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn not_found(id: A::Id) -> DialError {
        DialError::not_found(A::AGGREGATE_TYPE, id.into())
    }
}

fn stored_copy<A: Aggregate>(aggregate: &A) -> A {
    let mut row = aggregate.clone();
    row.take_events();
    row
}

fn compare<A: Aggregate>(a: &A, b: &A, sort_by: SortField) -> Ordering {
    let primary = match sort_by {
        SortField::CreatedAt => a.revision().created_at.cmp(&b.revision().created_at),
        SortField::UpdatedAt => a.revision().updated_at.cmp(&b.revision().updated_at),
        SortField::Key => a.key().cmp(b.key()),
    };
    // UUIDv7 ids break ties in creation order
    primary.then_with(|| {
        let (left, right): (Uuid, Uuid) = (a.id().into(), b.id().into());
        left.cmp(&right)
    })
}

#[async_trait]
impl<A: Aggregate> SettingStore<A> for InMemoryStore<A> {
    async fn save(&self, aggregate: &A) -> DialResult<()> {
        let mut table = self.write()?;
        let id = aggregate.id();
        let scope = aggregate.scope();

        if let Some(holder) = table.by_scope.get(&scope) {
            if *holder != id {
                return Err(StorageError::AlreadyExists {
                    aggregate_type: A::AGGREGATE_TYPE,
                    scope: scope.to_string(),
                }
                .into());
            }
        }

        if let Some(previous) = table.rows.insert(id, stored_copy(aggregate)) {
            let old_scope = previous.scope();
            if old_scope != scope {
                table.by_scope.remove(&old_scope);
            }
        }
        table.by_scope.insert(scope, id);
        Ok(())
    }

    async fn update(&self, aggregate: &A, expected_version: i64) -> DialResult<()> {
        let mut table = self.write()?;
        let id = aggregate.id();
        match table.rows.get_mut(&id) {
            Some(row) if row.version() == expected_version => {
                *row = stored_copy(aggregate);
                Ok(())
            }
            _ => Err(Self::not_found(id)),
        }
    }

    async fn delete(&self, id: A::Id) -> DialResult<()> {
        let mut table = self.write()?;
        let row = table.rows.remove(&id).ok_or_else(|| Self::not_found(id))?;
        table.by_scope.remove(&row.scope());
        Ok(())
    }

    async fn find_by_id(&self, id: A::Id) -> DialResult<Option<A>> {
        Ok(self.read()?.rows.get(&id).cloned())
    }

    async fn find_by_scope(&self, scope: &A::Scope) -> DialResult<Option<A>> {
        let table = self.read()?;
        Ok(table
            .by_scope
            .get(scope)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn exists_by_scope(&self, scope: &A::Scope) -> DialResult<bool> {
        Ok(self.read()?.by_scope.contains_key(scope))
    }

    async fn exists_by_id(&self, id: A::Id) -> DialResult<bool> {
        Ok(self.read()?.rows.contains_key(&id))
    }

    async fn list(&self, options: &ListOptions) -> DialResult<Vec<A>> {
        options.validate()?;
        let table = self.read()?;

        let mut matching: Vec<&A> = table
            .rows
            .values()
            .filter(|row| row.matches(&options.filters))
            .collect();
        matching.sort_by(|a, b| {
            let ordering = compare(*a, *b, options.sort_by);
            match options.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(matching
            .into_iter()
            .skip(options.offset())
            .take(options.limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
        let table = self.read()?;
        Ok(table.rows.values().filter(|row| row.matches(filters)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dial_core::{
        Configuration, Environment, ErrorKind, NewConfiguration, OrganizationId, ScopeKey,
        ServiceName, UserId, ValueType,
    };
    use serde_json::json;

    fn config(key: &str, env: Environment) -> Configuration {
        Configuration::create(NewConfiguration::new(
            ScopeKey::new(key, env).expect("valid scope"),
            json!("value"),
            ValueType::String,
            "database",
            "test configuration",
            UserId::now_v7(),
        ))
        .expect("create should succeed")
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryStore::<Configuration>::new();
        let cfg = config("db.host", Environment::Production);

        store.save(&cfg).await.expect("save");
        let found = store.find_by_id(cfg.id()).await.expect("find").expect("present");
        assert_eq!(found.id(), cfg.id());
        assert!(found.pending_events().is_empty());

        let by_scope = store.find_by_scope(&cfg.scope()).await.expect("find");
        assert_eq!(by_scope.map(|c| c.id()), Some(cfg.id()));
        assert!(store.exists_by_scope(&cfg.scope()).await.expect("exists"));
        assert!(store.exists_by_id(cfg.id()).await.expect("exists"));
    }

    #[tokio::test]
    async fn test_scope_is_unique() {
        let store = InMemoryStore::<Configuration>::new();
        store.save(&config("db.host", Environment::Production)).await.expect("save");

        let err = store
            .save(&config("db.host", Environment::Production))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store.save(&config("db.host", Environment::Staging)).await.expect("other env");
    }

    #[tokio::test]
    async fn test_absent_dimension_is_not_a_wildcard() {
        let store = InMemoryStore::<Configuration>::new();
        let org = OrganizationId::now_v7();
        let scoped = ScopeKey::new("db.host", Environment::Production)
            .expect("valid")
            .with_organization(org);
        let cfg = Configuration::create(NewConfiguration::new(
            scoped,
            json!("value"),
            ValueType::String,
            "database",
            "org override",
            UserId::now_v7(),
        ))
        .expect("create");
        store.save(&cfg).await.expect("save");

        let global = ScopeKey::new("db.host", Environment::Production).expect("valid");
        assert!(store.find_by_scope(&global).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let store = InMemoryStore::<Configuration>::new();
        let mut cfg = config("db.host", Environment::Production);
        store.save(&cfg).await.expect("save");

        let loaded_at = cfg.version();
        cfg.update_value(json!("10.0.0.2"), UserId::now_v7()).expect("mutate");
        store.update(&cfg, loaded_at).await.expect("update");

        // a second writer still holding version 1 loses
        let err = store.update(&cfg, loaded_at).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let stored = store.find_by_id(cfg.id()).await.expect("find").expect("present");
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.value(), &json!("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_update_after_concurrent_delete_is_not_found() {
        let store = InMemoryStore::<Configuration>::new();
        let mut cfg = config("db.host", Environment::Production);
        store.save(&cfg).await.expect("save");

        store.delete(cfg.id()).await.expect("delete");
        cfg.update_value(json!("10.0.0.3"), UserId::now_v7()).expect("mutate");

        let err = store.update(&cfg, 1).await.unwrap_err();
        assert_eq!(err, DialError::not_found(dial_core::AggregateType::Configuration, cfg.id().into()));
        assert!(store.find_by_id(cfg.id()).await.expect("reload").is_none());
        assert!(!store.exists_by_scope(&cfg.scope()).await.expect("exists"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = InMemoryStore::<Configuration>::new();
        let cfg = config("db.host", Environment::Production);
        assert_eq!(
            store.delete(cfg.id()).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_pages() {
        let store = InMemoryStore::<Configuration>::new();
        let billing = ServiceName::parse("billing").expect("valid");
        for key in ["billing.a", "billing.c", "billing.b"] {
            let scope = ScopeKey::new(key, Environment::Production)
                .expect("valid")
                .with_service(billing.clone());
            let cfg = Configuration::create(NewConfiguration::new(
                scope,
                json!(1),
                ValueType::Number,
                "limits",
                "d",
                UserId::now_v7(),
            ))
            .expect("create");
            store.save(&cfg).await.expect("save");
        }
        store.save(&config("other", Environment::Production)).await.expect("save");

        let options = ListOptions::new()
            .with_sort(SortField::Key, SortOrder::Asc)
            .with_page(1, 2)
            .with_filters(ListFilters::new().service(billing.clone()));
        let page: Vec<String> = store
            .list(&options)
            .await
            .expect("list")
            .iter()
            .map(|c| c.key().to_string())
            .collect();
        assert_eq!(page, vec!["billing.a", "billing.b"]);

        let second = store
            .list(&options.clone().with_page(2, 2))
            .await
            .expect("list");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].key(), "billing.c");

        assert_eq!(
            store.count(&ListFilters::new().service(billing)).await.expect("count"),
            3
        );
        assert_eq!(store.count(&ListFilters::new()).await.expect("count"), 4);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_paging() {
        let store = InMemoryStore::<Configuration>::new();
        let err = store
            .list(&ListOptions::new().with_page(0, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_bulk_save_stops_at_first_failure() {
        let store = InMemoryStore::<Configuration>::new();
        let first = config("a", Environment::Production);
        let duplicate = config("a", Environment::Production);
        let never = config("b", Environment::Production);

        let err = store
            .bulk_save(&[first.clone(), duplicate, never.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(store.exists_by_id(first.id()).await.expect("exists"));
        assert!(!store.exists_by_id(never.id()).await.expect("exists"));
    }

    #[tokio::test]
    async fn test_bulk_delete_keeps_applied_entries() {
        let store = InMemoryStore::<Configuration>::new();
        let a = config("a", Environment::Production);
        let missing = config("b", Environment::Production);
        let c = config("c", Environment::Production);
        store.bulk_save(&[a.clone(), c.clone()]).await.expect("save");

        assert!(store
            .bulk_delete(&[a.id(), missing.id(), c.id()])
            .await
            .is_err());
        assert!(!store.exists_by_id(a.id()).await.expect("exists"));
        assert!(store.exists_by_id(c.id()).await.expect("exists"));
    }

    #[tokio::test]
    async fn test_bulk_update_uses_expected_versions() {
        let store = InMemoryStore::<Configuration>::new();
        let mut a = config("a", Environment::Production);
        let mut b = config("b", Environment::Production);
        store.bulk_save(&[a.clone(), b.clone()]).await.expect("save");

        a.update_value(json!("x"), UserId::now_v7()).expect("mutate");
        b.update_value(json!("y"), UserId::now_v7()).expect("mutate");
        store.bulk_update(&[(a.clone(), 1), (b.clone(), 1)]).await.expect("bulk update");

        let stored = store.find_by_id(b.id()).await.expect("find").expect("present");
        assert_eq!(stored.version(), 2);
    }
}
