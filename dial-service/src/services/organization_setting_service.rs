use dial_core::{
    DialResult, ListFilters, ListOptions, NewOrganizationSetting, OrganizationId,
    OrganizationSetting, OrganizationSettingId, OrganizationSettingScope, UserId,
};
use dial_storage::SettingStore;
use serde_json::Value;
use std::sync::Arc;

use super::aggregate_handler::{AggregateHandler, ServiceContext};

/// Commands and queries for organization settings.
#[derive(Clone)]
pub struct OrganizationSettingService {
    handler: AggregateHandler<OrganizationSetting>,
}

impl OrganizationSettingService {
    pub fn new(store: Arc<dyn SettingStore<OrganizationSetting>>, context: ServiceContext) -> Self {
        Self {
            handler: AggregateHandler::new(store, context),
        }
    }

    pub async fn create(&self, params: NewOrganizationSetting) -> DialResult<OrganizationSetting> {
        match OrganizationSetting::create(params) {
            Ok(setting) => self.handler.create(setting).await,
            Err(e) => self.handler.rejected("create", e),
        }
    }

    pub async fn get(
        &self,
        scope: &OrganizationSettingScope,
    ) -> DialResult<Option<OrganizationSetting>> {
        self.handler.get(scope).await
    }

    pub async fn get_by_id(&self, id: OrganizationSettingId) -> DialResult<OrganizationSetting> {
        self.handler.get_by_id(id).await
    }

    pub async fn list_for_organization(
        &self,
        organization_id: OrganizationId,
        options: ListOptions,
    ) -> DialResult<Vec<OrganizationSetting>> {
        let filters = options.filters.clone().organization(organization_id);
        self.handler.list(&options.with_filters(filters)).await
    }

    pub async fn update_value(
        &self,
        id: OrganizationSettingId,
        value: Value,
        acting_user: UserId,
    ) -> DialResult<OrganizationSetting> {
        self.handler
            .mutate(id, "update_value", |s| s.update_value(value, acting_user))
            .await
    }

    pub async fn mark_as_inherited(
        &self,
        id: OrganizationSettingId,
        parent_id: OrganizationId,
        acting_user: UserId,
    ) -> DialResult<OrganizationSetting> {
        self.handler
            .mutate(id, "mark_as_inherited", |s| {
                s.mark_as_inherited(parent_id, acting_user)
            })
            .await
    }

    pub async fn unmark_as_inherited(
        &self,
        id: OrganizationSettingId,
        acting_user: UserId,
    ) -> DialResult<OrganizationSetting> {
        self.handler
            .mutate(id, "unmark_as_inherited", |s| {
                s.unmark_as_inherited(acting_user)
            })
            .await
    }

    pub async fn delete(&self, id: OrganizationSettingId, acting_user: UserId) -> DialResult<()> {
        self.handler.remove(id, |s| s.delete(acting_user)).await
    }

    pub async fn bulk_delete(
        &self,
        ids: &[OrganizationSettingId],
        acting_user: UserId,
    ) -> DialResult<()> {
        self.handler
            .bulk_remove(ids, |s| s.delete(acting_user))
            .await
    }

    pub async fn list(&self, options: &ListOptions) -> DialResult<Vec<OrganizationSetting>> {
        self.handler.list(options).await
    }

    pub async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
        self.handler.count(filters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::metrics::ServiceMetrics;
    use dial_core::{Aggregate, ErrorKind, EventType};
    use dial_events::EventBus;
    use dial_storage::{InMemoryCacheBackend, InMemoryStore, SettingsCache};
    use dial_test_utils::{fixtures, RecordingEventBus};
    use serde_json::json;

    fn service() -> (OrganizationSettingService, Arc<RecordingEventBus>) {
        let config = ServiceConfig::default();
        let bus = Arc::new(RecordingEventBus::new());
        let context = ServiceContext::new(
            SettingsCache::new(Arc::new(InMemoryCacheBackend::new()), config.cache.clone()),
            bus.clone() as Arc<dyn EventBus>,
            Arc::new(ServiceMetrics::new().expect("metrics")),
            config,
        );
        (
            OrganizationSettingService::new(Arc::new(InMemoryStore::new()), context),
            bus,
        )
    }

    #[tokio::test]
    async fn test_inheritance_transitions() {
        let (service, bus) = service();
        let actor = fixtures::actor();
        let org = OrganizationId::now_v7();
        let parent = OrganizationId::now_v7();

        let created = service
            .create(NewOrganizationSetting::new(
                org,
                "billing",
                "seat_limit",
                json!(25),
                dial_core::ValueType::Number,
                actor,
            ))
            .await
            .expect("create");

        let err = service
            .mark_as_inherited(created.id(), org, actor)
            .await
            .expect_err("self parent");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let inherited = service
            .mark_as_inherited(created.id(), parent, actor)
            .await
            .expect("inherit");
        assert_eq!(inherited.parent_id(), Some(parent));

        let own = service
            .unmark_as_inherited(created.id(), actor)
            .await
            .expect("own value");
        assert!(!own.is_inherited());
        assert_eq!(own.parent_id(), None);
        assert_eq!(own.version(), 3);

        let err = service
            .unmark_as_inherited(created.id(), actor)
            .await
            .expect_err("not inherited");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let listed = service
            .list_for_organization(org, ListOptions::new())
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(
            bus.published_types(),
            vec![
                EventType::OrganizationSettingCreated,
                EventType::OrganizationSettingUpdated,
                EventType::OrganizationSettingUpdated,
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_delete_clears_every_setting() {
        let (service, bus) = service();
        let actor = fixtures::actor();
        let org = OrganizationId::now_v7();

        let mut ids = Vec::new();
        for key in ["seat_limit", "storage_gb"] {
            let setting = service
                .create(NewOrganizationSetting::new(
                    org,
                    "billing",
                    key,
                    json!(10),
                    dial_core::ValueType::Number,
                    actor,
                ))
                .await
                .expect("create");
            service.get(&setting.scope()).await.expect("warm cache");
            ids.push(setting.id());
        }

        service.bulk_delete(&ids, actor).await.expect("bulk delete");
        assert_eq!(
            service
                .count(&ListFilters::new().organization(org))
                .await
                .expect("count"),
            0
        );
        let deleted = bus
            .published_types()
            .into_iter()
            .filter(|t| *t == EventType::OrganizationSettingDeleted)
            .count();
        assert_eq!(deleted, 2);
    }
}
