use dial_core::{
    DialResult, ListFilters, ListOptions, NewUserPreference, OrganizationId, PreferenceScope,
    UserId, UserPreference, UserPreferenceId,
};
use dial_storage::SettingStore;
use serde_json::Value;
use std::sync::Arc;

use super::aggregate_handler::{AggregateHandler, ServiceContext};

/// Commands and queries for user preferences.
#[derive(Clone)]
pub struct UserPreferenceService {
    handler: AggregateHandler<UserPreference>,
}

impl UserPreferenceService {
    pub fn new(store: Arc<dyn SettingStore<UserPreference>>, context: ServiceContext) -> Self {
        Self {
            handler: AggregateHandler::new(store, context),
        }
    }

    pub async fn create(&self, params: NewUserPreference) -> DialResult<UserPreference> {
        match UserPreference::create(params) {
            Ok(preference) => self.handler.create(preference).await,
            Err(e) => self.handler.rejected("create", e),
        }
    }

    pub async fn get(&self, scope: &PreferenceScope) -> DialResult<Option<UserPreference>> {
        self.handler.get(scope).await
    }

    pub async fn get_by_id(&self, id: UserPreferenceId) -> DialResult<UserPreference> {
        self.handler.get_by_id(id).await
    }

    /// Every preference of one user, from the store.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
        options: ListOptions,
    ) -> DialResult<Vec<UserPreference>> {
        let mut filters = options.filters.clone().user(user_id);
        if let Some(org) = organization_id {
            filters = filters.organization(org);
        }
        self.handler.list(&options.with_filters(filters)).await
    }

    pub async fn update_value(
        &self,
        id: UserPreferenceId,
        value: Value,
        acting_user: UserId,
    ) -> DialResult<UserPreference> {
        self.handler
            .mutate(id, "update_value", |p| p.update_value(value, acting_user))
            .await
    }

    pub async fn mark_as_default(
        &self,
        id: UserPreferenceId,
        acting_user: UserId,
    ) -> DialResult<UserPreference> {
        self.handler
            .mutate(id, "mark_as_default", |p| p.mark_as_default(acting_user))
            .await
    }

    pub async fn unmark_as_default(
        &self,
        id: UserPreferenceId,
        acting_user: UserId,
    ) -> DialResult<UserPreference> {
        self.handler
            .mutate(id, "unmark_as_default", |p| p.unmark_as_default(acting_user))
            .await
    }

    pub async fn delete(&self, id: UserPreferenceId, acting_user: UserId) -> DialResult<()> {
        self.handler.remove(id, |p| p.delete(acting_user)).await
    }

    pub async fn bulk_delete(&self, ids: &[UserPreferenceId], acting_user: UserId) -> DialResult<()> {
        self.handler
            .bulk_remove(ids, |p| p.delete(acting_user))
            .await
    }

    pub async fn list(&self, options: &ListOptions) -> DialResult<Vec<UserPreference>> {
        self.handler.list(options).await
    }

    pub async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
        self.handler.count(filters).await
    }
}
