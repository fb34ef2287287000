use dial_core::{
    Configuration, ConfigurationId, DialResult, ListFilters, ListOptions, NewConfiguration,
    ScopeKey, UserId, ValidationRules,
};
use dial_storage::SettingStore;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::aggregate_handler::{AggregateHandler, ServiceContext};

/// Commands and queries for configurations.
#[derive(Clone)]
pub struct ConfigurationService {
    handler: AggregateHandler<Configuration>,
}

impl ConfigurationService {
    pub fn new(store: Arc<dyn SettingStore<Configuration>>, context: ServiceContext) -> Self {
        Self {
            handler: AggregateHandler::new(store, context),
        }
    }

    pub async fn create(&self, params: NewConfiguration) -> DialResult<Configuration> {
        match Configuration::create(params) {
            Ok(configuration) => self.handler.create(configuration).await,
            Err(e) => self.handler.rejected("create", e),
        }
    }

    pub async fn get(&self, scope: &ScopeKey) -> DialResult<Option<Configuration>> {
        self.handler.get(scope).await
    }

    pub async fn get_by_id(&self, id: ConfigurationId) -> DialResult<Configuration> {
        self.handler.get_by_id(id).await
    }

    pub async fn exists(&self, scope: &ScopeKey) -> DialResult<bool> {
        self.handler.exists(scope).await
    }

    pub async fn update_value(
        &self,
        id: ConfigurationId,
        value: Value,
        acting_user: UserId,
    ) -> DialResult<Configuration> {
        self.handler
            .mutate(id, "update_value", |c| c.update_value(value, acting_user))
            .await
    }

    pub async fn update_description(
        &self,
        id: ConfigurationId,
        description: String,
        acting_user: UserId,
    ) -> DialResult<Configuration> {
        self.handler
            .mutate(id, "update_description", |c| {
                c.update_description(description, acting_user)
            })
            .await
    }

    pub async fn update_validation_rules(
        &self,
        id: ConfigurationId,
        rules: ValidationRules,
        acting_user: UserId,
    ) -> DialResult<Configuration> {
        self.handler
            .mutate(id, "update_validation_rules", |c| {
                c.update_validation_rules(rules, acting_user)
            })
            .await
    }

    pub async fn update_tags(
        &self,
        id: ConfigurationId,
        tags: BTreeSet<String>,
        acting_user: UserId,
    ) -> DialResult<Configuration> {
        self.handler
            .mutate(id, "update_tags", |c| c.update_tags(tags, acting_user))
            .await
    }

    pub async fn mark_as_sensitive(
        &self,
        id: ConfigurationId,
        acting_user: UserId,
    ) -> DialResult<Configuration> {
        self.handler
            .mutate(id, "mark_as_sensitive", |c| c.mark_as_sensitive(acting_user))
            .await
    }

    pub async fn mark_as_encrypted(
        &self,
        id: ConfigurationId,
        acting_user: UserId,
    ) -> DialResult<Configuration> {
        self.handler
            .mutate(id, "mark_as_encrypted", |c| c.mark_as_encrypted(acting_user))
            .await
    }

    pub async fn delete(&self, id: ConfigurationId, acting_user: UserId) -> DialResult<()> {
        self.handler.remove(id, |c| c.delete(acting_user)).await
    }

    pub async fn bulk_delete(&self, ids: &[ConfigurationId], acting_user: UserId) -> DialResult<()> {
        self.handler
            .bulk_remove(ids, |c| c.delete(acting_user))
            .await
    }

    pub async fn list(&self, options: &ListOptions) -> DialResult<Vec<Configuration>> {
        self.handler.list(options).await
    }

    pub async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
        self.handler.count(filters).await
    }
}
