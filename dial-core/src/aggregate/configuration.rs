use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::{change, require_text, Aggregate, Outbox, Revision};
use crate::error::ValidationError;
use crate::event::{scope_data, DomainEvent, EventType};
use crate::identity::{AggregateType, ConfigurationId, UserId};
use crate::query::ListFilters;
use crate::scope::ScopeKey;
use crate::value::{ValidationRules, ValueType};

const REDACTED: &str = "[REDACTED]";

/// Parameters for [`Configuration::create`].
#[derive(Debug, Clone)]
pub struct NewConfiguration {
    pub scope: ScopeKey,
    pub value: Value,
    pub value_type: ValueType,
    pub category: String,
    pub description: String,
    pub is_sensitive: bool,
    pub is_encrypted: bool,
    pub validation_rules: ValidationRules,
    pub default_value: Option<Value>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_by: UserId,
}

impl NewConfiguration {
    /// Minimal parameters; optional fields start empty.
    pub fn new(
        scope: ScopeKey,
        value: Value,
        value_type: ValueType,
        category: impl Into<String>,
        description: impl Into<String>,
        created_by: UserId,
    ) -> Self {
        Self {
            scope,
            value,
            value_type,
            category: category.into(),
            description: description.into(),
            is_sensitive: false,
            is_encrypted: false,
            validation_rules: ValidationRules::default(),
            default_value: None,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            created_by,
        }
    }
}

/// A typed configuration value addressed by a [`ScopeKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    id: ConfigurationId,
    scope: ScopeKey,
    value: Value,
    value_type: ValueType,
    category: String,
    description: String,
    is_sensitive: bool,
    is_encrypted: bool,
    validation_rules: ValidationRules,
    default_value: Option<Value>,
    tags: BTreeSet<String>,
    metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    revision: Revision,
    #[serde(skip)]
    outbox: Outbox,
}

impl Configuration {
    pub fn create(params: NewConfiguration) -> Result<Self, ValidationError> {
        require_text("category", &params.category)?;
        require_text("description", &params.description)?;
        let revision = Revision::first(params.created_by)?;

        if let Some(service) = params.scope.service() {
            let prefix = format!("{service}.");
            if !params.scope.key().starts_with(&prefix) {
                return Err(ValidationError::invalid(
                    "key",
                    format!("configuration key must start with {prefix:?}"),
                ));
            }
        }

        params.value_type.check(&params.value)?;
        params.validation_rules.validate(&params.value)?;
        if let Some(default_value) = &params.default_value {
            params.value_type.check(default_value)?;
        }

        let mut configuration = Self {
            id: ConfigurationId::now_v7(),
            scope: params.scope,
            value: params.value,
            value_type: params.value_type,
            category: params.category,
            description: params.description,
            is_sensitive: params.is_sensitive,
            is_encrypted: params.is_encrypted,
            validation_rules: params.validation_rules,
            default_value: params.default_value,
            tags: params.tags,
            metadata: params.metadata,
            revision,
            outbox: Outbox::default(),
        };

        let mut data = configuration.event_data();
        data.insert("value".into(), configuration.visible(&configuration.value));
        data.insert("description".into(), Value::from(configuration.description.as_str()));
        configuration.emit(EventType::ConfigurationCreated, data);
        Ok(configuration)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_sensitive(&self) -> bool {
        self.is_sensitive
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    pub fn validation_rules(&self) -> &ValidationRules {
        &self.validation_rules
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn update_value(&mut self, value: Value, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        self.value_type.check(&value)?;
        self.validation_rules.validate(&value)?;

        let previous = std::mem::replace(&mut self.value, value);
        self.revision.bump(acting_user);

        let changes = change(self.visible(&previous), self.visible(&self.value));
        self.emit_update("value", changes);
        Ok(())
    }

    pub fn update_description(
        &mut self,
        description: impl Into<String>,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let description = description.into();
        require_text("description", &description)?;

        let previous = std::mem::replace(&mut self.description, description);
        self.revision.bump(acting_user);

        let changes = change(Value::from(previous), Value::from(self.description.as_str()));
        self.emit_update("description", changes);
        Ok(())
    }

    /// Replace the validation rules. The current value must satisfy the new rules.
    pub fn update_validation_rules(
        &mut self,
        rules: ValidationRules,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        rules.validate(&self.value)?;

        let previous = std::mem::replace(&mut self.validation_rules, rules);
        self.revision.bump(acting_user);

        let changes = change(
            serde_json::to_value(&previous).unwrap_or(Value::Null),
            serde_json::to_value(&self.validation_rules).unwrap_or(Value::Null),
        );
        self.emit_update("validation_rules", changes);
        Ok(())
    }

    pub fn update_tags(
        &mut self,
        tags: BTreeSet<String>,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(ValidationError::invalid("tags", "tags must be non-empty"));
        }

        let previous = std::mem::replace(&mut self.tags, tags);
        self.revision.bump(acting_user);

        let changes = change(Value::from_iter(previous), Value::from_iter(self.tags.clone()));
        self.emit_update("tags", changes);
        Ok(())
    }

    pub fn mark_as_sensitive(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let previous = self.is_sensitive;
        self.is_sensitive = true;
        self.revision.bump(acting_user);
        self.emit_update("is_sensitive", change(Value::from(previous), Value::from(true)));
        Ok(())
    }

    pub fn mark_as_encrypted(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let previous = self.is_encrypted;
        self.is_encrypted = true;
        self.revision.bump(acting_user);
        self.emit_update("is_encrypted", change(Value::from(previous), Value::from(true)));
        Ok(())
    }

    /// Record deletion. The caller removes the stored row and drops this instance.
    pub fn delete(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("deleted_by")?;
        self.revision.bump(acting_user);
        let data = self.event_data();
        self.emit(EventType::ConfigurationDeleted, data);
        Ok(())
    }

    fn visible(&self, value: &Value) -> Value {
        if self.is_sensitive {
            Value::from(REDACTED)
        } else {
            value.clone()
        }
    }

    fn event_data(&self) -> Map<String, Value> {
        let mut data = scope_data(&self.scope);
        data.insert("configuration_id".into(), Value::from(self.id.to_string()));
        data.insert("type".into(), Value::from(self.value_type.as_str()));
        data.insert("category".into(), Value::from(self.category.as_str()));
        data.insert("is_sensitive".into(), Value::from(self.is_sensitive));
        data.insert("is_encrypted".into(), Value::from(self.is_encrypted));
        data
    }

    fn emit_update(&mut self, field: &str, changes: Value) {
        let mut data = self.event_data();
        let mut changed = Map::new();
        changed.insert(field.to_string(), changes);
        data.insert("changes".into(), Value::Object(changed));
        self.emit(EventType::ConfigurationUpdated, data);
    }

    fn emit(&mut self, event_type: EventType, data: Map<String, Value>) {
        self.outbox.record(
            event_type,
            AggregateType::Configuration,
            self.id,
            &self.revision,
            data,
        );
    }
}

impl Aggregate for Configuration {
    type Id = ConfigurationId;
    type Scope = ScopeKey;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Configuration;

    fn id(&self) -> ConfigurationId {
        self.id
    }

    fn scope(&self) -> ScopeKey {
        self.scope.clone()
    }

    fn revision(&self) -> &Revision {
        &self.revision
    }

    fn key(&self) -> &str {
        self.scope.key()
    }

    fn matches(&self, filters: &ListFilters) -> bool {
        filters
            .environment
            .is_none_or(|env| env == self.scope.environment())
            && filters
                .organization_id
                .is_none_or(|org| Some(org) == self.scope.organization_id())
            && filters
                .service
                .as_ref()
                .is_none_or(|svc| Some(svc) == self.scope.service())
            && filters
                .category
                .as_ref()
                .is_none_or(|cat| *cat == self.category)
            && filters.tags.is_subset(&self.tags)
            && filters.user_id.is_none()
            && filters.is_enabled.is_none()
    }

    fn pending_events(&self) -> &[DomainEvent] {
        self.outbox.as_slice()
    }

    fn take_events(&mut self) -> Vec<DomainEvent> {
        self.outbox.take()
    }
}
