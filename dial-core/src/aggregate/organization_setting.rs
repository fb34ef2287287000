use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{change, require_text, Aggregate, Outbox, Revision};
use crate::error::ValidationError;
use crate::event::{organization_setting_data, DomainEvent, EventType};
use crate::identity::{AggregateType, OrganizationId, OrganizationSettingId, UserId};
use crate::query::ListFilters;
use crate::scope::OrganizationSettingScope;
use crate::value::ValueType;

/// Parameters for [`OrganizationSetting::create`].
#[derive(Debug, Clone)]
pub struct NewOrganizationSetting {
    pub organization_id: OrganizationId,
    pub category: String,
    pub key: String,
    pub value: Value,
    pub value_type: ValueType,
    pub is_inherited: bool,
    pub parent_id: Option<OrganizationId>,
    pub created_by: UserId,
}

impl NewOrganizationSetting {
    pub fn new(
        organization_id: OrganizationId,
        category: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        value_type: ValueType,
        created_by: UserId,
    ) -> Self {
        Self {
            organization_id,
            category: category.into(),
            key: key.into(),
            value,
            value_type,
            is_inherited: false,
            parent_id: None,
            created_by,
        }
    }

    pub fn inherited_from(mut self, parent_id: OrganizationId) -> Self {
        self.is_inherited = true;
        self.parent_id = Some(parent_id);
        self
    }
}

/// An organization-wide setting, optionally inherited from a parent organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSetting {
    id: OrganizationSettingId,
    scope: OrganizationSettingScope,
    value: Value,
    value_type: ValueType,
    is_inherited: bool,
    parent_id: Option<OrganizationId>,
    #[serde(flatten)]
    revision: Revision,
    #[serde(skip)]
    outbox: Outbox,
}

fn check_parent(
    organization_id: OrganizationId,
    parent_id: OrganizationId,
) -> Result<(), ValidationError> {
    if parent_id.is_nil() {
        return Err(ValidationError::required("parent_id"));
    }
    if parent_id == organization_id {
        return Err(ValidationError::constraint(
            "parent_id",
            "an organization cannot inherit from itself",
        ));
    }
    Ok(())
}

impl OrganizationSetting {
    pub fn create(params: NewOrganizationSetting) -> Result<Self, ValidationError> {
        if params.organization_id.is_nil() {
            return Err(ValidationError::required("organization_id"));
        }
        require_text("category", &params.category)?;
        require_text("key", &params.key)?;
        let revision = Revision::first(params.created_by)?;
        params.value_type.check(&params.value)?;

        if params.is_inherited {
            let parent = params.parent_id.ok_or_else(|| ValidationError::required("parent_id"))?;
            check_parent(params.organization_id, parent)?;
        }

        let mut setting = Self {
            id: OrganizationSettingId::now_v7(),
            scope: OrganizationSettingScope {
                organization_id: params.organization_id,
                category: params.category,
                key: params.key,
            },
            value: params.value,
            value_type: params.value_type,
            is_inherited: params.is_inherited,
            parent_id: params.parent_id.filter(|_| params.is_inherited),
            revision,
            outbox: Outbox::default(),
        };

        let mut data = setting.event_data();
        data.insert("value".into(), setting.value.clone());
        setting.emit(EventType::OrganizationSettingCreated, data);
        Ok(setting)
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.scope.organization_id
    }

    pub fn category(&self) -> &str {
        &self.scope.category
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_inherited(&self) -> bool {
        self.is_inherited
    }

    pub fn parent_id(&self) -> Option<OrganizationId> {
        self.parent_id
    }

    pub fn update_value(&mut self, value: Value, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        self.value_type.check(&value)?;

        let previous = std::mem::replace(&mut self.value, value);
        self.revision.bump(acting_user);
        let changes = change(previous, self.value.clone());
        self.emit_update("value", changes);
        Ok(())
    }

    pub fn mark_as_inherited(
        &mut self,
        parent_id: OrganizationId,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        check_parent(self.scope.organization_id, parent_id)?;
        if self.is_inherited {
            return Err(ValidationError::constraint(
                "is_inherited",
                "setting is already marked as inherited",
            ));
        }

        self.is_inherited = true;
        self.parent_id = Some(parent_id);
        self.revision.bump(acting_user);
        self.emit_update(
            "parent_id",
            change(Value::Null, Value::from(parent_id.to_string())),
        );
        Ok(())
    }

    pub fn unmark_as_inherited(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if !self.is_inherited {
            return Err(ValidationError::constraint(
                "is_inherited",
                "setting is not marked as inherited",
            ));
        }

        let previous = self.parent_id.take();
        self.is_inherited = false;
        self.revision.bump(acting_user);
        self.emit_update(
            "parent_id",
            change(
                previous.map(|p| Value::from(p.to_string())).unwrap_or(Value::Null),
                Value::Null,
            ),
        );
        Ok(())
    }

    pub fn delete(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("deleted_by")?;
        self.revision.bump(acting_user);
        let data = self.event_data();
        self.emit(EventType::OrganizationSettingDeleted, data);
        Ok(())
    }

    fn event_data(&self) -> Map<String, Value> {
        let mut data = organization_setting_data(&self.scope);
        data.insert(
            "organization_setting_id".into(),
            Value::from(self.id.to_string()),
        );
        data.insert("type".into(), Value::from(self.value_type.as_str()));
        data.insert("is_inherited".into(), Value::from(self.is_inherited));
        data.insert(
            "parent_id".into(),
            self.parent_id
                .map(|p| Value::from(p.to_string()))
                .unwrap_or(Value::Null),
        );
        data
    }

    fn emit_update(&mut self, field: &str, changes: Value) {
        let mut data = self.event_data();
        let mut changed = Map::new();
        changed.insert(field.to_string(), changes);
        data.insert("changes".into(), Value::Object(changed));
        self.emit(EventType::OrganizationSettingUpdated, data);
    }

    fn emit(&mut self, event_type: EventType, data: Map<String, Value>) {
        self.outbox.record(
            event_type,
            AggregateType::OrganizationSetting,
            self.id,
            &self.revision,
            data,
        );
    }
}

impl Aggregate for OrganizationSetting {
    type Id = OrganizationSettingId;
    type Scope = OrganizationSettingScope;

    const AGGREGATE_TYPE: AggregateType = AggregateType::OrganizationSetting;

    fn id(&self) -> OrganizationSettingId {
        self.id
    }

    fn scope(&self) -> OrganizationSettingScope {
        self.scope.clone()
    }

    fn revision(&self) -> &Revision {
        &self.revision
    }

    fn key(&self) -> &str {
        &self.scope.key
    }

    fn matches(&self, filters: &ListFilters) -> bool {
        filters
            .organization_id
            .is_none_or(|org| org == self.scope.organization_id)
            && filters
                .category
                .as_ref()
                .is_none_or(|cat| *cat == self.scope.category)
            && filters.environment.is_none()
            && filters.service.is_none()
            && filters.tags.is_empty()
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
