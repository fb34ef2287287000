use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{change, require_text, Aggregate, Outbox, Revision};
use crate::error::ValidationError;
use crate::event::{preference_data, DomainEvent, EventType};
use crate::identity::{AggregateType, OrganizationId, UserId, UserPreferenceId};
use crate::query::ListFilters;
use crate::scope::PreferenceScope;
use crate::value::ValueType;

/// Parameters for [`UserPreference::create`].
#[derive(Debug, Clone)]
pub struct NewUserPreference {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub category: String,
    pub key: String,
    pub value: Value,
    pub value_type: ValueType,
    pub is_default: bool,
}

impl NewUserPreference {
    pub fn new(
        user_id: UserId,
        category: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        value_type: ValueType,
    ) -> Self {
        Self {
            user_id,
            organization_id: None,
            category: category.into(),
            key: key.into(),
            value,
            value_type,
            is_default: false,
        }
    }

    pub fn in_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }
}

/// A per-user setting, optionally narrowed to one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    id: UserPreferenceId,
    scope: PreferenceScope,
    value: Value,
    value_type: ValueType,
    is_default: bool,
    #[serde(flatten)]
    revision: Revision,
    #[serde(skip)]
    outbox: Outbox,
}

impl UserPreference {
    /// The owning user is also the creating principal.
    pub fn create(params: NewUserPreference) -> Result<Self, ValidationError> {
        params.user_id.require("user_id")?;
        require_text("category", &params.category)?;
        require_text("key", &params.key)?;
        params.value_type.check(&params.value)?;

        let mut preference = Self {
            id: UserPreferenceId::now_v7(),
            scope: PreferenceScope {
                user_id: params.user_id,
                organization_id: params.organization_id,
                category: params.category,
                key: params.key,
            },
            value: params.value,
            value_type: params.value_type,
            is_default: params.is_default,
            revision: Revision::first(params.user_id)?,
            outbox: Outbox::default(),
        };

        let mut data = preference.event_data();
        data.insert("value".into(), preference.value.clone());
        preference.emit(EventType::UserPreferenceCreated, data);
        Ok(preference)
    }

    pub fn user_id(&self) -> UserId {
        self.scope.user_id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
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

    pub fn is_default(&self) -> bool {
        self.is_default
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

    pub fn mark_as_default(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        self.set_default(true, acting_user)
    }

    pub fn unmark_as_default(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        self.set_default(false, acting_user)
    }

    pub fn delete(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("deleted_by")?;
        self.revision.bump(acting_user);
        let data = self.event_data();
        self.emit(EventType::UserPreferenceDeleted, data);
        Ok(())
    }

    fn set_default(&mut self, is_default: bool, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if self.is_default == is_default {
            let reason = if is_default {
                "preference is already marked as default"
            } else {
                "preference is not marked as default"
            };
            return Err(ValidationError::constraint("is_default", reason));
        }

        self.is_default = is_default;
        self.revision.bump(acting_user);
        self.emit_update(
            "is_default",
            change(Value::from(!is_default), Value::from(is_default)),
        );
        Ok(())
    }

    fn event_data(&self) -> Map<String, Value> {
        let mut data = preference_data(&self.scope);
        data.insert("user_preference_id".into(), Value::from(self.id.to_string()));
        data.insert("type".into(), Value::from(self.value_type.as_str()));
        data.insert("is_default".into(), Value::from(self.is_default));
        data
    }

    fn emit_update(&mut self, field: &str, changes: Value) {
        let mut data = self.event_data();
        let mut changed = Map::new();
        changed.insert(field.to_string(), changes);
        data.insert("changes".into(), Value::Object(changed));
        self.emit(EventType::UserPreferenceUpdated, data);
    }

    fn emit(&mut self, event_type: EventType, data: Map<String, Value>) {
        self.outbox.record(
            event_type,
            AggregateType::UserPreference,
            self.id,
            &self.revision,
            data,
        );
    }
}

impl Aggregate for UserPreference {
    type Id = UserPreferenceId;
    type Scope = PreferenceScope;

    const AGGREGATE_TYPE: AggregateType = AggregateType::UserPreference;

    fn id(&self) -> UserPreferenceId {
        self.id
    }

    fn scope(&self) -> PreferenceScope {
        self.scope.clone()
    }

    fn revision(&self) -> &Revision {
        &self.revision
    }

    fn key(&self) -> &str {
        &self.scope.key
    }

    fn matches(&self, filters: &ListFilters) -> bool {
        filters.user_id.is_none_or(|user| user == self.scope.user_id)
            && filters
                .organization_id
                .is_none_or(|org| Some(org) == self.scope.organization_id)
            && filters
                .category
                .as_ref()
                .is_none_or(|cat| *cat == self.scope.category)
            && filters.environment.is_none()
            && filters.service.is_none()
            && filters.tags.is_empty()
            && filters.is_enabled.is_none()
    }

    fn pending_events(&self) -> &[DomainEvent] {
        self.outbox.as_slice()
    }

    fn take_events(&mut self) -> Vec<DomainEvent> {
        self.outbox.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn theme_preference(user: UserId) -> UserPreference {
        UserPreference::create(NewUserPreference::new(
            user,
            "ui",
            "theme",
            json!("dark"),
            ValueType::String,
        ))
        .expect("create should succeed")
    }

    #[test]
    fn test_create_requires_owner_category_and_key() {
        let nobody = UserId::from_uuid(Uuid::nil());
        let base = NewUserPreference::new(UserId::now_v7(), "ui", "theme", json!("x"), ValueType::String);

        assert!(UserPreference::create(NewUserPreference { user_id: nobody, ..base.clone() }).is_err());
        assert!(UserPreference::create(NewUserPreference { category: String::new(), ..base.clone() }).is_err());
        assert!(UserPreference::create(NewUserPreference { key: " ".into(), ..base.clone() }).is_err());
        assert!(UserPreference::create(base).is_ok());
    }

    #[test]
    fn test_create_event_carries_scope() {
        let user = UserId::now_v7();
        let org = OrganizationId::now_v7();
        let preference = UserPreference::create(
            NewUserPreference::new(user, "ui", "theme", json!("dark"), ValueType::String)
                .in_organization(org),
        )
        .expect("create should succeed");

        let events = preference.pending_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::UserPreferenceCreated);
        assert_eq!(events[0].preference_scope(), Some(preference.scope()));
        assert_eq!(events[0].data_str("organization_id"), Some(org.to_string().as_str()));
    }

    #[test]
    fn test_update_value_enforces_type() {
        let user = UserId::now_v7();
        let mut preference = theme_preference(user);

        let err = preference.update_value(json!(42), user).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
        assert_eq!(preference.value(), &json!("dark"));
        assert_eq!(preference.version(), 1);

        preference.update_value(json!("light"), user).expect("update");
        assert_eq!(preference.version(), 2);
        let event = preference.pending_events().last().expect("event");
        assert_eq!(event.data["changes"]["value"]["from"], json!("dark"));
        assert_eq!(event.data["changes"]["value"]["to"], json!("light"));
    }

    #[test]
    fn test_default_toggle_rejects_noop() {
        let user = UserId::now_v7();
        let mut preference = theme_preference(user);

        assert!(preference.unmark_as_default(user).is_err());
        preference.mark_as_default(user).expect("mark");
        assert!(preference.is_default());
        assert!(preference.mark_as_default(user).is_err());
        preference.unmark_as_default(user).expect("unmark");
        assert_eq!(preference.version(), 3);
    }

    #[test]
    fn test_delete_bumps_version() {
        let user = UserId::now_v7();
        let mut preference = theme_preference(user);
        preference.take_events();

        preference.delete(user).expect("delete");
        let events = preference.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::UserPreferenceDeleted);
        assert_eq!(events[0].version, 2);
    }

    #[test]
    fn test_filters_by_user() {
        let user = UserId::now_v7();
        let preference = theme_preference(user);
        assert!(preference.matches(&ListFilters::new().user(user)));
        assert!(!preference.matches(&ListFilters::new().user(UserId::now_v7())));
        assert!(preference.matches(&ListFilters::new().category("ui")));
        assert!(!preference.matches(&ListFilters::new().enabled(true)));
    }
}
