//! List options and filters shared by every store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::identity::{OrganizationId, UserId};
use crate::scope::{Environment, ServiceName};

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Key,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters applied to `list` and `count`. Every set field must match.
///
/// `organization_id` and `service` filter on presence: `Some` selects rows
/// scoped to exactly that value. Rows at the global scope are never returned
/// by an organization or service filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilters {
    pub environment: Option<Environment>,
    pub organization_id: Option<OrganizationId>,
    pub service: Option<ServiceName>,
    pub category: Option<String>,
    /// Rows must carry every listed tag.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub user_id: Option<UserId>,
    pub is_enabled: Option<bool>,
}

impl ListFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn service(mut self, service: ServiceName) -> Self {
        self.service = Some(service);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = Some(is_enabled);
        self
    }
}

/// Page-based list request. Offset is `(page - 1) * limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub page: usize,
    pub limit: usize,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub filters: ListFilters,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
            filters: ListFilters::default(),
        }
    }
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: usize, limit: usize) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn with_sort(mut self, sort_by: SortField, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn with_filters(mut self, filters: ListFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page < 1 {
            return Err(ValidationError::invalid("page", "must be at least 1"));
        }
        if self.limit < 1 || self.limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::invalid(
                "limit",
                format!("must be between 1 and {MAX_PAGE_LIMIT}"),
            ));
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}
