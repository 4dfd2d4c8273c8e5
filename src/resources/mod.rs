//! Resource entities served by the CRUD pipeline.
//!
//! Each entity carries an [`AuditMeta`] block (id, description, available
//! flag, creator and timestamps) and describes itself to the pipeline through
//! the [`Resource`] trait: table, permissions per action, filterable and
//! sortable columns, export layout and payload types.

use crate::{
    auth::Permission,
    error::Error,
    store::{FieldValue, Filter},
    validate::Validate,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlx::FromRow;
use std::fmt;
use thiserror::Error;

pub mod config;
pub mod dept;
pub mod environment;
pub mod role;
pub mod task;
pub mod user;

pub use config::Config;
pub use dept::Dept;
pub use environment::Environment;
pub use role::{DataScope, Role, RolePermissionSetting};
pub use task::{Task, TaskStatus};
pub use user::User;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditMeta {
    pub id: i64,
    pub description: Option<String>,
    pub available: bool,
    /// Cleared when the creating user is deleted.
    pub creator_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditMeta {
    /// Metadata for a row that has not been persisted yet (id 0).
    #[must_use]
    pub fn new(creator_id: Option<i64>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            description: None,
            available: true,
            creator_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`, never moving it before `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    #[must_use]
    pub fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "id" => FieldValue::Int(Some(self.id)),
            "description" => FieldValue::Text(self.description.clone()),
            "available" => FieldValue::Bool(self.available),
            "creator_id" => FieldValue::Int(self.creator_id),
            "created_at" => FieldValue::Timestamp(Some(self.created_at)),
            "updated_at" => FieldValue::Timestamp(Some(self.updated_at)),
            _ => return None,
        })
    }

    /// Persisted audit columns, `id` excluded.
    #[must_use]
    pub fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("description", FieldValue::Text(self.description.clone())),
            ("available", FieldValue::Bool(self.available)),
            ("creator_id", FieldValue::Int(self.creator_id)),
            ("created_at", FieldValue::Timestamp(Some(self.created_at))),
            ("updated_at", FieldValue::Timestamp(Some(self.updated_at))),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Query,
    Create,
    Update,
    Delete,
    Patch,
    Export,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The permission each generic action on a resource requires.
#[derive(Debug, Clone, Copy)]
pub struct ActionPermissions {
    pub query: Permission,
    pub create: Permission,
    pub update: Permission,
    pub delete: Permission,
    pub patch: Permission,
    pub export: Permission,
}

impl ActionPermissions {
    #[must_use]
    pub const fn of(&self, action: Action) -> Permission {
        match action {
            Action::Query => self.query,
            Action::Create => self.create,
            Action::Update => self.update,
            Action::Delete => self.delete,
            Action::Patch => self.patch,
            Action::Export => self.export,
        }
    }
}

pub trait Resource: Clone + fmt::Debug + Serialize + Send + Sync + Unpin + 'static {
    /// Singular name used in errors and audit events.
    const KIND: &'static str;
    /// Sheet and file name of exports.
    const LABEL: &'static str;
    const TABLE: &'static str;
    const PERMISSIONS: ActionPermissions;
    /// Columns accepted in `order_by`.
    const SORTABLE: &'static [&'static str];
    /// `(column, header)` pairs written by export, in order.
    const EXPORT: &'static [(&'static str, &'static str)];
    /// Columns whose values must be unique across rows.
    const UNIQUE: &'static [&'static str] = &[];
    /// Column pointing at a parent row of the same table.
    const SELF_REFERENCE: Option<&'static str> = None;
    /// Rows of this resource are the users every `creator_id` points at.
    const CREATORS: bool = false;

    type Create: DeserializeOwned + Validate + Send + Sync + 'static;
    type Update: DeserializeOwned + Validate + Send + Sync + 'static;
    type Query: DeserializeOwned + Default + Send + Sync + 'static;

    fn meta(&self) -> &AuditMeta;
    fn meta_mut(&mut self) -> &mut AuditMeta;

    /// Build an entity from a validated payload.
    ///
    /// # Errors
    /// Returns a domain or internal error the payload validation cannot catch.
    fn create(payload: Self::Create, meta: AuditMeta) -> Result<Self, Error>;

    /// Apply a partial update; absent fields are left untouched.
    ///
    /// # Errors
    /// Returns a domain or internal error when the change is not allowed.
    fn apply(&mut self, changes: Self::Update) -> Result<(), Error>;

    fn filter(query: &Self::Query) -> Filter;

    /// Value of a resource-specific column.
    fn field(&self, column: &str) -> Option<FieldValue>;

    /// Resource-specific persisted columns, in table order.
    fn columns(&self) -> Vec<(&'static str, FieldValue)>;

    /// # Errors
    /// Returns a domain error when this row must not be deleted.
    fn guard_delete(&self) -> Result<(), Error> {
        Ok(())
    }

    fn value(&self, column: &str) -> Option<FieldValue> {
        self.field(column).or_else(|| self.meta().field(column))
    }

    /// Every persisted column except `id`.
    fn row(&self) -> Vec<(&'static str, FieldValue)> {
        let mut row = self.columns();
        row.extend(self.meta().columns());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn touch_keeps_updated_after_created() {
        let now = Utc::now();
        let mut meta = AuditMeta::new(Some(1), now);

        meta.touch(now - Duration::minutes(5));
        assert_eq!(meta.updated_at, meta.created_at);

        meta.touch(now + Duration::minutes(5));
        assert!(meta.updated_at > meta.created_at);
    }

    #[test]
    fn audit_fields_are_addressable() {
        let meta = AuditMeta::new(None, Utc::now());
        assert_eq!(meta.field("creator_id"), Some(FieldValue::Int(None)));
        assert_eq!(meta.field("available"), Some(FieldValue::Bool(true)));
        assert_eq!(meta.field("name"), None);
        assert!(meta.columns().iter().all(|(column, _)| *column != "id"));
    }

    #[test]
    fn action_permissions_cover_every_action() {
        let permissions = Role::PERMISSIONS;
        assert_eq!(permissions.of(Action::Query), Permission::RoleQuery);
        assert_eq!(permissions.of(Action::Patch), Permission::RolePatch);
        assert_eq!(Action::Export.to_string(), "export");
    }
}
