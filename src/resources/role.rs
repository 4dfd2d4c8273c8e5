use super::{ActionPermissions, AuditMeta, Resource, UnknownVariant};
use crate::{
    auth::Permission,
    error::Error,
    store::{FieldValue, Filter},
    validate::{Checks, FieldError, Validate},
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Rows a role's members may see, by creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataScope {
    /// Only rows the member created.
    #[serde(rename = "self")]
    Own,
    /// Rows created by users of the member's department.
    Dept,
    /// Same as `Dept`, including every descendant department.
    DeptTree,
    All,
    /// Rows created by users of the role's `dept_ids`.
    Custom,
}

impl DataScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Own => "self",
            Self::Dept => "dept",
            Self::DeptTree => "dept_tree",
            Self::All => "all",
            Self::Custom => "custom",
        }
    }
}

impl TryFrom<String> for DataScope {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "self" => Ok(Self::Own),
            "dept" => Ok(Self::Dept),
            "dept_tree" => Ok(Self::DeptTree),
            "all" => Ok(Self::All),
            "custom" => Ok(Self::Custom),
            _ => Err(UnknownVariant {
                kind: "data scope",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub meta: AuditMeta,
    pub name: String,
    pub code: String,
    pub sort: i64,
    #[sqlx(try_from = "String")]
    pub data_scope: DataScope,
    /// Permission strings; unknown entries are ignored when resolving.
    pub permissions: Vec<String>,
    /// Departments visible under `DataScope::Custom`.
    pub dept_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RoleCreate {
    pub name: String,
    pub code: String,
    pub sort: Option<i64>,
    pub data_scope: Option<DataScope>,
    pub description: Option<String>,
}

impl Validate for RoleCreate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .length("name", &self.name, 1, 50)
            .length("code", &self.code, 1, 50)
            .optional_length("description", self.description.as_deref(), 0, 255)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub sort: Option<i64>,
    pub description: Option<String>,
}

impl Validate for RoleUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .optional_length("name", self.name.as_deref(), 1, 50)
            .optional_length("code", self.code.as_deref(), 1, 50)
            .optional_length("description", self.description.as_deref(), 0, 255)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleQuery {
    pub name: Option<String>,
    pub code: Option<String>,
    pub available: Option<bool>,
}

/// Body of `PATCH /permission/setting`: replaces permissions and data scope
/// of every listed role.
#[derive(Debug, Deserialize)]
pub struct RolePermissionSetting {
    pub role_ids: Vec<i64>,
    pub permissions: Vec<String>,
    pub data_scope: DataScope,
    #[serde(default)]
    pub dept_ids: Vec<i64>,
}

impl Validate for RolePermissionSetting {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let unknown: Vec<&str> = self
            .permissions
            .iter()
            .map(String::as_str)
            .filter(|value| value.parse::<Permission>().is_err())
            .collect();

        Checks::new()
            .check("role_ids", !self.role_ids.is_empty(), "must not be empty")
            .check(
                "permissions",
                unknown.is_empty(),
                &format!("unknown permissions: {}", unknown.join(", ")),
            )
            .check(
                "dept_ids",
                self.data_scope != DataScope::Custom || !self.dept_ids.is_empty(),
                "required for custom data scope",
            )
            .finish()
    }
}

impl RolePermissionSetting {
    /// Apply the setting to one role.
    pub fn apply_to(&self, role: &mut Role) {
        let mut permissions = self.permissions.clone();
        permissions.sort();
        permissions.dedup();
        role.permissions = permissions;
        role.data_scope = self.data_scope;
        role.dept_ids = if self.data_scope == DataScope::Custom {
            self.dept_ids.clone()
        } else {
            Vec::new()
        };
    }
}

impl Resource for Role {
    const KIND: &'static str = "role";
    const LABEL: &'static str = "roles";
    const TABLE: &'static str = "system_role";
    const PERMISSIONS: ActionPermissions = ActionPermissions {
        query: Permission::RoleQuery,
        create: Permission::RoleCreate,
        update: Permission::RoleUpdate,
        delete: Permission::RoleDelete,
        patch: Permission::RolePatch,
        export: Permission::RoleExport,
    };
    const SORTABLE: &'static [&'static str] =
        &["id", "sort", "name", "code", "created_at", "updated_at"];
    const EXPORT: &'static [(&'static str, &'static str)] = &[
        ("id", "ID"),
        ("name", "Name"),
        ("code", "Code"),
        ("sort", "Sort"),
        ("data_scope", "Data scope"),
        ("available", "Available"),
        ("description", "Description"),
        ("created_at", "Created at"),
        ("updated_at", "Updated at"),
    ];
    const UNIQUE: &'static [&'static str] = &["name", "code"];

    type Create = RoleCreate;
    type Update = RoleUpdate;
    type Query = RoleQuery;

    fn meta(&self) -> &AuditMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AuditMeta {
        &mut self.meta
    }

    fn create(payload: RoleCreate, mut meta: AuditMeta) -> Result<Self, Error> {
        meta.description = payload.description;
        Ok(Self {
            meta,
            name: payload.name.trim().to_string(),
            code: payload.code.trim().to_string(),
            sort: payload.sort.unwrap_or(1),
            data_scope: payload.data_scope.unwrap_or(DataScope::Own),
            permissions: Vec::new(),
            dept_ids: Vec::new(),
        })
    }

    fn apply(&mut self, changes: RoleUpdate) -> Result<(), Error> {
        if let Some(name) = changes.name {
            self.name = name.trim().to_string();
        }
        if let Some(code) = changes.code {
            self.code = code.trim().to_string();
        }
        if let Some(sort) = changes.sort {
            self.sort = sort;
        }
        if changes.description.is_some() {
            self.meta.description = changes.description;
        }
        Ok(())
    }

    fn filter(query: &RoleQuery) -> Filter {
        Filter::new()
            .contains("name", query.name.as_deref())
            .contains("code", query.code.as_deref())
            .equals("available", query.available)
    }

    fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "name" => FieldValue::from(self.name.as_str()),
            "code" => FieldValue::from(self.code.as_str()),
            "sort" => FieldValue::from(self.sort),
            "data_scope" => FieldValue::from(self.data_scope.as_str()),
            "permissions" => FieldValue::TextList(self.permissions.clone()),
            "dept_ids" => FieldValue::IntList(self.dept_ids.clone()),
            _ => return None,
        })
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        ["name", "code", "sort", "data_scope", "permissions", "dept_ids"]
            .into_iter()
            .filter_map(|column| self.field(column).map(|value| (column, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn role() -> Role {
        Role::create(
            RoleCreate {
                name: " Auditor ".to_string(),
                code: "auditor".to_string(),
                sort: None,
                data_scope: None,
                description: None,
            },
            AuditMeta::new(Some(1), Utc::now()),
        )
        .unwrap_or_else(|err| panic!("role create failed: {err}"))
    }

    #[test]
    fn create_trims_and_defaults() {
        let role = role();
        assert_eq!(role.name, "Auditor");
        assert_eq!(role.data_scope, DataScope::Own);
        assert!(role.permissions.is_empty());
    }

    #[test]
    fn data_scope_round_trips_through_text() {
        for scope in [
            DataScope::Own,
            DataScope::Dept,
            DataScope::DeptTree,
            DataScope::All,
            DataScope::Custom,
        ] {
            assert_eq!(DataScope::try_from(scope.as_str().to_string()), Ok(scope));
        }
        assert!(DataScope::try_from("everyone".to_string()).is_err());
    }

    #[test]
    fn permission_setting_rejects_unknown_permissions() {
        let setting = RolePermissionSetting {
            role_ids: vec![2],
            permissions: vec!["system:role:query".to_string(), "menu:view".to_string()],
            data_scope: DataScope::Custom,
            dept_ids: Vec::new(),
        };
        let errors = setting.validate().err().unwrap_or_default();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["permissions", "dept_ids"]);
    }

    #[test]
    fn permission_setting_replaces_grants() {
        let mut role = role();
        role.dept_ids = vec![9];
        let setting = RolePermissionSetting {
            role_ids: vec![role.meta.id],
            permissions: vec![
                "system:role:query".to_string(),
                "system:role:query".to_string(),
            ],
            data_scope: DataScope::All,
            dept_ids: vec![3],
        };
        setting.apply_to(&mut role);

        assert_eq!(role.permissions, vec!["system:role:query".to_string()]);
        assert_eq!(role.data_scope, DataScope::All);
        assert!(role.dept_ids.is_empty());
    }

    #[test]
    fn data_scope_serializes_self() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&DataScope::Own)?, "\"self\"");
        assert_eq!(serde_json::to_string(&DataScope::DeptTree)?, "\"dept_tree\"");
        Ok(())
    }
}
