use super::{ActionPermissions, AuditMeta, Resource};
use crate::{
    auth::Permission,
    error::Error,
    store::{FieldValue, Filter},
    validate::{Checks, FieldError, Validate},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use url::Url;

/// Target system an auto-test task runs against.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Environment {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub meta: AuditMeta,
    pub name: String,
    pub base_url: String,
    /// JSON object of variables substituted into test cases.
    pub variables: Value,
}

fn valid_base_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
    })
}

fn valid_variables(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_object)
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentCreate {
    pub name: String,
    pub base_url: String,
    pub variables: Option<Value>,
    pub description: Option<String>,
}

impl Validate for EnvironmentCreate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .length("name", &self.name, 1, 64)
            .check("base_url", valid_base_url(&self.base_url), "must be an http(s) URL")
            .check(
                "variables",
                valid_variables(self.variables.as_ref()),
                "must be a JSON object",
            )
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub variables: Option<Value>,
    pub description: Option<String>,
}

impl Validate for EnvironmentUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .optional_length("name", self.name.as_deref(), 1, 64)
            .check(
                "base_url",
                self.base_url.as_deref().map_or(true, valid_base_url),
                "must be an http(s) URL",
            )
            .check(
                "variables",
                valid_variables(self.variables.as_ref()),
                "must be a JSON object",
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentQuery {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub available: Option<bool>,
}

impl Resource for Environment {
    const KIND: &'static str = "environment";
    const LABEL: &'static str = "environments";
    const TABLE: &'static str = "autotest_environment";
    const PERMISSIONS: ActionPermissions = ActionPermissions {
        query: Permission::EnvironmentQuery,
        create: Permission::EnvironmentCreate,
        update: Permission::EnvironmentUpdate,
        delete: Permission::EnvironmentDelete,
        patch: Permission::EnvironmentPatch,
        export: Permission::EnvironmentExport,
    };
    const SORTABLE: &'static [&'static str] = &["id", "name", "created_at", "updated_at"];
    const EXPORT: &'static [(&'static str, &'static str)] = &[
        ("id", "ID"),
        ("name", "Name"),
        ("base_url", "Base URL"),
        ("variables", "Variables"),
        ("available", "Available"),
        ("description", "Description"),
        ("created_at", "Created at"),
    ];
    const UNIQUE: &'static [&'static str] = &["name"];

    type Create = EnvironmentCreate;
    type Update = EnvironmentUpdate;
    type Query = EnvironmentQuery;

    fn meta(&self) -> &AuditMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AuditMeta {
        &mut self.meta
    }

    fn create(payload: EnvironmentCreate, mut meta: AuditMeta) -> Result<Self, Error> {
        meta.description = payload.description;
        Ok(Self {
            meta,
            name: payload.name.trim().to_string(),
            base_url: payload.base_url.trim_end_matches('/').to_string(),
            variables: payload
                .variables
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        })
    }

    fn apply(&mut self, changes: EnvironmentUpdate) -> Result<(), Error> {
        if let Some(name) = changes.name {
            self.name = name.trim().to_string();
        }
        if let Some(base_url) = changes.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(variables) = changes.variables {
            self.variables = variables;
        }
        if changes.description.is_some() {
            self.meta.description = changes.description;
        }
        Ok(())
    }

    fn filter(query: &EnvironmentQuery) -> Filter {
        Filter::new()
            .contains("name", query.name.as_deref())
            .contains("base_url", query.base_url.as_deref())
            .equals("available", query.available)
    }

    fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "name" => FieldValue::from(self.name.as_str()),
            "base_url" => FieldValue::from(self.base_url.as_str()),
            "variables" => FieldValue::Json(Some(self.variables.clone())),
            _ => return None,
        })
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        ["name", "base_url", "variables"]
            .into_iter()
            .filter_map(|column| self.field(column).map(|value| (column, value)))
            .collect()
    }
}
