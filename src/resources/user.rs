use super::{ActionPermissions, AuditMeta, Resource};
use crate::{
    auth::{Permission, password::hash_password},
    error::Error,
    store::{FieldValue, Filter},
    validate::{Checks, FieldError, Validate},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub meta: AuditMeta,
    pub username: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub dept_id: Option<i64>,
    pub role_ids: Vec<i64>,
    pub email: Option<String>,
}

fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{2,31}$").is_ok_and(|re| re.is_match(username))
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub name: String,
    pub password: String,
    pub dept_id: Option<i64>,
    #[serde(default)]
    pub role_ids: Vec<i64>,
    pub email: Option<String>,
    pub description: Option<String>,
}

impl Validate for UserCreate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .check(
                "username",
                valid_username(&self.username),
                "3-32 letters, digits, '_', '.' or '-', starting with a letter",
            )
            .length("name", &self.name, 1, 50)
            .length("password", &self.password, 6, 64)
            .check(
                "email",
                self.email.as_deref().map_or(true, valid_email),
                "invalid email address",
            )
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub password: Option<String>,
    pub dept_id: Option<i64>,
    pub role_ids: Option<Vec<i64>>,
    pub email: Option<String>,
    pub description: Option<String>,
}

impl Validate for UserUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .optional_length("name", self.name.as_deref(), 1, 50)
            .optional_length("password", self.password.as_deref(), 6, 64)
            .check(
                "email",
                self.email.as_deref().map_or(true, valid_email),
                "invalid email address",
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub username: Option<String>,
    pub name: Option<String>,
    pub dept_id: Option<i64>,
    pub available: Option<bool>,
}

impl Resource for User {
    const KIND: &'static str = "user";
    const LABEL: &'static str = "users";
    const TABLE: &'static str = "system_user";
    const PERMISSIONS: ActionPermissions = ActionPermissions {
        query: Permission::UserQuery,
        create: Permission::UserCreate,
        update: Permission::UserUpdate,
        delete: Permission::UserDelete,
        patch: Permission::UserPatch,
        export: Permission::UserExport,
    };
    const SORTABLE: &'static [&'static str] = &["id", "username", "name", "created_at"];
    const EXPORT: &'static [(&'static str, &'static str)] = &[
        ("id", "ID"),
        ("username", "Username"),
        ("name", "Name"),
        ("dept_id", "Department"),
        ("role_ids", "Roles"),
        ("email", "Email"),
        ("available", "Available"),
        ("created_at", "Created at"),
    ];
    const UNIQUE: &'static [&'static str] = &["username"];
    const CREATORS: bool = true;

    type Create = UserCreate;
    type Update = UserUpdate;
    type Query = UserQuery;

    fn meta(&self) -> &AuditMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AuditMeta {
        &mut self.meta
    }

    fn create(payload: UserCreate, mut meta: AuditMeta) -> Result<Self, Error> {
        meta.description = payload.description;
        Ok(Self {
            meta,
            password_hash: hash_password(&payload.password)?,
            username: payload.username,
            name: payload.name.trim().to_string(),
            dept_id: payload.dept_id,
            role_ids: payload.role_ids,
            email: payload.email,
        })
    }

    fn apply(&mut self, changes: UserUpdate) -> Result<(), Error> {
        if let Some(password) = changes.password {
            self.password_hash = hash_password(&password)?;
        }
        if let Some(name) = changes.name {
            self.name = name.trim().to_string();
        }
        if changes.dept_id.is_some() {
            self.dept_id = changes.dept_id;
        }
        if let Some(role_ids) = changes.role_ids {
            self.role_ids = role_ids;
        }
        if changes.email.is_some() {
            self.email = changes.email;
        }
        if changes.description.is_some() {
            self.meta.description = changes.description;
        }
        Ok(())
    }

    fn filter(query: &UserQuery) -> Filter {
        Filter::new()
            .contains("username", query.username.as_deref())
            .contains("name", query.name.as_deref())
            .equals("dept_id", query.dept_id)
            .equals("available", query.available)
    }

    fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "username" => FieldValue::from(self.username.as_str()),
            "name" => FieldValue::from(self.name.as_str()),
            "password_hash" => FieldValue::from(self.password_hash.as_str()),
            "dept_id" => FieldValue::Int(self.dept_id),
            "role_ids" => FieldValue::IntList(self.role_ids.clone()),
            "email" => FieldValue::Text(self.email.clone()),
            _ => return None,
        })
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        [
            "username",
            "name",
            "password_hash",
            "dept_id",
            "role_ids",
            "email",
        ]
        .into_iter()
        .filter_map(|column| self.field(column).map(|value| (column, value)))
        .collect()
    }
}
