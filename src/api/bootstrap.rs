//! First-run seeding.
//!
//! Built-in configuration entries are inserted when their key is missing. The
//! first administrator (department, role with every permission and `all` data
//! scope, user `admin`) is created only while the user table is empty and an
//! admin password was configured.

use super::Stores;
use crate::{
    auth::Permission,
    resources::{
        AuditMeta, Config, DataScope, Dept, Resource, Role, User,
        dept::DeptCreate,
        role::RoleCreate,
        user::UserCreate,
    },
    store::{Filter, Query, Visibility},
    validate::Validate,
};
use anyhow::{Result, anyhow};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

pub const ADMIN_USERNAME: &str = "admin";

/// `(name, key, value)` of the entries the application relies on.
pub const BUILT_IN_CONFIGS: &[(&str, &str, &str)] = &[
    ("Site name", "site.name", "Adminkit"),
    ("Login notice", "login.notice", ""),
    ("Default page size", "list.page_size", "10"),
];

/// # Errors
/// Returns an error if the store fails or the admin password is rejected.
pub async fn seed(stores: &Stores, admin_password: Option<&SecretString>) -> Result<()> {
    seed_configs(stores).await?;

    let users = stores
        .users
        .count(&Query::new(Filter::new(), Visibility::All))
        .await?;
    if users > 0 {
        return Ok(());
    }

    match admin_password {
        Some(password) => seed_admin(stores, password).await,
        None => {
            warn!("No users exist and no admin password is configured; nobody can log in");
            Ok(())
        }
    }
}

async fn seed_configs(stores: &Stores) -> Result<()> {
    let now = Utc::now();
    for (name, key, value) in BUILT_IN_CONFIGS {
        let query = Query::new(Filter::new().equals("config_key", Some(*key)), Visibility::All);
        if stores.configs.count(&query).await? > 0 {
            continue;
        }
        stores
            .configs
            .insert(Config::built_in(name, key, value, AuditMeta::new(None, now)))
            .await?;
        info!(key, "built-in config seeded");
    }
    Ok(())
}

async fn seed_admin(stores: &Stores, password: &SecretString) -> Result<()> {
    let now = Utc::now();

    let mut payload = UserCreate {
        username: ADMIN_USERNAME.to_string(),
        name: "Administrator".to_string(),
        password: password.expose_secret().to_string(),
        dept_id: None,
        role_ids: Vec::new(),
        email: None,
        description: None,
    };
    payload
        .validate()
        .map_err(|errors| anyhow!("admin password rejected: {}", describe(&errors)))?;

    let dept = Dept::create(
        DeptCreate {
            name: "Headquarters".to_string(),
            parent_id: None,
            sort: Some(0),
            leader: None,
            description: Some("Created at first start".to_string()),
        },
        AuditMeta::new(None, now),
    )?;
    let dept = stores.depts.insert(dept).await?;

    let mut role = Role::create(
        RoleCreate {
            name: "Administrator".to_string(),
            code: "admin".to_string(),
            sort: Some(0),
            data_scope: Some(DataScope::All),
            description: Some("Every permission, every row".to_string()),
        },
        AuditMeta::new(None, now),
    )?;
    role.permissions = Permission::ALL
        .iter()
        .map(|permission| permission.as_str().to_string())
        .collect();
    let role = stores.roles.insert(role).await?;

    payload.dept_id = Some(dept.meta.id);
    payload.role_ids = vec![role.meta.id];
    let user = stores
        .users
        .insert(User::create(payload, AuditMeta::new(None, now))?)
        .await?;

    info!(user_id = user.meta.id, role_id = role.meta.id, "administrator seeded");
    Ok(())
}

fn describe(errors: &[crate::validate::FieldError]) -> String {
    errors
        .iter()
        .map(|error| error.reason.clone())
        .collect::<Vec<_>>()
        .join("; ")
}
