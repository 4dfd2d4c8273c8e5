//! System configuration entries and their cached snapshot.
//!
//! The snapshot (available `config_key -> config_value` pairs) lives in the
//! cache under `system_config:init_system_config` with the access token
//! lifetime as TTL. It is written at startup and after every successful
//! config write, and rebuilt on demand when it has expired.

use super::{ActionPermissions, AuditMeta, Resource};
use crate::{
    auth::Permission,
    cache::{Cache, CacheKey, get_json, set_json},
    crud::WriteHook,
    error::Error,
    store::{FieldValue, Filter, Query, Store, Visibility},
    validate::{Checks, FieldError, Validate},
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Config {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub meta: AuditMeta,
    pub config_name: String,
    pub config_key: String,
    pub config_value: Option<String>,
    /// Seeded entries the application depends on; they cannot be deleted.
    pub built_in: bool,
}

impl Config {
    /// A built-in entry, as seeded at bootstrap.
    #[must_use]
    pub fn built_in(name: &str, key: &str, value: &str, meta: AuditMeta) -> Self {
        Self {
            meta,
            config_name: name.to_string(),
            config_key: key.to_string(),
            config_value: Some(value.to_string()),
            built_in: true,
        }
    }
}

fn valid_key(key: &str) -> bool {
    regex::Regex::new(r"^[a-z][a-z0-9_.]*$").is_ok_and(|re| re.is_match(key))
}

#[derive(Debug, Deserialize)]
pub struct ConfigCreate {
    pub config_name: String,
    pub config_key: String,
    pub config_value: Option<String>,
    pub description: Option<String>,
}

impl Validate for ConfigCreate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .length("config_name", &self.config_name, 1, 100)
            .check(
                "config_key",
                valid_key(&self.config_key) && self.config_key.len() <= 100,
                "lowercase letters, digits, '_' or '.', starting with a letter",
            )
            .optional_length("config_value", self.config_value.as_deref(), 0, 2000)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub config_name: Option<String>,
    pub config_value: Option<String>,
    pub description: Option<String>,
}

impl Validate for ConfigUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .optional_length("config_name", self.config_name.as_deref(), 1, 100)
            .optional_length("config_value", self.config_value.as_deref(), 0, 2000)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigQuery {
    pub config_name: Option<String>,
    pub config_key: Option<String>,
    pub built_in: Option<bool>,
}

impl Resource for Config {
    const KIND: &'static str = "config";
    const LABEL: &'static str = "configs";
    const TABLE: &'static str = "system_config";
    const PERMISSIONS: ActionPermissions = ActionPermissions {
        query: Permission::ConfigQuery,
        create: Permission::ConfigCreate,
        update: Permission::ConfigUpdate,
        delete: Permission::ConfigDelete,
        patch: Permission::ConfigPatch,
        export: Permission::ConfigExport,
    };
    const SORTABLE: &'static [&'static str] = &["id", "config_key", "created_at"];
    const EXPORT: &'static [(&'static str, &'static str)] = &[
        ("id", "ID"),
        ("config_name", "Name"),
        ("config_key", "Key"),
        ("config_value", "Value"),
        ("built_in", "Built-in"),
        ("available", "Available"),
        ("description", "Description"),
    ];
    const UNIQUE: &'static [&'static str] = &["config_key"];

    type Create = ConfigCreate;
    type Update = ConfigUpdate;
    type Query = ConfigQuery;

    fn meta(&self) -> &AuditMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AuditMeta {
        &mut self.meta
    }

    fn create(payload: ConfigCreate, mut meta: AuditMeta) -> Result<Self, Error> {
        meta.description = payload.description;
        Ok(Self {
            meta,
            config_name: payload.config_name.trim().to_string(),
            config_key: payload.config_key,
            config_value: payload.config_value,
            built_in: false,
        })
    }

    fn apply(&mut self, changes: ConfigUpdate) -> Result<(), Error> {
        if let Some(name) = changes.config_name {
            self.config_name = name.trim().to_string();
        }
        if changes.config_value.is_some() {
            self.config_value = changes.config_value;
        }
        if changes.description.is_some() {
            self.meta.description = changes.description;
        }
        Ok(())
    }

    fn filter(query: &ConfigQuery) -> Filter {
        Filter::new()
            .contains("config_name", query.config_name.as_deref())
            .contains("config_key", query.config_key.as_deref())
            .equals("built_in", query.built_in)
    }

    fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "config_name" => FieldValue::from(self.config_name.as_str()),
            "config_key" => FieldValue::from(self.config_key.as_str()),
            "config_value" => FieldValue::Text(self.config_value.clone()),
            "built_in" => FieldValue::Bool(self.built_in),
            _ => return None,
        })
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        ["config_name", "config_key", "config_value", "built_in"]
            .into_iter()
            .filter_map(|column| self.field(column).map(|value| (column, value)))
            .collect()
    }

    fn guard_delete(&self) -> Result<(), Error> {
        if self.built_in {
            Err(Error::domain(format!(
                "built-in configuration '{}' cannot be deleted",
                self.config_key
            )))
        } else {
            Ok(())
        }
    }
}

pub type ConfigSnapshot = BTreeMap<String, String>;

/// Keeps the cached config snapshot in step with the config table.
pub struct SystemConfigCache {
    store: Arc<dyn Store<Config>>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl SystemConfigCache {
    #[must_use]
    pub fn new(store: Arc<dyn Store<Config>>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Rebuild the snapshot from the store and cache it.
    ///
    /// # Errors
    /// Returns an error if the store or cache fails.
    pub async fn refresh(&self) -> Result<ConfigSnapshot> {
        let query = Query::new(
            Filter::new().equals("available", Some(true)),
            Visibility::All,
        );
        let snapshot: ConfigSnapshot = self
            .store
            .fetch(&query)
            .await?
            .into_iter()
            .map(|config| {
                (
                    config.config_key,
                    config.config_value.unwrap_or_default(),
                )
            })
            .collect();

        set_json(self.cache.as_ref(), &CacheKey::SystemConfig, &snapshot, self.ttl).await?;
        info!(entries = snapshot.len(), "system config cached");
        Ok(snapshot)
    }

    /// Cached snapshot, rebuilt when missing.
    ///
    /// # Errors
    /// Returns an error if the store or cache fails.
    pub async fn load(&self) -> Result<ConfigSnapshot> {
        if let Some(snapshot) = get_json(self.cache.as_ref(), &CacheKey::SystemConfig).await? {
            return Ok(snapshot);
        }
        debug!("system config cache miss");
        self.refresh().await
    }
}

#[async_trait]
impl WriteHook<Config> for SystemConfigCache {
    async fn after_write(&self) -> Result<()> {
        self.refresh().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryCache, store::MemoryStore};
    use chrono::Utc;

    fn payload(key: &str) -> ConfigCreate {
        ConfigCreate {
            config_name: "Site name".to_string(),
            config_key: key.to_string(),
            config_value: Some("Adminkit".to_string()),
            description: None,
        }
    }

    #[test]
    fn key_format_is_enforced() {
        assert!(payload("site.name").validate().is_ok());
        assert!(payload("Site Name").validate().is_err());
        assert!(payload("").validate().is_err());
    }

    #[test]
    fn built_in_entries_cannot_be_deleted() {
        let meta = AuditMeta::new(None, Utc::now());
        let built_in = Config::built_in("Site name", "site.name", "Adminkit", meta.clone());
        assert!(matches!(built_in.guard_delete(), Err(Error::Domain { .. })));

        let custom = Config::create(payload("custom.key"), meta)
            .unwrap_or_else(|err| panic!("config create failed: {err}"));
        assert!(custom.guard_delete().is_ok());
    }

    #[tokio::test]
    async fn snapshot_skips_disabled_entries_and_refills_on_miss() -> Result<()> {
        let store = Arc::new(MemoryStore::<Config>::new());
        let cache = Arc::new(MemoryCache::new("test"));
        let now = Utc::now();

        store
            .insert(Config::built_in("Site", "site.name", "Adminkit", AuditMeta::new(None, now)))
            .await?;
        let mut disabled = Config::built_in("Theme", "site.theme", "dark", AuditMeta::new(None, now));
        disabled.meta.available = false;
        store.insert(disabled).await?;

        let configs = SystemConfigCache::new(store, cache.clone(), Duration::from_secs(60));
        let snapshot = configs.load().await?;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("site.name").map(String::as_str), Some("Adminkit"));
        assert_eq!(
            cache.keys().await,
            vec!["test:system_config:init_system_config".to_string()]
        );

        cache.delete(&CacheKey::SystemConfig).await?;
        assert_eq!(configs.load().await?, snapshot);
        Ok(())
    }
}
