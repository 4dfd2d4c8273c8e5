//! Permission registry.
//!
//! Every permission string the API checks is a variant of [`Permission`], so a
//! misspelled permission in a handler is a compile error rather than a route
//! that silently denies everyone. Roles persist permissions as their string
//! form (`system:role:update`); unknown strings are dropped on resolution.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeSet, fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown permission: {0}")]
pub struct UnknownPermission(pub String);

macro_rules! permissions {
    ($($variant:ident => $value:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Permission {
            $($variant),+
        }

        impl Permission {
            /// Every registered permission, in declaration order.
            pub const ALL: &'static [Permission] = &[$(Permission::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl FromStr for Permission {
            type Err = UnknownPermission;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(UnknownPermission(other.to_string())),
                }
            }
        }
    };
}

permissions! {
    UserQuery => "system:user:query",
    UserCreate => "system:user:create",
    UserUpdate => "system:user:update",
    UserDelete => "system:user:delete",
    UserPatch => "system:user:patch",
    UserExport => "system:user:export",

    RoleQuery => "system:role:query",
    RoleCreate => "system:role:create",
    RoleUpdate => "system:role:update",
    RoleDelete => "system:role:delete",
    RolePatch => "system:role:patch",
    RolePermission => "system:role:permission",
    RoleExport => "system:role:export",

    DeptQuery => "system:dept:query",
    DeptCreate => "system:dept:create",
    DeptUpdate => "system:dept:update",
    DeptDelete => "system:dept:delete",
    DeptPatch => "system:dept:patch",
    DeptExport => "system:dept:export",

    ConfigQuery => "system:config:query",
    ConfigCreate => "system:config:create",
    ConfigUpdate => "system:config:update",
    ConfigDelete => "system:config:delete",
    ConfigPatch => "system:config:patch",
    ConfigExport => "system:config:export",

    EnvironmentQuery => "autotest:environment:query",
    EnvironmentCreate => "autotest:environment:create",
    EnvironmentUpdate => "autotest:environment:update",
    EnvironmentDelete => "autotest:environment:delete",
    EnvironmentPatch => "autotest:environment:patch",
    EnvironmentExport => "autotest:environment:export",

    TaskQuery => "autotest:task:query",
    TaskCreate => "autotest:task:create",
    TaskUpdate => "autotest:task:update",
    TaskDelete => "autotest:task:delete",
    TaskPatch => "autotest:task:patch",
    TaskExport => "autotest:task:export",
    TaskRun => "autotest:task:run",

    JobSubmit => "system:job:submit",
    JobQuery => "system:job:query",
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Effective grants of a principal. Anything not in the set is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn grant(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    /// Adds every parseable permission string; returns the ones that were not recognised.
    pub fn grant_all<'a, I>(&mut self, values: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut unknown = Vec::new();
        for value in values {
            match value.parse::<Permission>() {
                Ok(permission) => self.grant(permission),
                Err(_) => unknown.push(value),
            }
        }
        unknown
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_every_permission() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>(), Ok(*permission));
        }
    }

    #[test]
    fn registry_strings_are_unique_and_namespaced() {
        let strings: BTreeSet<&str> = Permission::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(strings.len(), Permission::ALL.len());
        assert!(strings.iter().all(|s| s.split(':').count() == 3));
    }

    #[test]
    fn unknown_permission_is_rejected() {
        let err = "system:role:fly".parse::<Permission>().err();
        assert_eq!(err, Some(UnknownPermission("system:role:fly".to_string())));
    }

    #[test]
    fn empty_set_denies_everything() {
        let set = PermissionSet::new();
        assert!(Permission::ALL.iter().all(|p| !set.contains(*p)));
    }

    #[test]
    fn grant_all_reports_unknown_strings() {
        let mut set = PermissionSet::new();
        let unknown = set.grant_all(["system:role:query", "legacy:menu:view"]);
        assert!(set.contains(Permission::RoleQuery));
        assert_eq!(set.len(), 1);
        assert_eq!(unknown, vec!["legacy:menu:view"]);
    }

    #[test]
    fn permission_serializes_as_string() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&Permission::RoleUpdate)?;
        assert_eq!(json, "\"system:role:update\"");
        let back: Permission = serde_json::from_str(&json)?;
        assert_eq!(back, Permission::RoleUpdate);
        Ok(())
    }
}
