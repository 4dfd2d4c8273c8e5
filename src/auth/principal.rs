//! Request-scoped identity.
//!
//! An [`AuthContext`] is built once per request from the bearer token. Routes
//! turn it into an [`Authorized`] grant for one exact permission; the CRUD
//! pipeline only accepts grants, so an operation cannot run without the
//! boundary check having happened first.

use super::{AuthError, Permission, PermissionSet};
use crate::store::Visibility;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub name: String,
    pub role_ids: Vec<i64>,
    pub dept_id: Option<i64>,
}

/// The access token a context was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRef {
    pub jti: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub permissions: PermissionSet,
    pub visibility: Visibility,
    pub token: TokenRef,
}

impl AuthContext {
    /// Grant `permission` or fail. Anything not in the permission set is denied.
    ///
    /// # Errors
    /// `InsufficientPermission` when the permission is not granted.
    pub fn authorize(&self, permission: Permission) -> Result<Authorized<'_>, AuthError> {
        if self.permissions.contains(permission) {
            Ok(Authorized {
                context: self,
                permission,
            })
        } else {
            debug!(
                user_id = self.principal.user_id,
                %permission,
                "permission denied"
            );
            Err(AuthError::InsufficientPermission(permission))
        }
    }
}

/// Proof that the caller holds `permission`.
#[derive(Debug, Clone, Copy)]
pub struct Authorized<'a> {
    context: &'a AuthContext,
    permission: Permission,
}

impl Authorized<'_> {
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.context.principal
    }

    #[must_use]
    pub fn user_id(&self) -> i64 {
        self.context.principal.user_id
    }

    #[must_use]
    pub fn visibility(&self) -> &Visibility {
        &self.context.visibility
    }

    #[must_use]
    pub fn permission(&self) -> Permission {
        self.permission
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(permissions: PermissionSet) -> AuthContext {
        AuthContext {
            principal: Principal {
                user_id: 5,
                username: "bob".to_string(),
                name: "Bob".to_string(),
                role_ids: vec![2],
                dept_id: None,
            },
            permissions,
            visibility: Visibility::All,
            token: TokenRef {
                jti: "jti".to_string(),
                expires_at: 0,
            },
        }
    }

    #[test]
    fn authorize_requires_exact_permission() {
        let ctx = context(PermissionSet::from_iter([Permission::RoleQuery]));

        let grant = ctx.authorize(Permission::RoleQuery);
        assert!(grant.is_ok_and(|g| g.permission() == Permission::RoleQuery && g.user_id() == 5));

        assert_eq!(
            ctx.authorize(Permission::RoleUpdate).err(),
            Some(AuthError::InsufficientPermission(Permission::RoleUpdate))
        );
    }

    #[test]
    fn empty_permission_set_denies_reads() {
        let ctx = context(PermissionSet::new());
        for permission in Permission::ALL {
            assert!(ctx.authorize(*permission).is_err());
        }
    }
}
