//! Bearer token to [`AuthContext`] resolution, plus the token lifecycle
//! (login, refresh rotation, logout).
//!
//! Cache entries used here:
//! - `token:refresh:<jti>` holds the access `jti` a refresh token was issued
//!   with, until the refresh token is used. Refresh `take`s it, so a refresh
//!   token works exactly once and only alongside its own access token.
//! - `token:session:<access jti>` points back at that refresh `jti`, so logout
//!   can drop the refresh token even when the client does not send it.
//! - `token:revoked:<jti>` marks a logged out or rotated access token until its
//!   natural expiry.

use super::{
    AuthConfig, AuthContext, AuthError, PermissionSet, Principal, TokenRef,
    captcha::CaptchaService,
    password::verify_password,
    token::{Claims, TokenIssuer, TokenKind, TokenPair},
};
use crate::{
    cache::{Cache, CacheKey},
    error::Error,
    resources::{DataScope, Dept, Role, User},
    store::{Filter, Query, Store, Visibility},
};
use chrono::Utc;
use serde::Deserialize;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub captcha_key: Option<String>,
    pub captcha: Option<String>,
}

pub struct AuthResolver {
    users: Arc<dyn Store<User>>,
    roles: Arc<dyn Store<Role>>,
    depts: Arc<dyn Store<Dept>>,
    cache: Arc<dyn Cache>,
    tokens: TokenIssuer,
    captcha: CaptchaService,
    config: AuthConfig,
}

impl AuthResolver {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn Store<User>>,
        roles: Arc<dyn Store<Role>>,
        depts: Arc<dyn Store<Dept>>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        let captcha = CaptchaService::new(
            cache.clone(),
            config.captcha_enabled(),
            Duration::from_secs(config.captcha_ttl_seconds()),
        );
        Self {
            users,
            roles,
            depts,
            cache,
            tokens: TokenIssuer::new(&config),
            captcha,
            config,
        }
    }

    #[must_use]
    pub fn captcha(&self) -> &CaptchaService {
        &self.captcha
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify credentials (and the captcha when enabled) and issue a token pair.
    ///
    /// # Errors
    /// `InvalidCaptcha`, `InvalidCredentials` or an internal error.
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenPair, Error> {
        if self.captcha.enabled() {
            let key = request.captcha_key.as_deref().unwrap_or_default();
            let answer = request.captcha.as_deref().unwrap_or_default();
            if !self.captcha.verify(key, answer).await? {
                return Err(AuthError::InvalidCaptcha.into());
            }
        }

        let query = Query::new(
            Filter::new().equals("username", Some(request.username.trim())),
            Visibility::All,
        );
        let user = self.users.fetch(&query).await?.into_iter().next();

        // Unknown, disabled and wrong-password users are indistinguishable.
        let Some(user) = user.filter(|user| {
            user.meta.available && verify_password(&request.password, &user.password_hash)
        }) else {
            warn!(username = %request.username, "login rejected");
            return Err(AuthError::InvalidCredentials.into());
        };

        let pair = self.issue(&user).await?;
        info!(target: "audit", user_id = user.meta.id, "login");
        Ok(pair)
    }

    /// Resolve an access token into a principal.
    ///
    /// # Errors
    /// `TokenExpired` after `exp`; `TokenInvalid` when malformed, revoked, or
    /// when the user no longer exists or is disabled.
    pub async fn authenticate(&self, token: &str) -> Result<(Principal, TokenRef), Error> {
        let claims = self.tokens.decode(token, TokenKind::Access)?;

        if self
            .cache
            .get(&CacheKey::RevokedToken(claims.jti.clone()))
            .await?
            .is_some()
        {
            debug!(jti = %claims.jti, "revoked token presented");
            return Err(AuthError::TokenInvalid.into());
        }

        let user = self
            .users
            .get(claims.user_id()?)
            .await?
            .filter(|user| user.meta.available)
            .ok_or(AuthError::TokenInvalid)?;

        let principal = Principal {
            user_id: user.meta.id,
            username: user.username,
            name: user.name,
            role_ids: user.role_ids,
            dept_id: user.dept_id,
        };
        let token = TokenRef {
            jti: claims.jti,
            expires_at: claims.exp,
        };
        Ok((principal, token))
    }

    /// Union of the permissions of the principal's available roles, and the
    /// rows their data scopes make visible. No roles means no permissions and
    /// only the principal's own rows.
    ///
    /// # Errors
    /// Internal error if a store fails.
    pub async fn resolve_permissions(
        &self,
        principal: &Principal,
    ) -> Result<(PermissionSet, Visibility), Error> {
        let mut permissions = PermissionSet::new();
        if principal.role_ids.is_empty() {
            return Ok((
                permissions,
                Visibility::Creators(BTreeSet::from([principal.user_id])),
            ));
        }

        let query = Query::new(
            Filter::new()
                .any_of("id", principal.role_ids.iter().copied())
                .equals("available", Some(true)),
            Visibility::All,
        );
        let roles = self.roles.fetch(&query).await?;

        for role in &roles {
            let unknown = permissions.grant_all(role.permissions.iter().map(String::as_str));
            if !unknown.is_empty() {
                debug!(role_id = role.meta.id, ?unknown, "ignoring unknown permissions");
            }
        }

        if roles.iter().any(|role| role.data_scope == DataScope::All) {
            return Ok((permissions, Visibility::All));
        }

        let mut depts = BTreeSet::new();
        for role in &roles {
            match role.data_scope {
                DataScope::Own | DataScope::All => {}
                DataScope::Dept => depts.extend(principal.dept_id),
                DataScope::DeptTree => {
                    if let Some(root) = principal.dept_id {
                        depts.extend(self.subtree(root).await?);
                    }
                }
                DataScope::Custom => depts.extend(role.dept_ids.iter().copied()),
            }
        }

        let mut creators = BTreeSet::from([principal.user_id]);
        if !depts.is_empty() {
            let query = Query::new(Filter::new().any_of("dept_id", depts), Visibility::All);
            creators.extend(
                self.users
                    .fetch(&query)
                    .await?
                    .iter()
                    .map(|user| user.meta.id),
            );
        }

        Ok((permissions, Visibility::Creators(creators)))
    }

    /// Full request context for a bearer token.
    ///
    /// # Errors
    /// See [`AuthResolver::authenticate`].
    pub async fn context(&self, token: &str) -> Result<AuthContext, Error> {
        let (principal, token) = self.authenticate(token).await?;
        let (permissions, visibility) = self.resolve_permissions(&principal).await?;
        Ok(AuthContext {
            principal,
            permissions,
            visibility,
            token,
        })
    }

    /// Rotate a refresh token. The presented refresh token is consumed and the
    /// access token of the current request is revoked.
    ///
    /// # Errors
    /// `InvalidRefresh` when the refresh token is expired, unknown, already
    /// used, or was not issued together with the request's access token.
    pub async fn refresh(&self, refresh_token: &str, context: &AuthContext) -> Result<TokenPair, Error> {
        let claims = self
            .tokens
            .decode(refresh_token, TokenKind::Refresh)
            .map_err(|_| AuthError::InvalidRefresh)?;
        if claims.user_id().ok() != Some(context.principal.user_id) {
            return Err(AuthError::InvalidRefresh.into());
        }

        let stored = self
            .cache
            .take(&CacheKey::RefreshToken(claims.jti.clone()))
            .await?;
        if stored.as_deref() != Some(context.token.jti.as_str()) {
            debug!(jti = %claims.jti, "refresh token replayed, unknown or from another session");
            return Err(AuthError::InvalidRefresh.into());
        }
        self.cache
            .delete(&CacheKey::SessionRefresh(context.token.jti.clone()))
            .await?;

        let user = self
            .users
            .get(context.principal.user_id)
            .await?
            .filter(|user| user.meta.available)
            .ok_or(AuthError::InvalidRefresh)?;

        let pair = self.issue(&user).await?;
        self.revoke(&context.token.jti, context.token.expires_at).await?;
        info!(target: "audit", user_id = user.meta.id, "token refreshed");
        Ok(pair)
    }

    /// Revoke an access token and the refresh token issued with it, plus
    /// `refresh_token` when given. Tokens that are already expired or revoked
    /// are accepted silently.
    ///
    /// # Errors
    /// `TokenInvalid` when the access token is not one of ours.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), Error> {
        let claims = self.tokens.inspect(access_token)?;
        self.revoke(&claims.jti, claims.exp).await?;

        if let Some(paired) = self
            .cache
            .take(&CacheKey::SessionRefresh(claims.jti.clone()))
            .await?
        {
            self.cache.delete(&CacheKey::RefreshToken(paired)).await?;
        }

        if let Some(claims) = refresh_token.and_then(|token| self.tokens.inspect(token).ok()) {
            if claims.kind == TokenKind::Refresh {
                self.cache
                    .delete(&CacheKey::RefreshToken(claims.jti))
                    .await?;
            }
        }

        info!(target: "audit", user_id = %claims.sub, "logout");
        Ok(())
    }

    async fn issue(&self, user: &User) -> Result<TokenPair, Error> {
        let issued = self.tokens.issue(user.meta.id, &user.username, Utc::now())?;
        let Claims { jti: refresh_jti, .. } = &issued.refresh;
        let Claims { jti: access_jti, .. } = &issued.access;
        let ttl = ttl_seconds(self.config.refresh_token_ttl_seconds());
        self.cache
            .set(
                &CacheKey::RefreshToken(refresh_jti.clone()),
                access_jti.clone(),
                ttl,
            )
            .await?;
        self.cache
            .set(
                &CacheKey::SessionRefresh(access_jti.clone()),
                refresh_jti.clone(),
                ttl,
            )
            .await?;
        Ok(issued.pair)
    }

    async fn revoke(&self, jti: &str, expires_at: i64) -> Result<(), Error> {
        let remaining = expires_at - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }
        self.cache
            .set(
                &CacheKey::RevokedToken(jti.to_string()),
                String::new(),
                ttl_seconds(remaining),
            )
            .await?;
        Ok(())
    }

    async fn subtree(&self, root: i64) -> Result<BTreeSet<i64>, Error> {
        let depts = self
            .depts
            .fetch(&Query::new(Filter::new(), Visibility::All))
            .await?;
        Ok(Dept::subtree(&depts, root))
    }
}

fn ttl_seconds(seconds: i64) -> Duration {
    Duration::from_secs(u64::try_from(seconds).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{Permission, password::hash_password},
        cache::MemoryCache,
        resources::AuditMeta,
        store::MemoryStore,
    };
    use secrecy::SecretString;

    struct Fixture {
        resolver: AuthResolver,
        users: Arc<MemoryStore<User>>,
        roles: Arc<MemoryStore<Role>>,
        depts: Arc<MemoryStore<Dept>>,
        cache: Arc<MemoryCache>,
    }

    fn fixture(config: AuthConfig) -> Fixture {
        let users = Arc::new(MemoryStore::<User>::new());
        let roles = Arc::new(MemoryStore::<Role>::new());
        let depts = Arc::new(MemoryStore::<Dept>::new());
        let cache = Arc::new(MemoryCache::new("test"));
        let resolver = AuthResolver::new(
            config,
            users.clone(),
            roles.clone(),
            depts.clone(),
            cache.clone(),
        );
        Fixture {
            resolver,
            users,
            roles,
            depts,
            cache,
        }
    }

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("resolver-test-secret"))
    }

    async fn role(store: &MemoryStore<Role>, code: &str, scope: DataScope, perms: &[&str]) -> Role {
        store
            .insert(Role {
                meta: AuditMeta::new(None, Utc::now()),
                name: code.to_string(),
                code: code.to_string(),
                sort: 1,
                data_scope: scope,
                permissions: perms.iter().map(ToString::to_string).collect(),
                dept_ids: Vec::new(),
            })
            .await
            .unwrap_or_else(|err| panic!("insert role: {err}"))
    }

    async fn user(store: &MemoryStore<User>, username: &str, roles: Vec<i64>, dept: Option<i64>) -> User {
        store
            .insert(User {
                meta: AuditMeta::new(None, Utc::now()),
                username: username.to_string(),
                name: username.to_string(),
                password_hash: hash_password("secret-pw")
                    .unwrap_or_else(|err| panic!("hash: {err}")),
                dept_id: dept,
                role_ids: roles,
                email: None,
            })
            .await
            .unwrap_or_else(|err| panic!("insert user: {err}"))
    }

    async fn dept(store: &MemoryStore<Dept>, name: &str, parent: Option<i64>) -> Dept {
        store
            .insert(Dept {
                meta: AuditMeta::new(None, Utc::now()),
                name: name.to_string(),
                parent_id: parent,
                sort: 1,
                leader: None,
            })
            .await
            .unwrap_or_else(|err| panic!("insert dept: {err}"))
    }

    fn login(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            captcha_key: None,
            captcha: None,
        }
    }

    fn auth_kind(result: Result<impl Sized, Error>) -> Option<AuthError> {
        match result {
            Err(Error::Auth(kind)) => Some(kind),
            _ => None,
        }
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials_uniformly() -> Result<(), Error> {
        let fx = fixture(config());
        let mut disabled = user(&fx.users, "carol", Vec::new(), None).await;
        disabled.meta.available = false;
        fx.users.update(disabled).await?;
        user(&fx.users, "alice", Vec::new(), None).await;

        for request in [
            login("alice", "wrong-pw"),
            login("nobody", "secret-pw"),
            login("carol", "secret-pw"),
        ] {
            assert_eq!(
                auth_kind(fx.resolver.login(&request).await),
                Some(AuthError::InvalidCredentials)
            );
        }

        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 1800);
        Ok(())
    }

    #[tokio::test]
    async fn login_requires_captcha_when_enabled() -> Result<(), Error> {
        let fx = fixture(config().with_captcha_enabled(true));
        user(&fx.users, "alice", Vec::new(), None).await;

        assert_eq!(
            auth_kind(fx.resolver.login(&login("alice", "secret-pw")).await),
            Some(AuthError::InvalidCaptcha)
        );

        let captcha = fx.resolver.captcha().issue().await?;
        let code = fx
            .resolver
            .captcha()
            .peek(&captcha.captcha_key)
            .await?
            .unwrap_or_default();
        let mut request = login("alice", "secret-pw");
        request.captcha_key = Some(captcha.captcha_key);
        request.captcha = Some(code.to_lowercase());
        assert!(fx.resolver.login(&request).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn permissions_are_the_union_of_available_roles() -> Result<(), Error> {
        let fx = fixture(config());
        let reader = role(&fx.roles, "reader", DataScope::Own, &["system:role:query"]).await;
        let editor = role(
            &fx.roles,
            "editor",
            DataScope::Own,
            &["system:role:update", "legacy:menu:view"],
        )
        .await;
        let mut retired = role(&fx.roles, "retired", DataScope::All, &["system:role:delete"]).await;
        retired.meta.available = false;
        fx.roles.update(retired.clone()).await?;

        let alice = user(
            &fx.users,
            "alice",
            vec![reader.meta.id, editor.meta.id, retired.meta.id],
            None,
        )
        .await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;
        let ctx = fx.resolver.context(&pair.access_token).await?;

        assert!(ctx.permissions.contains(Permission::RoleQuery));
        assert!(ctx.permissions.contains(Permission::RoleUpdate));
        assert!(!ctx.permissions.contains(Permission::RoleDelete));
        assert_eq!(ctx.permissions.len(), 2);
        assert_eq!(
            ctx.visibility,
            Visibility::Creators(BTreeSet::from([alice.meta.id]))
        );
        Ok(())
    }

    #[tokio::test]
    async fn role_changes_apply_to_the_next_request() -> Result<(), Error> {
        let fx = fixture(config());
        let mut reader = role(&fx.roles, "reader", DataScope::Own, &["system:role:query"]).await;
        user(&fx.users, "alice", vec![reader.meta.id], None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;

        reader.permissions = Vec::new();
        fx.roles.update(reader).await?;

        let ctx = fx.resolver.context(&pair.access_token).await?;
        assert!(ctx.permissions.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn principal_without_roles_is_denied_everything() -> Result<(), Error> {
        let fx = fixture(config());
        user(&fx.users, "alice", Vec::new(), None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;
        let ctx = fx.resolver.context(&pair.access_token).await?;

        for permission in Permission::ALL {
            assert!(ctx.authorize(*permission).is_err());
        }
        Ok(())
    }

    #[tokio::test]
    async fn data_scopes_resolve_to_creator_sets() -> Result<(), Error> {
        let fx = fixture(config());
        let hq = dept(&fx.depts, "HQ", None).await;
        let ops = dept(&fx.depts, "Ops", Some(hq.meta.id)).await;
        let sales = dept(&fx.depts, "Sales", None).await;

        let tree = role(&fx.roles, "tree", DataScope::DeptTree, &[]).await;
        let boss = user(&fx.users, "boss", vec![tree.meta.id], Some(hq.meta.id)).await;
        let worker = user(&fx.users, "worker", Vec::new(), Some(ops.meta.id)).await;
        let seller = user(&fx.users, "seller", Vec::new(), Some(sales.meta.id)).await;

        let principal = fx.resolver.authenticate(
            &fx.resolver.login(&login("boss", "secret-pw")).await?.access_token,
        )
        .await?
        .0;
        let (_, visibility) = fx.resolver.resolve_permissions(&principal).await?;
        assert_eq!(
            visibility,
            Visibility::Creators(BTreeSet::from([boss.meta.id, worker.meta.id]))
        );

        let mut custom = role(&fx.roles, "custom", DataScope::Custom, &[]).await;
        custom.dept_ids = vec![sales.meta.id];
        fx.roles.update(custom.clone()).await?;
        let mut principal = principal;
        principal.role_ids = vec![custom.meta.id];
        let (_, visibility) = fx.resolver.resolve_permissions(&principal).await?;
        assert_eq!(
            visibility,
            Visibility::Creators(BTreeSet::from([boss.meta.id, seller.meta.id]))
        );

        let all = role(&fx.roles, "all", DataScope::All, &[]).await;
        principal.role_ids.push(all.meta.id);
        let (_, visibility) = fx.resolver.resolve_permissions(&principal).await?;
        assert_eq!(visibility, Visibility::All);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_is_single_use() -> Result<(), Error> {
        let fx = fixture(config());
        user(&fx.users, "alice", Vec::new(), None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;
        let ctx = fx.resolver.context(&pair.access_token).await?;

        let rotated = fx.resolver.refresh(&pair.refresh_token, &ctx).await?;
        assert_ne!(rotated.refresh_token, pair.refresh_token);

        let ctx = fx.resolver.context(&rotated.access_token).await?;
        assert_eq!(
            auth_kind(fx.resolver.refresh(&pair.refresh_token, &ctx).await),
            Some(AuthError::InvalidRefresh)
        );
        assert_eq!(
            auth_kind(fx.resolver.refresh(&rotated.access_token, &ctx).await),
            Some(AuthError::InvalidRefresh)
        );
        Ok(())
    }

    #[tokio::test]
    async fn refresh_revokes_the_previous_access_token() -> Result<(), Error> {
        let fx = fixture(config());
        user(&fx.users, "alice", Vec::new(), None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;
        let ctx = fx.resolver.context(&pair.access_token).await?;

        fx.resolver.refresh(&pair.refresh_token, &ctx).await?;
        assert_eq!(
            auth_kind(fx.resolver.authenticate(&pair.access_token).await),
            Some(AuthError::TokenInvalid)
        );
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_and_is_idempotent() -> Result<(), Error> {
        let fx = fixture(config());
        user(&fx.users, "alice", Vec::new(), None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;

        fx.resolver
            .logout(&pair.access_token, Some(&pair.refresh_token))
            .await?;
        fx.resolver.logout(&pair.access_token, None).await?;

        assert_eq!(
            auth_kind(fx.resolver.authenticate(&pair.access_token).await),
            Some(AuthError::TokenInvalid)
        );
        assert!(fx
            .cache
            .keys()
            .await
            .iter()
            .all(|key| !key.contains("token:refresh") && !key.contains("token:session")));
        Ok(())
    }

    #[tokio::test]
    async fn logout_without_refresh_token_still_ends_the_session() -> Result<(), Error> {
        let fx = fixture(config());
        user(&fx.users, "alice", Vec::new(), None).await;
        let first = fx.resolver.login(&login("alice", "secret-pw")).await?;
        fx.resolver.logout(&first.access_token, None).await?;

        let second = fx.resolver.login(&login("alice", "secret-pw")).await?;
        let ctx = fx.resolver.context(&second.access_token).await?;
        assert_eq!(
            auth_kind(fx.resolver.refresh(&first.refresh_token, &ctx).await),
            Some(AuthError::InvalidRefresh)
        );
        assert!(fx.resolver.refresh(&second.refresh_token, &ctx).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_only_works_with_its_own_access_token() -> Result<(), Error> {
        let fx = fixture(config());
        user(&fx.users, "alice", Vec::new(), None).await;
        let laptop = fx.resolver.login(&login("alice", "secret-pw")).await?;
        let phone = fx.resolver.login(&login("alice", "secret-pw")).await?;

        let phone_ctx = fx.resolver.context(&phone.access_token).await?;
        assert_eq!(
            auth_kind(fx.resolver.refresh(&laptop.refresh_token, &phone_ctx).await),
            Some(AuthError::InvalidRefresh)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_are_distinguished_from_invalid_ones() -> Result<(), Error> {
        let fx = fixture(config().with_access_token_ttl_seconds(-10));
        user(&fx.users, "alice", Vec::new(), None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;

        assert_eq!(
            auth_kind(fx.resolver.authenticate(&pair.access_token).await),
            Some(AuthError::TokenExpired)
        );
        assert_eq!(
            auth_kind(fx.resolver.authenticate("not-a-token").await),
            Some(AuthError::TokenInvalid)
        );
        fx.resolver.logout(&pair.access_token, None).await?;
        Ok(())
    }

    #[tokio::test]
    async fn disabled_user_tokens_stop_working() -> Result<(), Error> {
        let fx = fixture(config());
        let mut alice = user(&fx.users, "alice", Vec::new(), None).await;
        let pair = fx.resolver.login(&login("alice", "secret-pw")).await?;

        alice.meta.available = false;
        fx.users.update(alice).await?;
        assert_eq!(
            auth_kind(fx.resolver.authenticate(&pair.access_token).await),
            Some(AuthError::TokenInvalid)
        );
        Ok(())
    }
}
