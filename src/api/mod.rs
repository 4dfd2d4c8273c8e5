//! HTTP surface.
//!
//! [`Stores`] picks the persistence backend from the DSN, [`Services`] builds
//! the resolver, the per-resource pipelines and the job queue on top of it and
//! [`app`] assembles the router with its middleware. [`new`] runs the server.

use crate::{
    auth::{AuthConfig, AuthResolver},
    cache::{Cache, MemoryCache},
    crud::CrudService,
    jobs::{JobQueue, LocalQueue, StatusBoard, Worker},
    resources::{
        ActionPermissions, Config, Dept, Environment, Resource, Role, Task, User,
        config::SystemConfigCache,
    },
    store::{ColumnReference, CreatorReference, MemoryStore, PgStore, Store, connect},
};
use anyhow::{Context, Result, anyhow, bail};
use axum::{
    Extension, Json, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, header},
    routing::{get, options},
};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;

pub mod bootstrap;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod openapi;

pub use openapi::openapi;

use handlers::{crud, health};

const REQUEST_ID: &str = "x-request-id";

/// Prefix and permissions of one resource's generic routes.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRoute {
    pub prefix: &'static str,
    pub kind: &'static str,
    pub tag: &'static str,
    pub permissions: ActionPermissions,
}

impl ResourceRoute {
    const fn of<R: Resource>(prefix: &'static str, tag: &'static str) -> Self {
        Self {
            prefix,
            kind: R::KIND,
            tag,
            permissions: R::PERMISSIONS,
        }
    }
}

const USERS: ResourceRoute = ResourceRoute::of::<User>("/api/v1/system/user", "system");
const ROLES: ResourceRoute = ResourceRoute::of::<Role>("/api/v1/system/role", "system");
const DEPTS: ResourceRoute = ResourceRoute::of::<Dept>("/api/v1/system/dept", "system");
const CONFIGS: ResourceRoute = ResourceRoute::of::<Config>("/api/v1/system/config", "system");
const ENVIRONMENTS: ResourceRoute =
    ResourceRoute::of::<Environment>("/api/v1/autotest/environment", "autotest");
const TASKS: ResourceRoute = ResourceRoute::of::<Task>("/api/v1/autotest/task", "autotest");

pub(crate) const RESOURCE_ROUTES: [ResourceRoute; 6] =
    [USERS, ROLES, DEPTS, CONFIGS, ENVIRONMENTS, TASKS];

/// One store per resource.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn Store<User>>,
    pub roles: Arc<dyn Store<Role>>,
    pub depts: Arc<dyn Store<Dept>>,
    pub configs: Arc<dyn Store<Config>>,
    pub environments: Arc<dyn Store<Environment>>,
    pub tasks: Arc<dyn Store<Task>>,
}

impl Stores {
    /// `memory://` for the in-process backend, `postgres://` otherwise.
    ///
    /// # Errors
    /// Returns an error for an unsupported scheme or an unreachable database.
    pub async fn connect(dsn: &str) -> Result<Self> {
        if dsn.starts_with("memory://") {
            return Ok(Self::memory().await);
        }
        if !(dsn.starts_with("postgres://") || dsn.starts_with("postgresql://")) {
            bail!("unsupported DSN scheme, expected postgres:// or memory://");
        }

        let pool = connect(dsn).await?;
        Ok(Self {
            users: Arc::new(PgStore::new(pool.clone())),
            roles: Arc::new(PgStore::new(pool.clone())),
            depts: Arc::new(PgStore::new(pool.clone())),
            configs: Arc::new(PgStore::new(pool.clone())),
            environments: Arc::new(PgStore::new(pool.clone())),
            tasks: Arc::new(PgStore::new(pool)),
        })
    }

    /// In-process stores wired with the same references the schema declares.
    pub async fn memory() -> Self {
        let users = Arc::new(MemoryStore::<User>::new());
        let tasks = Arc::new(MemoryStore::<Task>::new());
        let roles = Arc::new(MemoryStore::<Role>::new().with_reference(Arc::new(
            ColumnReference::new(users.clone(), "role_ids", "system_user_role_ids_fkey"),
        )));
        let depts = Arc::new(
            MemoryStore::<Dept>::new()
                .with_reference(Arc::new(ColumnReference::new(
                    users.clone(),
                    "dept_id",
                    "system_user_dept_id_fkey",
                )))
                .with_reference(Arc::new(ColumnReference::new(
                    roles.clone(),
                    "dept_ids",
                    "system_role_dept_ids_fkey",
                ))),
        );
        let configs = Arc::new(MemoryStore::<Config>::new());
        let environments = Arc::new(MemoryStore::<Environment>::new().with_reference(Arc::new(
            ColumnReference::new(tasks.clone(), "environment_id", "autotest_task_environment_id_fkey"),
        )));

        users.add_reference(Arc::new(CreatorReference::new(roles.clone()))).await;
        users.add_reference(Arc::new(CreatorReference::new(depts.clone()))).await;
        users.add_reference(Arc::new(CreatorReference::new(configs.clone()))).await;
        users
            .add_reference(Arc::new(CreatorReference::new(environments.clone())))
            .await;
        users.add_reference(Arc::new(CreatorReference::new(tasks.clone()))).await;

        Self {
            users,
            roles,
            depts,
            configs,
            environments,
            tasks,
        }
    }
}

/// Everything the handlers reach through request extensions.
#[derive(Clone)]
pub struct Services {
    pub resolver: Arc<AuthResolver>,
    pub users: CrudService<User>,
    pub roles: CrudService<Role>,
    pub depts: CrudService<Dept>,
    pub configs: CrudService<Config>,
    pub environments: CrudService<Environment>,
    pub tasks: CrudService<Task>,
    pub config_cache: Arc<SystemConfigCache>,
    pub jobs: Arc<dyn JobQueue>,
}

impl Services {
    /// Build the services and spawn the job worker on the current runtime.
    ///
    /// # Errors
    /// Returns an error if the worker cannot be built.
    pub fn start(stores: &Stores, cache: Arc<dyn Cache>, auth: AuthConfig) -> Result<Self> {
        let ttl = Duration::from_secs(u64::try_from(auth.access_token_ttl_seconds()).unwrap_or(1));
        let config_cache = Arc::new(SystemConfigCache::new(
            stores.configs.clone(),
            cache.clone(),
            ttl,
        ));

        let board = StatusBoard::new(cache.clone());
        let (queue, rx) = LocalQueue::new(board.clone());
        // Detached; it exits once every queue sender is dropped.
        let _worker =
            Worker::new(board, stores.tasks.clone(), stores.environments.clone())?.spawn(rx);

        let resolver = AuthResolver::new(
            auth,
            stores.users.clone(),
            stores.roles.clone(),
            stores.depts.clone(),
            cache,
        );

        Ok(Self {
            resolver: Arc::new(resolver),
            users: CrudService::new(stores.users.clone()),
            roles: CrudService::new(stores.roles.clone()),
            depts: CrudService::new(stores.depts.clone()),
            configs: CrudService::new(stores.configs.clone()).with_hook(config_cache.clone()),
            environments: CrudService::new(stores.environments.clone()),
            tasks: CrudService::new(stores.tasks.clone()),
            config_cache,
            jobs: Arc::new(queue),
        })
    }
}

fn resource_router() -> Router {
    let router = crud::routes::<User>(Router::new(), USERS.prefix);
    let router = crud::routes::<Role>(router, ROLES.prefix);
    let router = crud::routes::<Dept>(router, DEPTS.prefix);
    let router = crud::routes::<Config>(router, CONFIGS.prefix);
    let router = crud::routes::<Environment>(router, ENVIRONMENTS.prefix);
    crud::routes::<Task>(router, TASKS.prefix)
}

/// The complete application: routes, extensions and middleware.
///
/// # Errors
/// Returns an error if `cors_origin` is not a valid header value.
pub fn app(services: &Services, cors_origin: Option<&str>) -> Result<Router> {
    let allow_origin = match cors_origin {
        Some(origin) => AllowOrigin::exact(
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin: {origin}"))?,
        ),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_DISPOSITION, HeaderName::from_static(REQUEST_ID)])
        .allow_origin(allow_origin);

    let (router, mut document) = openapi::api_router().split_for_parts();
    openapi::document_resources(&mut document);

    let app = router
        .merge(resource_router())
        .route("/openapi.json", get(move || async move { Json(document) }))
        .route("/health", options(health::health))
        .fallback(error::route_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CatchPanicLayer::custom(error::panic_response))
                .layer(cors)
                .layer(Extension(services.resolver.clone()))
                .layer(Extension(services.users.clone()))
                .layer(Extension(services.roles.clone()))
                .layer(Extension(services.depts.clone()))
                .layer(Extension(services.configs.clone()))
                .layer(Extension(services.environments.clone()))
                .layer(Extension(services.tasks.clone()))
                .layer(Extension(services.config_cache.clone()))
                .layer(Extension(services.jobs.clone())),
        );

    Ok(app)
}

/// Server settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub auth: AuthConfig,
    pub cache_prefix: String,
    pub cors_origin: Option<String>,
    pub admin_password: Option<SecretString>,
}

/// Start the server.
///
/// # Errors
/// Returns an error if the store, seeding or the listener fails.
pub async fn new(config: ServerConfig) -> Result<()> {
    let stores = Stores::connect(&config.dsn).await?;
    bootstrap::seed(&stores, config.admin_password.as_ref()).await?;

    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(config.cache_prefix.clone()));
    let services = Services::start(&stores, cache, config.auth.clone())?;
    services
        .config_cache
        .refresh()
        .await
        .context("Failed to cache system config")?;

    let app = app(&services, config.cors_origin.as_deref())?;

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            info!("Gracefully shutdown");
        })
        .await
        .map_err(|err| anyhow!("server error: {err}"))?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = headers
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", method, path, request_id)
}
