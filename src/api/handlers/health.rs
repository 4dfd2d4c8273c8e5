//! Health check.

use crate::{GIT_COMMIT_HASH, crud::CrudService, resources::User};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, timeout};
use tracing::{Instrument, debug, error, info_span, warn};
use utoipa::ToSchema;

const HEALTH_STORE_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Store is reachable", body = Health),
        (status = 503, description = "Store is unreachable", body = Health)
    ),
    tag = "health",
)]
/// Report name, version, commit and store status.
///
/// `OPTIONS` gets the same status and `X-App` header without a body.
pub async fn health(method: Method, users: Extension<CrudService<User>>) -> impl IntoResponse {
    let store_healthy = check_store(&users.0).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_healthy { "ok" } else { "error" }.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app);
            headers
        })
        .unwrap_or_else(|err| {
            debug!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    if store_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn check_store(users: &CrudService<User>) -> bool {
    let span = info_span!("store.ping", db.operation = "PING");
    match timeout(
        Duration::from_secs(HEALTH_STORE_TIMEOUT_SECONDS),
        users.store().ping().instrument(span),
    )
    .await
    {
        Ok(Ok(())) => {
            debug!("Store is healthy");
            true
        }
        Ok(Err(err)) => {
            error!("Failed to ping store: {}", err);
            false
        }
        Err(_) => {
            warn!("Store health check timed out");
            false
        }
    }
}
