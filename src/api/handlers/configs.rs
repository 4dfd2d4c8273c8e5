use crate::{
    api::{envelope::Success, error::ErrorBody},
    error::Error,
    resources::config::{ConfigSnapshot, SystemConfigCache},
};
use axum::extract::Extension;
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/api/v1/system/config/info",
    responses(
        (status = 200, description = "Available configuration entries as key/value pairs", body = Object),
        (status = 500, description = "Store or cache failure", body = ErrorBody),
    ),
    tag = "system",
)]
/// Public system settings, served from the cache.
pub async fn info(
    Extension(configs): Extension<Arc<SystemConfigCache>>,
) -> Result<Success<ConfigSnapshot>, Error> {
    let snapshot = configs.load().await?;
    Ok(Success::new(snapshot, "success"))
}
