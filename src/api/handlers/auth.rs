//! Token lifecycle routes under `/api/v1/system/auth`.

use crate::{
    api::{
        envelope::Success,
        error::ErrorBody,
        extract::{ApiJson, BearerToken},
    },
    auth::{AuthContext, AuthResolver, LoginRequest, captcha::Captcha, token::TokenPair},
    error::Error,
};
use axum::{body::Bytes, extract::Extension};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/system/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "Invalid credentials or captcha", body = ErrorBody),
        (status = 422, description = "Malformed body", body = ErrorBody),
    ),
    tag = "auth",
)]
pub async fn login(
    Extension(resolver): Extension<Arc<AuthResolver>>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Success<TokenPair>, Error> {
    let pair = resolver.login(&request).await?;
    Ok(Success::new(pair, "login success"))
}

#[utoipa::path(
    post,
    path = "/api/v1/system/auth/token/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Access or refresh token rejected", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Exchange a refresh token for a new pair.
///
/// The caller must still hold a valid access token; the refresh token is
/// single use and the current access token is revoked.
pub async fn refresh(
    Extension(resolver): Extension<Arc<AuthResolver>>,
    context: AuthContext,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Success<TokenPair>, Error> {
    let pair = resolver.refresh(&request.refresh_token, &context).await?;
    Ok(Success::new(pair, "token refreshed"))
}

#[utoipa::path(
    post,
    path = "/api/v1/system/auth/captcha/get",
    responses(
        (status = 200, description = "New captcha challenge", body = Captcha),
    ),
    tag = "auth",
)]
pub async fn captcha(
    Extension(resolver): Extension<Arc<AuthResolver>>,
) -> Result<Success<Captcha>, Error> {
    let captcha = resolver.captcha().issue().await?;
    Ok(Success::new(captcha, "success"))
}

#[utoipa::path(
    post,
    path = "/api/v1/system/auth/logout",
    request_body(content = Option<LogoutRequest>),
    responses(
        (status = 200, description = "Tokens revoked"),
        (status = 401, description = "Malformed token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Revoke the access token and, when given, the refresh token. Repeating a
/// logout or logging out with an expired token succeeds.
pub async fn logout(
    Extension(resolver): Extension<Arc<AuthResolver>>,
    BearerToken(access): BearerToken,
    body: Bytes,
) -> Result<Success<()>, Error> {
    let request: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| Error::invalid("body", &err.to_string()))?
    };

    resolver
        .logout(&access, request.refresh_token.as_deref())
        .await?;
    Ok(Success::message("logout success"))
}
