use super::Permission;
use thiserror::Error;

/// Authentication and authorization failures.
///
/// Expired and malformed access tokens are distinct so a client knows whether
/// to refresh or to log in again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("access token has expired")]
    TokenExpired,
    #[error("access token is invalid")]
    TokenInvalid,
    #[error("refresh token is expired, unknown or already used")]
    InvalidRefresh,
    #[error("missing permission: {0}")]
    InsufficientPermission(Permission),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("invalid captcha")]
    InvalidCaptcha,
}
