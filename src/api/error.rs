//! Error to HTTP mapping.
//!
//! Every failure leaves the service as `{code, msg}` with a stable numeric
//! code. Internal errors are logged in full and replaced by a generic message.

use crate::{auth::AuthError, error::Error};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::{debug, error};
use utoipa::ToSchema;

pub const INTERNAL_MESSAGE: &str = "internal server error";

/// Error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: u32,
    pub msg: String,
}

#[must_use]
pub fn error_response(status: StatusCode, code: u32, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            code,
            msg: msg.into(),
        }),
    )
        .into_response()
}

impl Error {
    /// HTTP status and envelope code.
    #[must_use]
    pub fn status(&self) -> (StatusCode, u32) {
        match self {
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials | AuthError::InvalidCaptcha => {
                    (StatusCode::BAD_REQUEST, 40001)
                }
                AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, 40101),
                AuthError::TokenInvalid => (StatusCode::UNAUTHORIZED, 40102),
                AuthError::InvalidRefresh => (StatusCode::UNAUTHORIZED, 40103),
                AuthError::InsufficientPermission(_) => (StatusCode::FORBIDDEN, 40301),
            },
            Self::Domain { .. } => (StatusCode::BAD_REQUEST, 40000),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, 40401),
            Self::Conflict { .. } => (StatusCode::CONFLICT, 40901),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, 42201),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, 50001),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let msg = match &self {
            Self::Internal(err) => {
                error!(code, "internal error: {err:#}");
                INTERNAL_MESSAGE.to_string()
            }
            other => {
                debug!(code, "request failed: {other}");
                other.to_string()
            }
        };
        error_response(status, code, msg)
    }
}

/// `CatchPanicLayer` handler.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("handler panicked: {detail}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, 50001, INTERNAL_MESSAGE)
}

/// Fallback for unknown routes.
pub async fn route_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, 40401, "route not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::Permission, validate::FieldError};
    use anyhow::{Result, anyhow};
    use axum::body::to_bytes;

    async fn body(response: Response) -> Result<ErrorBody> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[test]
    fn taxonomy_maps_to_stable_codes() {
        let cases = [
            (Error::from(AuthError::TokenExpired), 401, 40101),
            (Error::from(AuthError::TokenInvalid), 401, 40102),
            (Error::from(AuthError::InvalidRefresh), 401, 40103),
            (Error::from(AuthError::InvalidCredentials), 400, 40001),
            (
                Error::from(AuthError::InsufficientPermission(Permission::RoleQuery)),
                403,
                40301,
            ),
            (Error::domain("nope"), 400, 40000),
            (Error::not_found("role", 1), 404, 40401),
            (Error::conflict("in use"), 409, 40901),
            (Error::Validation(vec![FieldError::new("name", "empty")]), 422, 42201),
            (Error::Internal(anyhow!("boom")), 500, 50001),
        ];
        for (err, status, code) in cases {
            let (actual_status, actual_code) = err.status();
            assert_eq!((actual_status.as_u16(), actual_code), (status, code));
        }
    }

    #[tokio::test]
    async fn internal_details_are_not_echoed() -> Result<()> {
        let response = Error::Internal(anyhow!("password=hunter2 at db.internal:5432")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body(response).await?;
        assert_eq!(body.code, 50001);
        assert_eq!(body.msg, INTERNAL_MESSAGE);
        Ok(())
    }

    #[tokio::test]
    async fn domain_messages_are_shown() -> Result<()> {
        let body = body(Error::domain("built-in configuration cannot be deleted").into_response()).await?;
        assert_eq!(
            body,
            ErrorBody {
                code: 40000,
                msg: "built-in configuration cannot be deleted".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn panics_render_the_generic_envelope() {
        let response = panic_response(Box::new("oops"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
