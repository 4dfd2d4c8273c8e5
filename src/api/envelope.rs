use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Success envelope: `{code: 0, msg, data}`.
#[derive(Debug, Serialize)]
pub struct Success<T> {
    code: u32,
    msg: String,
    data: Option<T>,
}

impl<T: Serialize> Success<T> {
    pub fn new(data: T, msg: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            data: Some(data),
        }
    }
}

impl Success<()> {
    /// Envelope without payload; `data` is `null`.
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
