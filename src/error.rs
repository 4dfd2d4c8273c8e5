//! Error taxonomy shared by the resolver, the CRUD pipeline and the API.
//!
//! Store failures are reclassified on the way in ([`From<StoreError>`]); raw
//! backend text never reaches a caller. The HTTP mapping lives in
//! `api::error`.

use crate::{auth::AuthError, store::StoreError, validate::FieldError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("validation failed: {}", describe(.0))]
    Validation(Vec<FieldError>),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("{reason}")]
    Conflict { reason: String },

    /// Business rule violation; the message is safe to show.
    #[error("{msg}")]
    Domain { msg: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain { msg: msg.into() }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: &str) -> Self {
        Self::Validation(vec![FieldError::new(field, reason)])
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| format!("{}: {}", error.field, error.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ForeignKey { constraint } => {
                debug!(%constraint, "reference integrity violation");
                Self::conflict("resource is still referenced by other records")
            }
            StoreError::Unique { constraint } => {
                debug!(%constraint, "uniqueness violation");
                Self::conflict("a record with the same unique value already exists")
            }
            StoreError::Backend(err) => Self::Internal(err.into()),
        }
    }
}
