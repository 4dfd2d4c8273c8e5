//! Request extractors.
//!
//! Rejections of the stock axum extractors are turned into validation errors
//! so malformed input gets the same envelope as a failed field check.

use crate::{
    auth::{AuthContext, AuthError, AuthResolver},
    error::Error,
    validate::Validate,
};
use anyhow::anyhow;
use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{
        Uri,
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
    },
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Raw bearer token of the request.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Self(token.to_string()))
            .ok_or_else(|| AuthError::TokenInvalid.into())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let resolver = parts
            .extensions
            .get::<Arc<AuthResolver>>()
            .cloned()
            .ok_or_else(|| Error::Internal(anyhow!("auth resolver extension is missing")))?;
        resolver.context(&token).await
    }
}

/// JSON body without field checks.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection| Error::invalid("body", &rejection.body_text()))
    }
}

/// Query string and body of a request, parsed on demand.
///
/// Handlers behind a permission take this as their last argument and parse
/// only after `authorize`, so a caller without the permission is refused
/// before the shape of their input is looked at.
#[derive(Debug)]
pub struct Input {
    uri: Uri,
    json: bool,
    body: Bytes,
}

impl Input {
    /// # Errors
    /// Validation error on `query` when the query string does not fit `T`.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Query::<T>::try_from_uri(&self.uri)
            .map(|Query(value)| value)
            .map_err(|rejection| Error::invalid("query", &rejection.body_text()))
    }

    /// # Errors
    /// Validation error on `body` when it is not JSON or does not fit `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if !self.json {
            return Err(Error::invalid(
                "body",
                "expected request with `Content-Type: application/json`",
            ));
        }
        serde_json::from_slice(&self.body).map_err(|err| Error::invalid("body", &err.to_string()))
    }

    /// [`Input::json`] followed by the type's field checks.
    ///
    /// # Errors
    /// Validation error when parsing or any check fails.
    pub fn valid_json<T: DeserializeOwned + Validate>(&self) -> Result<T, Error> {
        let value: T = self.json()?;
        value.validate().map_err(Error::Validation)?;
        Ok(value)
    }
}

impl<S: Send + Sync> FromRequest<S> for Input {
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let uri = req.uri().clone();
        let json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|essence| essence.trim().to_ascii_lowercase())
            .is_some_and(|essence| {
                essence.starts_with("application/")
                    && (essence == "application/json" || essence.ends_with("+json"))
            });
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| Error::invalid("body", &rejection.body_text()))?;
        Ok(Self { uri, json, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Ids {
        id: i64,
    }

    fn parts(uri: &str, auth: Option<&str>) -> Parts {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        let (parts, ()) = builder
            .body(())
            .unwrap_or_else(|err| panic!("request: {err}"))
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn bearer_token_is_required() {
        let mut with = parts("/", Some("Bearer abc.def"));
        let token = BearerToken::from_request_parts(&mut with, &()).await;
        assert_eq!(token.ok().map(|t| t.0), Some("abc.def".to_string()));

        for header in [None, Some("Basic abc"), Some("Bearer ")] {
            let mut without = parts("/", header);
            assert!(matches!(
                BearerToken::from_request_parts(&mut without, &()).await,
                Err(Error::Auth(AuthError::TokenInvalid))
            ));
        }
    }

    async fn input(uri: &str, content_type: Option<&str>, body: &str) -> Input {
        let mut builder = HttpRequest::builder().method("POST").uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let request = builder
            .body(axum::body::Body::from(body.to_string()))
            .unwrap_or_else(|err| panic!("request: {err}"));
        Input::from_request(request, &())
            .await
            .unwrap_or_else(|err| panic!("input: {err}"))
    }

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    impl Validate for Named {
        fn validate(&self) -> Result<(), Vec<crate::validate::FieldError>> {
            crate::validate::Checks::new()
                .check("name", !self.name.is_empty(), "required")
                .finish()
        }
    }

    #[tokio::test]
    async fn malformed_input_is_accepted_until_parsed() {
        let input = input("/?id=three", Some("application/json"), "{not json").await;
        assert!(matches!(input.query::<Ids>(), Err(Error::Validation(_))));
        assert!(matches!(input.json::<Named>(), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn query_and_body_parse_on_demand() {
        let input = input(
            "/?id=3",
            Some("application/json; charset=utf-8"),
            r#"{"name": "ops"}"#,
        )
        .await;
        assert_eq!(input.query::<Ids>().ok().map(|q| q.id), Some(3));
        assert_eq!(input.valid_json::<Named>().ok().map(|n| n.name), Some("ops".to_string()));
    }

    #[tokio::test]
    async fn body_needs_a_json_content_type_and_passing_checks() {
        let plain = input("/", Some("text/plain"), r#"{"name": "ops"}"#).await;
        assert!(matches!(plain.json::<Named>(), Err(Error::Validation(_))));

        let vendor = input("/", Some("application/vnd.api+json"), r#"{"name": "ops"}"#).await;
        assert!(vendor.json::<Named>().is_ok());

        let empty = input("/", Some("application/json"), r#"{"name": ""}"#).await;
        assert!(empty.json::<Named>().is_ok());
        assert!(matches!(empty.valid_json::<Named>(), Err(Error::Validation(_))));
    }
}
