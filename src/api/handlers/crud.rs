//! Generic resource routes.
//!
//! Every resource gets the same seven routes under its prefix; the permission
//! each route demands comes from the resource's `PERMISSIONS` table. The
//! OpenAPI entries for these routes are generated in `api::openapi`.

use crate::{
    api::{
        envelope::Success,
        extract::Input,
    },
    auth::AuthContext,
    crud::{CrudService, Page, Pagination},
    error::Error,
    resources::{Action, Resource},
};
use axum::{
    Router,
    extract::Extension,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

const FILENAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'-');

/// `?id=` for one row, `?ids=1,2,3` for several.
#[derive(Debug, Default, Deserialize)]
pub struct IdsQuery {
    pub id: Option<i64>,
    pub ids: Option<String>,
}

impl IdsQuery {
    /// # Errors
    /// Validation error when no id is given or one is not a number.
    pub fn ids(&self) -> Result<Vec<i64>, Error> {
        let mut ids: Vec<i64> = self.id.into_iter().collect();
        if let Some(list) = self.ids.as_deref() {
            for part in list.split(',').map(str::trim).filter(|part| !part.is_empty()) {
                let id = part
                    .parse()
                    .map_err(|_| Error::invalid("ids", "must be a comma separated list of ids"))?;
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(Error::invalid("id", "required"));
        }
        Ok(ids)
    }
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    pub id: i64,
}

/// Body of `PUT /update`: the row id next to the changed fields.
#[derive(Debug, Deserialize)]
pub struct UpdateBody<U> {
    pub id: i64,
    #[serde(flatten)]
    pub changes: U,
}

#[derive(Debug, Deserialize)]
pub struct AvailableBody {
    pub ids: Vec<i64>,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct Affected {
    pub affected: u64,
}

/// Mount the generic routes of `R` under `prefix`.
pub fn routes<R: Resource>(router: Router, prefix: &str) -> Router {
    router
        .route(&format!("{prefix}/list"), get(list::<R>))
        .route(&format!("{prefix}/detail"), get(detail::<R>))
        .route(&format!("{prefix}/create"), post(create::<R>))
        .route(&format!("{prefix}/update"), put(update::<R>))
        .route(&format!("{prefix}/delete"), delete(remove::<R>))
        .route(&format!("{prefix}/available/setting"), patch(available::<R>))
        .route(&format!("{prefix}/export"), post(export::<R>))
}

pub async fn list<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<Page<R>>, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Query))?;
    let pagination: Pagination = input.query()?;
    let query: R::Query = input.query()?;
    let page = crud.list(&grant, &query, &pagination).await?;
    Ok(Success::new(page, "success"))
}

pub async fn detail<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<R>, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Query))?;
    let query: DetailQuery = input.query()?;
    let row = crud.get(&grant, query.id).await?;
    Ok(Success::new(row, "success"))
}

pub async fn create<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<R>, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Create))?;
    let row = crud.create(&grant, input.json()?).await?;
    Ok(Success::new(row, "created"))
}

pub async fn update<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<R>, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Update))?;
    let body: UpdateBody<R::Update> = input.json()?;
    let row = crud.update(&grant, body.id, body.changes).await?;
    Ok(Success::new(row, "updated"))
}

pub async fn remove<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<Affected>, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Delete))?;
    let query: IdsQuery = input.query()?;
    let affected = crud.delete(&grant, &query.ids()?).await?;
    Ok(Success::new(Affected { affected }, "deleted"))
}

pub async fn available<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<Affected>, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Patch))?;
    let body: AvailableBody = input.json()?;
    let affected = crud.set_available(&grant, &body.ids, body.available).await?;
    Ok(Success::new(Affected { affected }, "updated"))
}

/// Spreadsheet of every visible row matching the query string filter.
pub async fn export<R: Resource>(
    Extension(crud): Extension<CrudService<R>>,
    context: AuthContext,
    input: Input,
) -> Result<Response, Error> {
    let grant = context.authorize(R::PERMISSIONS.of(Action::Export))?;
    let query: R::Query = input.query()?;
    let export = crud.export(&grant, &query).await?;

    let filename = utf8_percent_encode(&export.filename, FILENAME).to_string();
    let disposition = HeaderValue::from_str(&format!("attachment; filename={filename}"))
        .map_err(|err| Error::Internal(err.into()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(export.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static("Content-Disposition"),
            ),
        ],
        export.bytes,
    )
        .into_response())
}
