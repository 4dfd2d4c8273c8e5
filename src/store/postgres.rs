//! Postgres store built on `sqlx::QueryBuilder`.
//!
//! Column names come from the resource definitions, never from requests;
//! every value is bound. Constraint violations are classified by SQLSTATE.

use super::{Clause, FieldValue, Query, Store, StoreError, Visibility};
use crate::resources::Resource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, PgPool, Postgres, QueryBuilder,
    postgres::{PgPoolOptions, PgRow},
};
use std::{marker::PhantomData, time::Duration};
use tracing::{Instrument, info_span};

/// Connect a pool the way the server expects it.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

pub struct PgStore<R> {
    pool: PgPool,
    _resource: PhantomData<fn() -> R>,
}

impl<R> PgStore<R> {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _resource: PhantomData,
        }
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let constraint = db.constraint().unwrap_or("unnamed").to_string();
        match db.code().as_deref() {
            Some("23503") => return StoreError::ForeignKey { constraint },
            Some("23505") => return StoreError::Unique { constraint },
            _ => {}
        }
    }
    StoreError::Backend(err)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: FieldValue) {
    match value {
        FieldValue::Int(value) => {
            builder.push_bind(value);
        }
        FieldValue::Text(value) => {
            builder.push_bind(value);
        }
        FieldValue::Bool(value) => {
            builder.push_bind(value);
        }
        FieldValue::Timestamp(value) => {
            builder.push_bind(value);
        }
        FieldValue::IntList(value) => {
            builder.push_bind(value);
        }
        FieldValue::TextList(value) => {
            builder.push_bind(value);
        }
        FieldValue::Json(value) => {
            builder.push_bind(value);
        }
    }
}

fn push_where(builder: &mut QueryBuilder<'static, Postgres>, query: &Query) {
    builder.push(" WHERE TRUE");
    for clause in query.filter.clauses() {
        match clause {
            Clause::Contains(column, needle) => {
                builder.push(format!(" AND {column} ILIKE "));
                builder.push_bind(format!("%{}%", escape_like(needle)));
            }
            Clause::Equals(column, value) => {
                builder.push(format!(" AND {column} = "));
                push_value(builder, value.clone());
            }
            Clause::AnyOf(column, ids) => {
                builder.push(format!(" AND {column} = ANY("));
                builder.push_bind(ids.clone());
                builder.push(")");
            }
        }
    }
    if let Visibility::Creators(ids) = &query.visibility {
        builder.push(" AND creator_id = ANY(");
        builder.push_bind(ids.iter().copied().collect::<Vec<i64>>());
        builder.push(")");
    }
}

fn select<R: Resource>(query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT * FROM {}", R::TABLE));
    push_where(&mut builder, query);

    let (direction, nulls) = if query.order.descending {
        ("DESC", "LAST")
    } else {
        ("ASC", "FIRST")
    };
    builder.push(format!(
        " ORDER BY {} {direction} NULLS {nulls}, id ASC",
        query.order.column
    ));

    if let Some(window) = query.window {
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(window.limit).unwrap_or(i64::MAX));
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(window.offset).unwrap_or(i64::MAX));
    }
    builder
}

fn count<R: Resource>(query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", R::TABLE));
    push_where(&mut builder, query);
    builder
}

fn insert<R: Resource>(entity: &R) -> QueryBuilder<'static, Postgres> {
    let row = entity.row();
    let columns = row
        .iter()
        .map(|(column, _)| *column)
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!("INSERT INTO {} ({columns}) VALUES (", R::TABLE));
    for (idx, (_, value)) in row.into_iter().enumerate() {
        if idx > 0 {
            builder.push(", ");
        }
        push_value(&mut builder, value);
    }
    builder.push(") RETURNING *");
    builder
}

fn update<R: Resource>(entity: &R) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("UPDATE {} SET ", R::TABLE));
    for (idx, (column, value)) in entity.row().into_iter().enumerate() {
        if idx > 0 {
            builder.push(", ");
        }
        builder.push(format!("{column} = "));
        push_value(&mut builder, value);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(entity.meta().id);
    builder.push(" RETURNING *");
    builder
}

fn span(table: &'static str, operation: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.table = table
    )
}

#[async_trait]
impl<R> Store<R> for PgStore<R>
where
    R: Resource + for<'r> FromRow<'r, PgRow>,
{
    async fn fetch(&self, query: &Query) -> Result<Vec<R>, StoreError> {
        let mut builder = select::<R>(query);
        builder
            .build_query_as::<R>()
            .fetch_all(&self.pool)
            .instrument(span(R::TABLE, "SELECT"))
            .await
            .map_err(classify)
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let mut builder = count::<R>(query);
        let total: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .instrument(span(R::TABLE, "COUNT"))
            .await
            .map_err(classify)?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn get(&self, id: i64) -> Result<Option<R>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT * FROM {} WHERE id = ", R::TABLE));
        builder.push_bind(id);
        builder
            .build_query_as::<R>()
            .fetch_optional(&self.pool)
            .instrument(span(R::TABLE, "SELECT"))
            .await
            .map_err(classify)
    }

    async fn insert(&self, entity: R) -> Result<R, StoreError> {
        let mut builder = insert(&entity);
        builder
            .build_query_as::<R>()
            .fetch_one(&self.pool)
            .instrument(span(R::TABLE, "INSERT"))
            .await
            .map_err(classify)
    }

    async fn update(&self, entity: R) -> Result<Option<R>, StoreError> {
        let mut builder = update(&entity);
        builder
            .build_query_as::<R>()
            .fetch_optional(&self.pool)
            .instrument(span(R::TABLE, "UPDATE"))
            .await
            .map_err(classify)
    }

    async fn delete(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::new(format!("DELETE FROM {} WHERE id = ANY(", R::TABLE));
        builder.push_bind(ids.to_vec());
        builder.push(")");
        builder
            .build()
            .execute(&self.pool)
            .instrument(span(R::TABLE, "DELETE"))
            .await
            .map(|result| result.rows_affected())
            .map_err(classify)
    }

    async fn set_available(
        &self,
        ids: &[i64],
        available: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut builder =
            QueryBuilder::new(format!("UPDATE {} SET available = ", R::TABLE));
        builder.push_bind(available);
        builder.push(", updated_at = GREATEST(");
        builder.push_bind(now);
        builder.push(", created_at) WHERE id = ANY(");
        builder.push_bind(ids.to_vec());
        builder.push(")");
        builder
            .build()
            .execute(&self.pool)
            .instrument(span(R::TABLE, "UPDATE"))
            .await
            .map(|result| result.rows_affected())
            .map_err(classify)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(span("none", "PING"))
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
