//! Persistence seam.
//!
//! The CRUD pipeline talks to a [`Store`] per resource type. Queries are
//! described with plain data ([`Filter`], [`Visibility`], [`OrderBy`],
//! [`Window`]) so the in-memory and Postgres backends interpret the same
//! request the same way: text clauses are case-insensitive substring
//! matches, exact clauses are equality, and unset filters never appear.

use crate::resources::Resource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{cmp::Ordering, collections::BTreeSet};
use thiserror::Error;

mod memory;
mod postgres;

pub use memory::{ColumnReference, CreatorReference, MemoryStore, ReferenceCheck};
pub use postgres::{PgStore, connect};

/// A typed column value. `None` inside a variant is SQL `NULL` of that type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(Option<i64>),
    Text(Option<String>),
    Bool(bool),
    Timestamp(Option<DateTime<Utc>>),
    IntList(Vec<i64>),
    TextList(Vec<String>),
    Json(Option<serde_json::Value>),
}

impl FieldValue {
    /// Human readable rendering, used for spreadsheet cells.
    #[must_use]
    pub fn display(&self) -> String {
        fn join<T: ToString>(values: &[T]) -> String {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }

        match self {
            Self::Int(value) => value.map(|v| v.to_string()).unwrap_or_default(),
            Self::Text(value) => value.clone().unwrap_or_default(),
            Self::Bool(value) => value.to_string(),
            Self::Timestamp(value) => value
                .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            Self::IntList(values) => join(values),
            Self::TextList(values) => join(values),
            Self::Json(value) => value.as_ref().map(ToString::to_string).unwrap_or_default(),
        }
    }

    /// Ordering used by in-memory sorting. `NULL` sorts first; mismatched
    /// variants compare equal.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Ids held by an integer column, scalar or list.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        match self {
            Self::Int(Some(id)) => vec![*id],
            Self::IntList(ids) => ids.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(Some(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(Some(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(Some(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Case-insensitive substring match on a text column.
    Contains(&'static str, String),
    Equals(&'static str, FieldValue),
    /// Integer column value is one of the given ids.
    AnyOf(&'static str, Vec<i64>),
}

impl Clause {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Contains(column, _) | Self::Equals(column, _) | Self::AnyOf(column, _) => column,
        }
    }

    pub(crate) fn matches(&self, value: Option<&FieldValue>) -> bool {
        match (self, value) {
            (Self::Contains(_, needle), Some(FieldValue::Text(Some(text)))) => {
                text.to_lowercase().contains(&needle.to_lowercase())
            }
            (Self::Equals(_, expected), Some(actual)) => expected == actual,
            (Self::AnyOf(_, ids), Some(FieldValue::Int(Some(id)))) => ids.contains(id),
            _ => false,
        }
    }
}

/// Conjunction of clauses. Builder methods skip `None` so optional query
/// parameters never turn into `= NULL` comparisons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(mut self, column: &'static str, value: Option<&str>) -> Self {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.clauses.push(Clause::Contains(column, value.to_string()));
        }
        self
    }

    #[must_use]
    pub fn equals<V: Into<FieldValue>>(mut self, column: &'static str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.clauses.push(Clause::Equals(column, value.into()));
        }
        self
    }

    #[must_use]
    pub fn any_of(mut self, column: &'static str, ids: impl IntoIterator<Item = i64>) -> Self {
        self.clauses
            .push(Clause::AnyOf(column, ids.into_iter().collect()));
        self
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

/// Which rows a principal may see, derived from role data scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    /// Only rows created by one of these users.
    Creators(BTreeSet<i64>),
}

impl Visibility {
    #[must_use]
    pub fn allows(&self, creator_id: Option<i64>) -> bool {
        match self {
            Self::All => true,
            Self::Creators(ids) => creator_id.is_some_and(|id| ids.contains(&id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub descending: bool,
}

impl Default for OrderBy {
    fn default() -> Self {
        Self {
            column: "id",
            descending: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub visibility: Visibility,
    pub order: OrderBy,
    pub window: Option<Window>,
}

impl Query {
    #[must_use]
    pub fn new(filter: Filter, visibility: Visibility) -> Self {
        Self {
            filter,
            visibility,
            order: OrderBy::default(),
            window: None,
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row is still referenced ({constraint})")]
    ForeignKey { constraint: String },
    #[error("duplicate value ({constraint})")]
    Unique { constraint: String },
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store<R: Resource>: Send + Sync {
    /// Rows matching the query, ordered and windowed.
    async fn fetch(&self, query: &Query) -> Result<Vec<R>, StoreError>;

    /// Number of rows matching the query, ignoring its window.
    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<R>, StoreError>;

    /// Persist a new row and return it with its assigned id.
    async fn insert(&self, entity: R) -> Result<R, StoreError>;

    /// Replace the row with the entity's id. `None` when the row is gone.
    async fn update(&self, entity: R) -> Result<Option<R>, StoreError>;

    /// Delete every id in one statement; nothing is removed on error.
    async fn delete(&self, ids: &[i64]) -> Result<u64, StoreError>;

    async fn set_available(
        &self,
        ids: &[i64],
        available: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
