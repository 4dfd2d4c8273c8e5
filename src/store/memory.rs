//! In-process store used by the `memory://` backend and by tests.
//!
//! Mirrors the constraints the Postgres schema enforces: unique columns,
//! restricted deletes of referenced rows and `creator_id` set to `NULL` when
//! the creating user goes away. Cross-table references are wired explicitly
//! with [`ReferenceCheck`]s when the stores are built.

use super::{Query, Store, StoreError};
use crate::resources::Resource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering as AtomicOrdering},
    },
};
use tokio::sync::RwLock;

/// A link from another table to the rows of the store that owns the check.
#[async_trait]
pub trait ReferenceCheck: Send + Sync {
    /// Fails with `ForeignKey` when a row still references one of `ids`.
    async fn restrict(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Called after `ids` have been deleted.
    async fn released(&self, _ids: &[i64]) {}
}

/// `column` of the other store holds ids of this store; deleting a referenced
/// row is refused.
pub struct ColumnReference<T: Resource> {
    store: Arc<MemoryStore<T>>,
    column: &'static str,
    constraint: &'static str,
}

impl<T: Resource> ColumnReference<T> {
    #[must_use]
    pub fn new(store: Arc<MemoryStore<T>>, column: &'static str, constraint: &'static str) -> Self {
        Self {
            store,
            column,
            constraint,
        }
    }
}

#[async_trait]
impl<T: Resource> ReferenceCheck for ColumnReference<T> {
    async fn restrict(&self, ids: &[i64]) -> Result<(), StoreError> {
        let rows = self.store.rows.read().await;
        let referenced = rows.values().any(|row| {
            row.value(self.column)
                .is_some_and(|value| value.ids().iter().any(|id| ids.contains(id)))
        });
        if referenced {
            Err(StoreError::ForeignKey {
                constraint: self.constraint.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Rows of the other store created by deleted users lose their `creator_id`.
pub struct CreatorReference<T: Resource> {
    store: Arc<MemoryStore<T>>,
}

impl<T: Resource> CreatorReference<T> {
    #[must_use]
    pub fn new(store: Arc<MemoryStore<T>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<T: Resource> ReferenceCheck for CreatorReference<T> {
    async fn restrict(&self, _ids: &[i64]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn released(&self, ids: &[i64]) {
        self.store.clear_creators(ids).await;
    }
}

pub struct MemoryStore<R> {
    rows: RwLock<BTreeMap<i64, R>>,
    next_id: AtomicI64,
    references: RwLock<Vec<Arc<dyn ReferenceCheck>>>,
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            references: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_reference(mut self, check: Arc<dyn ReferenceCheck>) -> Self {
        self.references.get_mut().push(check);
        self
    }

    /// Link a check after construction, for stores that reference each other.
    pub async fn add_reference(&self, check: Arc<dyn ReferenceCheck>) {
        self.references.write().await.push(check);
    }

    async fn clear_creators(&self, ids: &[i64]) {
        let mut rows = self.rows.write().await;
        for row in rows.values_mut() {
            if row.meta().creator_id.is_some_and(|id| ids.contains(&id)) {
                row.meta_mut().creator_id = None;
            }
        }
    }

    fn check_unique(rows: &BTreeMap<i64, R>, entity: &R) -> Result<(), StoreError> {
        for column in R::UNIQUE {
            let value = entity.value(column);
            let taken = rows.values().any(|row| {
                row.meta().id != entity.meta().id && value.is_some() && row.value(column) == value
            });
            if taken {
                return Err(StoreError::Unique {
                    constraint: format!("{}_{column}_key", R::TABLE),
                });
            }
        }
        Ok(())
    }

    fn matching<'a>(rows: &'a BTreeMap<i64, R>, query: &Query) -> Vec<&'a R> {
        rows.values()
            .filter(|row| query.visibility.allows(row.meta().creator_id))
            .filter(|row| {
                query
                    .filter
                    .clauses()
                    .iter()
                    .all(|clause| clause.matches(row.value(clause.column()).as_ref()))
            })
            .collect()
    }
}

#[async_trait]
impl<R: Resource> Store<R> for MemoryStore<R> {
    async fn fetch(&self, query: &Query) -> Result<Vec<R>, StoreError> {
        let rows = self.rows.read().await;
        let mut found = Self::matching(&rows, query);

        let order = query.order;
        found.sort_by(|a, b| {
            let ordering = match (a.value(order.column), b.value(order.column)) {
                (Some(x), Some(y)) => x.compare(&y),
                _ => Ordering::Equal,
            };
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            ordering.then_with(|| a.meta().id.cmp(&b.meta().id))
        });

        let found = found.into_iter().cloned();
        Ok(match query.window {
            Some(window) => found
                .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
                .take(usize::try_from(window.limit).unwrap_or(usize::MAX))
                .collect(),
            None => found.collect(),
        })
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let rows = self.rows.read().await;
        Ok(Self::matching(&rows, query).len() as u64)
    }

    async fn get(&self, id: i64) -> Result<Option<R>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn insert(&self, mut entity: R) -> Result<R, StoreError> {
        let mut rows = self.rows.write().await;
        entity.meta_mut().id = 0;
        Self::check_unique(&rows, &entity)?;

        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        entity.meta_mut().id = id;
        rows.insert(id, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: R) -> Result<Option<R>, StoreError> {
        let mut rows = self.rows.write().await;
        let id = entity.meta().id;
        if !rows.contains_key(&id) {
            return Ok(None);
        }
        Self::check_unique(&rows, &entity)?;
        rows.insert(id, entity.clone());
        Ok(Some(entity))
    }

    async fn delete(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let references = self.references.read().await.clone();
        for check in &references {
            check.restrict(ids).await?;
        }

        let removed = {
            let mut rows = self.rows.write().await;
            if let Some(column) = R::SELF_REFERENCE {
                let has_children = rows.values().any(|row| {
                    !ids.contains(&row.meta().id)
                        && row
                            .value(column)
                            .is_some_and(|value| value.ids().iter().any(|id| ids.contains(id)))
                });
                if has_children {
                    return Err(StoreError::ForeignKey {
                        constraint: format!("{}_{column}_fkey", R::TABLE),
                    });
                }
            }
            let removed = ids.iter().filter(|id| rows.remove(id).is_some()).count() as u64;
            if R::CREATORS {
                for row in rows.values_mut() {
                    if row.meta().creator_id.is_some_and(|id| ids.contains(&id)) {
                        row.meta_mut().creator_id = None;
                    }
                }
            }
            removed
        };

        for check in &references {
            check.released(ids).await;
        }
        Ok(removed)
    }

    async fn set_available(
        &self,
        ids: &[i64],
        available: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                row.meta_mut().available = available;
                row.meta_mut().touch(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
