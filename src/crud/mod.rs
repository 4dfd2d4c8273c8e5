//! Permission-checked CRUD pipeline.
//!
//! Every entry point takes an [`Authorized`] grant, so the permission check
//! has already happened at the route. The pipeline applies the grant's
//! [`Visibility`] to every read and write: rows the caller may not see behave
//! exactly like rows that do not exist.

use crate::{
    auth::Authorized,
    error::Error,
    resources::{AuditMeta, Resource},
    store::{Filter, Query, Store, Visibility},
    validate::Validate,
};
use async_trait::async_trait;
use chrono::Utc;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{info, warn};

mod export;
mod page;

pub use export::{Export, XLSX_CONTENT_TYPE, to_xlsx};
pub use page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, Pagination};

/// Runs after a successful write to resource `R`.
#[async_trait]
pub trait WriteHook<R>: Send + Sync {
    async fn after_write(&self) -> anyhow::Result<()>;
}

pub struct CrudService<R: Resource> {
    store: Arc<dyn Store<R>>,
    hooks: Vec<Arc<dyn WriteHook<R>>>,
}

impl<R: Resource> Clone for CrudService<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            hooks: self.hooks.clone(),
        }
    }
}

impl<R: Resource> CrudService<R> {
    #[must_use]
    pub fn new(store: Arc<dyn Store<R>>) -> Self {
        Self {
            store,
            hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn WriteHook<R>>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store<R>> {
        &self.store
    }

    /// One page of visible rows matching `query`.
    ///
    /// # Errors
    /// Validation error for bad paging, internal error if the store fails.
    pub async fn list(
        &self,
        grant: &Authorized<'_>,
        query: &R::Query,
        pagination: &Pagination,
    ) -> Result<Page<R>, Error> {
        let (page_no, page_size, window) = pagination.window()?;
        let order = pagination.order(R::SORTABLE)?;

        let query = Query::new(R::filter(query), grant.visibility().clone()).with_order(order);
        let total = self.store.count(&query).await?;
        let items = self.store.fetch(&query.with_window(window)).await?;

        Ok(Page::new(page_no, page_size, total, items))
    }

    /// # Errors
    /// `NotFound` when the row does not exist or is not visible.
    pub async fn get(&self, grant: &Authorized<'_>, id: i64) -> Result<R, Error> {
        self.visible(grant.visibility(), id).await
    }

    /// # Errors
    /// Validation, conflict or internal error.
    pub async fn create(&self, grant: &Authorized<'_>, payload: R::Create) -> Result<R, Error> {
        payload.validate().map_err(Error::Validation)?;

        let entity = R::create(payload, AuditMeta::new(Some(grant.user_id()), Utc::now()))?;
        let entity = self.store.insert(entity).await?;

        self.audit(grant, "create", &[entity.meta().id]);
        self.after_write().await;
        Ok(entity)
    }

    /// Apply `payload` to a visible row. Concurrent updates are last-writer-wins.
    ///
    /// # Errors
    /// `NotFound`, validation, domain, conflict or internal error.
    pub async fn update(
        &self,
        grant: &Authorized<'_>,
        id: i64,
        payload: R::Update,
    ) -> Result<R, Error> {
        payload.validate().map_err(Error::Validation)?;

        let mut entity = self.visible(grant.visibility(), id).await?;
        entity.apply(payload)?;
        entity.meta_mut().touch(Utc::now());

        let entity = self
            .store
            .update(entity)
            .await?
            .ok_or_else(|| Error::not_found(R::KIND, id))?;

        self.audit(grant, "update", &[id]);
        self.after_write().await;
        Ok(entity)
    }

    /// Delete a batch of rows. Every id must exist and be visible; nothing is
    /// deleted otherwise.
    ///
    /// # Errors
    /// `NotFound`, domain error from the resource guard, `Conflict` when a row
    /// is still referenced.
    pub async fn delete(&self, grant: &Authorized<'_>, ids: &[i64]) -> Result<u64, Error> {
        let ids = dedup(ids);
        if ids.is_empty() {
            return Err(Error::invalid("ids", "must not be empty"));
        }

        let rows = self.fetch_ids(grant.visibility(), &ids).await?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !rows.iter().any(|row| row.meta().id == **id))
        {
            return Err(Error::not_found(R::KIND, *missing));
        }
        for row in &rows {
            row.guard_delete()?;
        }

        let deleted = self.store.delete(&ids).await?;

        self.audit(grant, "delete", &ids);
        self.after_write().await;
        Ok(deleted)
    }

    /// Flip the `available` flag. Ids that are missing or not visible are skipped.
    ///
    /// # Errors
    /// Internal error if the store fails.
    pub async fn set_available(
        &self,
        grant: &Authorized<'_>,
        ids: &[i64],
        available: bool,
    ) -> Result<u64, Error> {
        let ids = dedup(ids);
        if ids.is_empty() {
            return Err(Error::invalid("ids", "must not be empty"));
        }

        let visible: Vec<i64> = self
            .fetch_ids(grant.visibility(), &ids)
            .await?
            .iter()
            .map(|row| row.meta().id)
            .collect();
        let changed = self
            .store
            .set_available(&visible, available, Utc::now())
            .await?;

        self.audit(grant, if available { "enable" } else { "disable" }, &visible);
        self.after_write().await;
        Ok(changed)
    }

    /// Apply `change` to every listed row. Rows are written one by one, so a
    /// failure part way leaves earlier rows changed.
    ///
    /// # Errors
    /// `NotFound` when any id is missing or not visible (checked before any
    /// write), otherwise the first store error.
    pub async fn patch_each<F>(
        &self,
        grant: &Authorized<'_>,
        ids: &[i64],
        change: F,
    ) -> Result<Vec<R>, Error>
    where
        F: Fn(&mut R) + Send + Sync,
    {
        let ids = dedup(ids);
        if ids.is_empty() {
            return Err(Error::invalid("ids", "must not be empty"));
        }

        let rows = self.fetch_ids(grant.visibility(), &ids).await?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !rows.iter().any(|row| row.meta().id == **id))
        {
            return Err(Error::not_found(R::KIND, *missing));
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(rows.len());
        for mut row in rows {
            let id = row.meta().id;
            change(&mut row);
            row.meta_mut().touch(now);
            let row = self
                .store
                .update(row)
                .await?
                .ok_or_else(|| Error::not_found(R::KIND, id))?;
            updated.push(row);
        }

        self.audit(grant, "patch", &ids);
        self.after_write().await;
        Ok(updated)
    }

    /// Every visible row matching `query`, unpaginated, as a spreadsheet.
    ///
    /// # Errors
    /// Internal error if the store or the workbook writer fails.
    pub async fn export(&self, grant: &Authorized<'_>, query: &R::Query) -> Result<Export, Error> {
        let query = Query::new(R::filter(query), grant.visibility().clone());
        let rows = self.store.fetch(&query).await?;
        let export = to_xlsx(&rows, Utc::now())?;

        info!(
            target: "audit",
            user_id = grant.user_id(),
            permission = %grant.permission(),
            resource = R::KIND,
            rows = rows.len(),
            "export"
        );
        Ok(export)
    }

    async fn visible(&self, visibility: &Visibility, id: i64) -> Result<R, Error> {
        self.store
            .get(id)
            .await?
            .filter(|row| visibility.allows(row.meta().creator_id))
            .ok_or_else(|| Error::not_found(R::KIND, id))
    }

    async fn fetch_ids(&self, visibility: &Visibility, ids: &[i64]) -> Result<Vec<R>, Error> {
        let query = Query::new(
            Filter::new().any_of("id", ids.iter().copied()),
            visibility.clone(),
        );
        Ok(self.store.fetch(&query).await?)
    }

    fn audit(&self, grant: &Authorized<'_>, action: &str, ids: &[i64]) {
        info!(
            target: "audit",
            user_id = grant.user_id(),
            permission = %grant.permission(),
            resource = R::KIND,
            ?ids,
            action,
            "resource changed"
        );
    }

    /// The write is already committed; a failing hook is logged, not returned.
    async fn after_write(&self) {
        for hook in &self.hooks {
            if let Err(err) = hook.after_write().await {
                warn!(resource = R::KIND, "write hook failed: {err:#}");
            }
        }
    }
}

fn dedup(ids: &[i64]) -> Vec<i64> {
    ids.iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
