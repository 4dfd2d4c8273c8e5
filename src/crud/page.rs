use crate::{
    error::Error,
    store::{OrderBy, Window},
    validate::FieldError,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

/// `page_no`, `page_size` and `order_by` query parameters of list routes.
///
/// `order_by` is a column name, optionally suffixed with `:asc` or `:desc`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub page_no: Option<u64>,
    pub page_size: Option<u64>,
    pub order_by: Option<String>,
}

impl Pagination {
    #[must_use]
    pub fn new(page_no: u64, page_size: u64) -> Self {
        Self {
            page_no: Some(page_no),
            page_size: Some(page_size),
            order_by: None,
        }
    }

    /// # Errors
    /// Validation error when the page number or size is out of range.
    pub fn window(&self) -> Result<(u64, u64, Window), Error> {
        let page_no = self.page_no.unwrap_or(1);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        let mut errors = Vec::new();
        if page_no == 0 {
            errors.push(FieldError::new("page_no", "must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            errors.push(FieldError::new(
                "page_size",
                &format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let window = Window {
            offset: (page_no - 1).saturating_mul(page_size),
            limit: page_size,
        };
        Ok((page_no, page_size, window))
    }

    /// Resolve `order_by` against the columns a resource allows.
    ///
    /// # Errors
    /// Validation error for unknown columns or directions.
    pub fn order(&self, sortable: &'static [&'static str]) -> Result<OrderBy, Error> {
        let Some(raw) = self.order_by.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(OrderBy::default());
        };

        let (column, direction) = raw.split_once(':').unwrap_or((raw, "asc"));
        let descending = match direction.to_ascii_lowercase().as_str() {
            "asc" => false,
            "desc" => true,
            _ => return Err(Error::invalid("order_by", "direction must be asc or desc")),
        };
        let column = sortable
            .iter()
            .find(|candidate| **candidate == column)
            .ok_or_else(|| {
                Error::invalid(
                    "order_by",
                    &format!("sortable columns: {}", sortable.join(", ")),
                )
            })?;

        Ok(OrderBy { column, descending })
    }
}

/// One page of a list result.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub page_no: u64,
    pub page_size: u64,
    pub total: u64,
    pub has_next: bool,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(page_no: u64, page_size: u64, total: u64, items: Vec<T>) -> Self {
        let seen = (page_no - 1).saturating_mul(page_size) + items.len() as u64;
        Self {
            page_no,
            page_size,
            total,
            has_next: seen < total,
            items,
        }
    }
}
