//! Boundary validation for request payloads.
//!
//! Payload structs implement [`Validate`]; the API extractors run it right after
//! deserialization so handlers and the CRUD pipeline only see checked input.

use serde::Serialize;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub trait Validate {
    /// Returns every field error found, or `Ok` when the payload is usable.
    ///
    /// # Errors
    /// Returns the collected field errors.
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

/// Accumulates field errors so a response lists all of them at once.
#[derive(Debug, Default)]
pub struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value must contain something other than whitespace.
    #[must_use]
    pub fn required(self, field: &str, value: &str) -> Self {
        self.check(field, !value.trim().is_empty(), "must not be empty")
    }

    /// Character length (after trimming) must be within `min..=max`.
    #[must_use]
    pub fn length(self, field: &str, value: &str, min: usize, max: usize) -> Self {
        let len = value.trim().chars().count();
        self.check(
            field,
            (min..=max).contains(&len),
            &format!("length must be between {min} and {max}"),
        )
    }

    /// Like [`Checks::length`], skipped when the value is absent.
    #[must_use]
    pub fn optional_length(self, field: &str, value: Option<&str>, min: usize, max: usize) -> Self {
        match value {
            Some(value) => self.length(field, value, min, max),
            None => self,
        }
    }

    #[must_use]
    pub fn check(mut self, field: &str, ok: bool, reason: &str) -> Self {
        if !ok {
            self.errors.push(FieldError::new(field, reason));
        }
        self
    }

    /// # Errors
    /// Returns the collected field errors when any check failed.
    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
