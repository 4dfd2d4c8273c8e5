//! # Adminkit (Role-Based Administration Backend)
//!
//! `adminkit` serves the administrative API for system management (users,
//! roles, departments, configuration) and auto-test bookkeeping
//! (environments, tasks).
//!
//! ## Request Pipeline
//!
//! Every permission-checked route follows the same flow:
//!
//! 1. The bearer access token is validated and resolved into a `Principal`.
//! 2. The principal's roles are folded into a `PermissionSet` (union, default-deny)
//!    and a `Visibility` derived from the roles' data scopes.
//! 3. The handler requires the exact `Permission` for its action, producing an
//!    `Authorized` grant that the CRUD pipeline demands as a parameter.
//! 4. `CrudService` runs the operation against a `Store`, scoped by visibility.
//! 5. Results are wrapped in the `{code, msg, data}` envelope; failures become
//!    `{code, msg}` with a stable code.
//!
//! ## Storage
//!
//! Persistence and cache are traits (`store::Store`, `cache::Cache`). Postgres
//! (`sqlx`) backs production; the in-memory implementations back tests and the
//! `memory://` DSN.
//!
//! ## Background Work
//!
//! Long-running work (auto-test runs, data processing) is handed to a worker
//! through `jobs::JobQueue`; the request path only submits a message and returns
//! a handle that can be polled.

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod crud;
pub mod error;
pub mod jobs;
pub mod resources;
pub mod store;
pub mod validate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
