//! Authentication and authorization.
//!
//! Bearer tokens resolve into an [`AuthContext`]: the [`Principal`], the union
//! of its roles' permissions and the visibility their data scopes allow.

pub mod captcha;
mod config;
mod error;
pub mod password;
mod permission;
mod principal;
mod resolver;
pub mod token;

pub use config::AuthConfig;
pub use error::AuthError;
pub use permission::{Permission, PermissionSet, UnknownPermission};
pub use principal::{AuthContext, Authorized, Principal, TokenRef};
pub use resolver::{AuthResolver, LoginRequest};
