pub mod auth;
pub mod configs;
pub mod crud;
pub mod health;
pub mod jobs;
pub mod roles;
