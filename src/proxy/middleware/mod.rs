//! Proxy middleware for authentication

mod auth;

pub use auth::{AuthStore, BasicAuthStore, HttpUser, ANONYMOUS};
