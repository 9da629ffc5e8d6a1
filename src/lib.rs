//! Proxyman - forward proxy gateway
//!
//! Relays client HTTP requests through a rotating pool of upstream HTTP and
//! SOCKS5 proxies.
//!
//! ## Features
//!
//! - Round-robin and random rotation with per-session affinity
//! - Bounded retries across upstreams with a per-exchange deadline
//! - Basic proxy authentication
//! - One trace line per request, with attempt headers on every response

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use context::GatewayContext;
pub use error::{GatewayError, Result};
