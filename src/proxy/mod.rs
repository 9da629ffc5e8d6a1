//! Forward proxy gateway
//!
//! This module provides the proxy server functionality including:
//! - Upstream selection and session affinity through the pool
//! - HTTP and SOCKS5 upstream transports
//! - Request/response handling with retry logic
//! - Per-request trace logging

pub mod body;
pub mod handler;
pub mod headers;
pub mod middleware;
pub mod pool;
pub mod request_log;
pub mod server;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use handler::{ProxyHandler, ProxyHandlerConfig};
pub use middleware::{AuthStore, BasicAuthStore};
pub use pool::{MemoryProxyPool, ProxyPool, RotationStrategy};
pub use server::ProxyServer;
pub use transport::{HyperTransportFactory, TransportFactory};
