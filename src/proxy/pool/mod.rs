//! Upstream proxy pool
//!
//! The forwarding engine only talks to the pool through [`ProxyPool`]; the
//! selection policy and bookkeeping live behind it.

mod memory;

pub use memory::MemoryProxyPool;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{AttemptOutcome, SessionId, UpstreamProxy};

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "random" => Self::Random,
            _ => Self::RoundRobin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
        }
    }
}

/// Shared pool of upstream proxies.
///
/// Implementations must be safe to call from any number of concurrent
/// requests.
#[async_trait]
pub trait ProxyPool: Send + Sync {
    /// Pick an upstream for the given session.
    ///
    /// Returns an error if no proxy can be handed out.
    async fn get_one_proxy(&self, session_id: SessionId) -> Result<Arc<UpstreamProxy>>;

    /// Report how an attempt through `proxy` went
    fn mark_proxy_status(&self, proxy: &UpstreamProxy, outcome: AttemptOutcome);

    /// Forget any affinity held for the session
    fn clean_session_proxy(&self, session_id: SessionId);

    /// Get the number of proxies in the pool
    fn available_count(&self) -> usize;
}
