//! Process-scoped gateway state
//!
//! Holds the request counter that session ids are issued from.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::SessionId;

/// Shared state created once at startup and handed to the handler
#[derive(Debug)]
pub struct GatewayContext {
    /// Base for session ids, derived from the startup time
    epoch: u64,
    /// Requests accepted since startup
    requests: AtomicU64,
}

impl GatewayContext {
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self::with_epoch(secs.saturating_mul(1_000_000))
    }

    /// Create a context with an explicit id base
    pub fn with_epoch(epoch: u64) -> Self {
        Self {
            epoch,
            requests: AtomicU64::new(0),
        }
    }

    /// Issue the session id for a new inbound request.
    ///
    /// Ids are unique for the lifetime of the context.
    pub fn next_session_id(&self) -> SessionId {
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        SessionId(self.epoch.wrapping_add(n))
    }

    /// Number of requests accepted so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for GatewayContext {
    fn default() -> Self {
        Self::new()
    }
}
