//! In-memory proxy pool with per-session affinity

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{ProxyPool, RotationStrategy};
use crate::error::{GatewayError, Result};
use crate::models::{AttemptOutcome, SessionId, UpstreamProxy};

/// Pool kept in memory for the lifetime of the process.
///
/// A session stays pinned to the proxy it was last given until that proxy
/// records a failure; the next selection then rotates away from it.
pub struct MemoryProxyPool {
    strategy: RotationStrategy,
    proxies: RwLock<Vec<Arc<UpstreamProxy>>>,
    index: AtomicUsize,
    sessions: DashMap<SessionId, Arc<UpstreamProxy>>,
}

impl MemoryProxyPool {
    pub fn new(strategy: RotationStrategy) -> Self {
        Self {
            strategy,
            proxies: RwLock::new(Vec::new()),
            index: AtomicUsize::new(0),
            sessions: DashMap::new(),
        }
    }

    /// Replace the proxy list
    pub fn refresh(&self, proxies: Vec<UpstreamProxy>) {
        let mut guard = self.proxies.write();
        *guard = proxies.into_iter().map(Arc::new).collect();
        self.index.store(0, Ordering::Relaxed);
        self.sessions.clear();
    }

    /// Replace the proxy list from raw URLs
    pub fn refresh_from_urls<S: AsRef<str>>(&self, urls: &[S]) -> Result<()> {
        let proxies = urls
            .iter()
            .enumerate()
            .map(|(id, raw)| UpstreamProxy::parse(id, raw.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.refresh(proxies);
        Ok(())
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    /// Number of sessions currently pinned to a proxy
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the current proxy list
    pub fn proxies(&self) -> Vec<Arc<UpstreamProxy>> {
        self.proxies.read().clone()
    }

    fn pick(&self, proxies: &[Arc<UpstreamProxy>], avoid: Option<usize>) -> Arc<UpstreamProxy> {
        let len = proxies.len();
        let mut idx = match self.strategy {
            RotationStrategy::RoundRobin => self.index.fetch_add(1, Ordering::Relaxed) % len,
            RotationStrategy::Random => rand::thread_rng().gen_range(0..len),
        };
        if len > 1 && Some(proxies[idx].id) == avoid {
            idx = (idx + 1) % len;
        }
        proxies[idx].clone()
    }
}

impl Default for MemoryProxyPool {
    fn default() -> Self {
        Self::new(RotationStrategy::default())
    }
}

#[async_trait]
impl ProxyPool for MemoryProxyPool {
    async fn get_one_proxy(&self, session_id: SessionId) -> Result<Arc<UpstreamProxy>> {
        let proxies = self.proxies.read();

        if proxies.is_empty() {
            return Err(GatewayError::NoProxiesAvailable);
        }

        let pinned = self.sessions.get(&session_id).map(|p| p.clone());
        let proxy = match pinned {
            Some(p) if p.consecutive_failures() == 0 => p,
            Some(p) => self.pick(&proxies, Some(p.id)),
            None => self.pick(&proxies, None),
        };

        proxy.record_use();
        self.sessions.insert(session_id, proxy.clone());
        debug!(
            session_id = session_id.as_u64(),
            proxy = %proxy.display_url(),
            "Selected upstream proxy"
        );
        Ok(proxy)
    }

    fn mark_proxy_status(&self, proxy: &UpstreamProxy, outcome: AttemptOutcome) {
        proxy.record_outcome(outcome);
    }

    fn clean_session_proxy(&self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    fn available_count(&self) -> usize {
        self.proxies.read().len()
    }
}
