//! Per-request trace accumulation
//!
//! Entries are buffered during one inbound request and emitted as a single
//! line on flush. The gateway flushes at intermediate retry checkpoints and
//! once more when the request ends.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::{Method, Uri};
use tracing::info;

use crate::models::SessionId;
use crate::proxy::pool::ProxyPool;

/// Trace buffer bound to one inbound request
#[derive(Debug)]
pub struct RequestLog {
    session_id: SessionId,
    method: Method,
    url: String,
    entries: Vec<String>,
    started: Instant,
}

impl RequestLog {
    pub fn new(session_id: SessionId, method: &Method, uri: &Uri) -> Self {
        Self {
            session_id,
            method: method.clone(),
            url: uri.to_string(),
            entries: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Buffer a `label=value` entry
    pub fn add_entry(&mut self, label: &str, value: impl Display) {
        self.entries.push(format!("{}={}", label, value));
    }

    /// Buffer a bare marker such as `OK`
    pub fn add_marker(&mut self, marker: &str) {
        self.entries.push(marker.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emit buffered entries as one line, then clear the buffer and restart
    /// the timer. Returns the emitted line, or `None` when nothing was buffered.
    pub fn flush(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }

        let used = self.started.elapsed();
        let line = self.format_line(used);
        info!(session_id = self.session_id.as_u64(), "{}", line);

        self.entries.clear();
        self.started = Instant::now();
        Some(line)
    }

    fn format_line(&self, used: Duration) -> String {
        format!(
            "logid={} {} {} {} used={:?}",
            self.session_id,
            self.method,
            self.url,
            self.entries.join(" "),
            used
        )
    }
}

/// Cleanup obligations of one inbound request.
///
/// Dropping the scope flushes whatever the log still buffers and releases
/// the session's affinity in the pool, so every exit path runs both exactly once.
pub struct RequestScope {
    pub log: RequestLog,
    pool: Arc<dyn ProxyPool>,
}

impl RequestScope {
    pub fn new(log: RequestLog, pool: Arc<dyn ProxyPool>) -> Self {
        Self { log, pool }
    }

    pub fn session_id(&self) -> SessionId {
        self.log.session_id()
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.log.flush();
        self.pool.clean_session_proxy(self.log.session_id());
    }
}
