//! Proxy request handler with retry logic
//!
//! Authenticates each inbound request, relays it through upstream proxies
//! taken from the pool, and builds the client response. Every response
//! carries `x-man-try`, `x-man-try-max` and `x-man-id`.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body::Body;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use tracing::{debug, instrument, warn};

use crate::config::ProxyServerConfig;
use crate::context::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::models::{AttemptOutcome, SessionId, UpstreamProxy};
use crate::proxy::body::{full_body, GatewayBody, RelayBody};
use crate::proxy::headers::{self, X_MAN_ID, X_MAN_TRY, X_MAN_TRY_MAX};
use crate::proxy::middleware::AuthStore;
use crate::proxy::pool::ProxyPool;
use crate::proxy::request_log::{RequestLog, RequestScope};
use crate::proxy::transport::{ForwardRequest, TransportFactory};

/// Status sent when no attempt produced an upstream response
pub const ALL_FAILED_STATUS: u16 = 550;

/// Default cap on a buffered request body (10 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Body sent when authentication fails
pub const AUTH_FAILED_BODY: &str = "auth failed";

/// Configuration for proxy handler
#[derive(Debug, Clone)]
pub struct ProxyHandlerConfig {
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Deadline for one whole upstream exchange
    pub timeout: Duration,
    /// Dump inbound requests at debug level
    pub debug_dump: bool,
    /// Largest inbound body buffered for replay
    pub max_body_bytes: usize,
}

impl ProxyHandlerConfig {
    /// Total attempts allowed per request
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

impl Default for ProxyHandlerConfig {
    fn default() -> Self {
        Self {
            retry_count: 2,
            timeout: Duration::from_secs(30),
            debug_dump: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&ProxyServerConfig> for ProxyHandlerConfig {
    fn from(config: &ProxyServerConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            timeout: Duration::from_secs(config.timeout_secs),
            debug_dump: config.debug_dump,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// How the retry loop ended
pub enum ForwardExit {
    /// An upstream answered; its response is relayed as-is
    Succeeded {
        response: Response<GatewayBody>,
        attempts: u32,
    },
    /// Every allowed attempt failed
    Exhausted { attempts: u32 },
    /// The pool could not hand out a proxy
    ProxyUnavailable { attempts: u32 },
}

impl ForwardExit {
    pub fn attempts(&self) -> u32 {
        match self {
            ForwardExit::Succeeded { attempts, .. }
            | ForwardExit::Exhausted { attempts }
            | ForwardExit::ProxyUnavailable { attempts } => *attempts,
        }
    }
}

enum ForwardState {
    SelectingProxy,
    Executing(Arc<UpstreamProxy>),
    Done(ForwardExit),
}

/// Inbound request reduced to what every attempt replays
struct ForwardTemplate {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl ForwardTemplate {
    fn to_request(&self) -> ForwardRequest {
        let mut req = Request::new(Full::new(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.headers_mut() = self.headers.clone();
        req
    }
}

/// Proxy request handler
pub struct ProxyHandler {
    pool: Arc<dyn ProxyPool>,
    auth: Arc<dyn AuthStore>,
    transport: Arc<dyn TransportFactory>,
    context: Arc<GatewayContext>,
    config: ProxyHandlerConfig,
}

impl ProxyHandler {
    pub fn new(
        pool: Arc<dyn ProxyPool>,
        auth: Arc<dyn AuthStore>,
        transport: Arc<dyn TransportFactory>,
        context: Arc<GatewayContext>,
        config: ProxyHandlerConfig,
    ) -> Self {
        Self {
            pool,
            auth,
            transport,
            context,
            config,
        }
    }

    /// Handle an incoming proxy request
    #[instrument(skip_all, fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let session_id = self.context.next_session_id();
        let (parts, body) = req.into_parts();
        let mut scope = RequestScope::new(
            RequestLog::new(session_id, &parts.method, &parts.uri),
            self.pool.clone(),
        );

        if self.config.debug_dump {
            debug!(
                session_id = session_id.as_u64(),
                method = %parts.method,
                uri = %parts.uri,
                headers = ?parts.headers,
                "req dump"
            );
        }

        let user = self.auth.extract_user(&parts.headers);
        scope.log.add_entry("uname", &user.name);

        if !self.auth.check_http_auth(&user).await {
            scope.log.add_marker("auth failed");
            return self.synthesized(
                StatusCode::NON_AUTHORITATIVE_INFORMATION,
                AUTH_FAILED_BODY,
                0,
                session_id,
            );
        }

        let uri = match headers::resolve_target_uri(&parts) {
            Ok(uri) => uri,
            Err(e) => {
                scope.log.add_entry("bad_target", &e);
                return self.synthesized(e.status_code(), e.to_string(), 0, session_id);
            }
        };

        let limit = self.config.max_body_bytes;
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                let err = GatewayError::PayloadTooLarge(limit);
                warn!(limit = limit, "Request body exceeded buffer limit");
                scope.log.add_entry("read_body_err", &err);
                return self.synthesized(err.status_code(), err.to_string(), 0, session_id);
            }
            Err(e) => {
                scope.log.add_entry("read_body_err", &e);
                return self.synthesized(
                    StatusCode::BAD_REQUEST,
                    "failed to read request body",
                    0,
                    session_id,
                );
            }
        };

        if self.config.debug_dump {
            debug!(
                session_id = session_id.as_u64(),
                body_len = body.len(),
                body = %String::from_utf8_lossy(&body),
                "req body dump"
            );
        }

        let template = ForwardTemplate {
            method: parts.method,
            uri,
            headers: headers::sanitize_request_headers(&parts.headers),
            body,
        };

        match self.forward(&template, &mut scope).await {
            ForwardExit::Succeeded { response, attempts } => self.relay(response, attempts, scope),
            exit => {
                let attempts = exit.attempts();
                self.synthesized(
                    all_failed_status(),
                    format!("all failed,try:{}", attempts),
                    attempts,
                    session_id,
                )
            }
        }
    }

    /// Run the select/execute/retry loop until an exit is reached
    async fn forward(&self, request: &ForwardTemplate, scope: &mut RequestScope) -> ForwardExit {
        let session_id = scope.session_id();
        let max_attempts = self.config.max_attempts();
        let mut attempts = 0;
        let mut state = ForwardState::SelectingProxy;

        loop {
            state = match state {
                ForwardState::SelectingProxy if attempts >= max_attempts => {
                    ForwardState::Done(ForwardExit::Exhausted { attempts })
                }
                ForwardState::SelectingProxy => {
                    scope.log.add_entry("try_no", attempts);
                    match self.pool.get_one_proxy(session_id).await {
                        Ok(proxy) => {
                            scope.log.add_entry("proxy", proxy.display_url());
                            scope.log.add_entry("proxy_used", proxy.used());
                            ForwardState::Executing(proxy)
                        }
                        Err(e) => {
                            warn!("No proxy available: {}", e);
                            scope.log.add_entry("get_proxy_failed", &e);
                            scope.log.flush();
                            ForwardState::Done(ForwardExit::ProxyUnavailable { attempts })
                        }
                    }
                }
                ForwardState::Executing(proxy) => {
                    attempts += 1;
                    debug!(
                        "Forwarding request through proxy {} (attempt {}/{})",
                        proxy.display_url(),
                        attempts,
                        max_attempts
                    );

                    match self.attempt(&proxy, request).await {
                        Ok(response) => {
                            self.pool
                                .mark_proxy_status(&proxy, AttemptOutcome::Success);
                            ForwardState::Done(ForwardExit::Succeeded { response, attempts })
                        }
                        Err(e) => {
                            self.pool
                                .mark_proxy_status(&proxy, AttemptOutcome::TransportFailure);
                            warn!(
                                "Request through {} failed: {} (attempt {}/{})",
                                proxy.display_url(),
                                e,
                                attempts,
                                max_attempts
                            );
                            scope.log.add_entry("failed", &e);
                            if attempts == max_attempts {
                                scope.log.add_marker("all failed");
                            }
                            scope.log.flush();
                            ForwardState::SelectingProxy
                        }
                    }
                }
                ForwardState::Done(exit) => return exit,
            };
        }
    }

    /// One attempt: build a fresh transport for the proxy and execute
    async fn attempt(
        &self,
        proxy: &UpstreamProxy,
        request: &ForwardTemplate,
    ) -> Result<Response<GatewayBody>> {
        let executor = self.transport.build(&proxy.url, self.config.timeout)?;
        executor.execute(request.to_request()).await
    }

    /// Relay an upstream response; the scope settles when the body is done
    fn relay(
        &self,
        upstream: Response<GatewayBody>,
        attempts: u32,
        mut scope: RequestScope,
    ) -> Response<GatewayBody> {
        let (parts, body) = upstream.into_parts();
        let session_id = scope.session_id();
        scope.log.add_entry("status", parts.status.as_u16());

        let mut response = Response::new(RelayBody::new(body, scope).boxed_unsync());
        *response.status_mut() = parts.status;
        headers::copy_response_headers(response.headers_mut(), &parts.headers);
        self.attach_observability(response.headers_mut(), attempts, session_id);
        response
    }

    /// Gateway-generated response
    fn synthesized(
        &self,
        status: StatusCode,
        message: impl Into<Bytes>,
        attempts: u32,
        session_id: SessionId,
    ) -> Response<GatewayBody> {
        let mut response = Response::new(full_body(message));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        self.attach_observability(response.headers_mut(), attempts, session_id);
        response
    }

    fn attach_observability(&self, headers: &mut HeaderMap, attempts: u32, session_id: SessionId) {
        headers.insert(X_MAN_TRY, HeaderValue::from(attempts));
        headers.insert(X_MAN_TRY_MAX, HeaderValue::from(self.config.max_attempts()));
        headers.insert(X_MAN_ID, HeaderValue::from(session_id.as_u64()));
    }
}

fn all_failed_status() -> StatusCode {
    StatusCode::from_u16(ALL_FAILED_STATUS).unwrap_or(StatusCode::BAD_GATEWAY)
}
