//! Upstream transports for HTTP and SOCKS5 proxies
//!
//! Every attempt gets its own executor and its own connection; nothing is
//! pooled or reused between attempts.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST, PROXY_AUTHORIZATION};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::models::ProxyScheme;
use crate::proxy::body::{DeadlineBody, GatewayBody};

/// Request shape handed to executors; the body is replayed per attempt
pub type ForwardRequest = Request<Full<Bytes>>;

/// One-shot executor bound to a single upstream proxy
#[async_trait]
pub trait UpstreamExecutor: Send {
    /// Send the request through the upstream and return its response.
    ///
    /// The response body stays subject to the executor's deadline.
    async fn execute(self: Box<Self>, req: ForwardRequest) -> Result<Response<GatewayBody>>;
}

/// Builds executors for upstream proxy URLs
pub trait TransportFactory: Send + Sync {
    fn build(&self, proxy_url: &Url, timeout: Duration) -> Result<Box<dyn UpstreamExecutor>>;
}

/// Factory dialing upstreams with tokio and speaking HTTP/1.1 through hyper
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperTransportFactory;

impl TransportFactory for HyperTransportFactory {
    fn build(&self, proxy_url: &Url, timeout: Duration) -> Result<Box<dyn UpstreamExecutor>> {
        let scheme = ProxyScheme::from_scheme(proxy_url.scheme())?;
        let endpoint = ProxyEndpoint::from_url(proxy_url, scheme)?;

        Ok(match scheme {
            ProxyScheme::Http => Box::new(HttpProxyExecutor { endpoint, timeout }),
            ProxyScheme::Socks5 => Box::new(Socks5Executor { endpoint, timeout }),
        })
    }
}

/// Address and credentials of an upstream proxy
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProxyEndpoint {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl ProxyEndpoint {
    fn from_url(url: &Url, scheme: ProxyScheme) -> Result<Self> {
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
            GatewayError::InvalidProxyAddress(format!("missing host in {}", url))
        })?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let username = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };

        let password = match (scheme, &username, url.password()) {
            (_, None, _) => None,
            (ProxyScheme::Http, Some(_), p) => Some(p.unwrap_or("").to_string()),
            (ProxyScheme::Socks5, Some(_), Some(p)) if !p.is_empty() => Some(p.to_string()),
            (ProxyScheme::Socks5, Some(_), _) => {
                return Err(GatewayError::InvalidProxyAddress(
                    "socks5 auth requires a non-empty password".into(),
                ))
            }
        };

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            username,
            password,
        })
    }

    fn addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    fn basic_auth(&self) -> Option<HeaderValue> {
        let username = self.username.as_ref()?;
        let password = self.password.as_deref().unwrap_or("");
        let encoded = BASE64.encode(format!("{}:{}", username, password));
        HeaderValue::from_str(&format!("Basic {}", encoded)).ok()
    }
}

/// Sends absolute-form requests to an HTTP forward proxy
struct HttpProxyExecutor {
    endpoint: ProxyEndpoint,
    timeout: Duration,
}

impl HttpProxyExecutor {
    async fn send(&self, mut req: ForwardRequest) -> Result<Response<Incoming>> {
        debug!("Connecting to HTTP proxy at {}:{}", self.endpoint.host, self.endpoint.port);

        let stream = TcpStream::connect(self.endpoint.addr())
            .await
            .map_err(|e| GatewayError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        if let Some(auth) = self.endpoint.basic_auth() {
            req.headers_mut().insert(PROXY_AUTHORIZATION, auth);
        }
        ensure_host_header(&mut req)?;

        send_over(stream, req).await
    }
}

#[async_trait]
impl UpstreamExecutor for HttpProxyExecutor {
    #[instrument(skip_all, fields(proxy = %self.endpoint.host, uri = %req.uri()))]
    async fn execute(self: Box<Self>, req: ForwardRequest) -> Result<Response<GatewayBody>> {
        let deadline = Instant::now() + self.timeout;
        let response = tokio::time::timeout_at(deadline, self.send(req))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        Ok(with_deadline(response, deadline))
    }
}

/// Tunnels requests through a SOCKS5 proxy to the origin
struct Socks5Executor {
    endpoint: ProxyEndpoint,
    timeout: Duration,
}

impl Socks5Executor {
    async fn send(&self, mut req: ForwardRequest) -> Result<Response<Incoming>> {
        let (target_host, target_port) = target_addr(req.uri())?;
        debug!(
            "Connecting to SOCKS5 proxy at {}:{} for {}:{}",
            self.endpoint.host, self.endpoint.port, target_host, target_port
        );

        let stream = dial_socks5(&self.endpoint, &target_host, target_port)
            .await
            .map_err(|e| {
                GatewayError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e))
            })?;

        ensure_host_header(&mut req)?;
        let path = origin_form(req.uri())?;
        *req.uri_mut() = path;

        send_over(stream, req).await
    }
}

#[async_trait]
impl UpstreamExecutor for Socks5Executor {
    #[instrument(skip_all, fields(proxy = %self.endpoint.host, uri = %req.uri()))]
    async fn execute(self: Box<Self>, req: ForwardRequest) -> Result<Response<GatewayBody>> {
        let deadline = Instant::now() + self.timeout;
        let response = tokio::time::timeout_at(deadline, self.send(req))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        Ok(with_deadline(response, deadline))
    }
}

async fn dial_socks5(
    proxy: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let socket = TcpStream::connect(proxy.addr()).await?;

    let stream = match (&proxy.username, &proxy.password) {
        (Some(username), Some(password)) => {
            Socks5Stream::connect_with_password_and_socket(
                socket,
                (target_host, target_port),
                username,
                password,
            )
            .await?
        }
        _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await?,
    };

    Ok(stream.into_inner())
}

/// Run one HTTP/1.1 exchange over an established stream
async fn send_over<S>(stream: S, req: ForwardRequest) -> Result<Response<Incoming>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| GatewayError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection ended: {}", e);
        }
    });

    sender
        .send_request(req)
        .await
        .map_err(|e| GatewayError::ProxyConnectionFailed(format!("Request failed: {}", e)))
}

fn with_deadline(response: Response<Incoming>, deadline: Instant) -> Response<GatewayBody> {
    response.map(|body| DeadlineBody::new(body, deadline).boxed_unsync())
}

/// Parse host and port from an absolute target URI
fn target_addr(uri: &Uri) -> Result<(String, u16)> {
    let host = uri
        .host()
        .ok_or_else(|| GatewayError::InvalidRequest("Missing host in URI".to_string()))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    Ok((host.to_string(), uri.port_u16().unwrap_or(80)))
}

fn origin_form(uri: &Uri) -> Result<Uri> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    path.parse()
        .map_err(|e| GatewayError::InvalidRequest(format!("Failed to parse URI: {}", e)))
}

fn ensure_host_header(req: &mut ForwardRequest) -> Result<()> {
    if req.headers().contains_key(HOST) {
        return Ok(());
    }
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| GatewayError::InvalidRequest("Missing host in URI".to_string()))?
        .as_str()
        .to_string();
    let value = HeaderValue::from_str(&authority)
        .map_err(|_| GatewayError::InvalidRequest("Invalid Host header".to_string()))?;
    req.headers_mut().insert(HOST, value);
    Ok(())
}
