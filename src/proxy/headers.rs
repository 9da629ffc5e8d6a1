//! Header hygiene for forwarded requests and relayed responses

use hyper::header::{HeaderMap, HeaderName, CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHORIZATION};
use hyper::http::request::Parts;
use hyper::Uri;

use crate::error::{GatewayError, Result};

/// Non-standard header, stripped before forwarding
pub const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Attempts consumed by the request
pub const X_MAN_TRY: HeaderName = HeaderName::from_static("x-man-try");
/// Configured attempt bound
pub const X_MAN_TRY_MAX: HeaderName = HeaderName::from_static("x-man-try-max");
/// Session id of the request
pub const X_MAN_ID: HeaderName = HeaderName::from_static("x-man-id");

/// Response headers starting with this prefix are never relayed.
/// Header names are normalised to lowercase by the http crate.
const PROXY_PREFIX: &str = "proxy-";

/// Headers to forward upstream: the inbound set minus connection-scoped ones
/// and the credentials the gateway consumed itself.
pub fn sanitize_request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(CONNECTION);
    headers.remove(PROXY_CONNECTION);
    headers.remove(PROXY_AUTHORIZATION);
    headers
}

/// Headers to relay to the client for an upstream response.
///
/// Drops `Content-Length`, `Connection` and every `Proxy-*` header; all
/// other entries, including repeated values, are kept.
pub fn sanitize_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if name == CONTENT_LENGTH || name == CONNECTION {
            continue;
        }
        if name.as_str().starts_with(PROXY_PREFIX) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Replace everything in `dst` with the sanitized upstream headers
pub fn copy_response_headers(dst: &mut HeaderMap, upstream: &HeaderMap) {
    *dst = sanitize_response_headers(upstream);
}

/// Resolve the absolute `http` URI a forward-proxy request targets.
///
/// Accepts absolute-form, or origin-form with a `Host` header.
pub fn resolve_target_uri(parts: &Parts) -> Result<Uri> {
    let uri = &parts.uri;

    if let Some(scheme) = uri.scheme_str() {
        if scheme != "http" {
            return Err(GatewayError::InvalidRequest(format!(
                "unsupported target scheme: {}",
                scheme
            )));
        }
        if uri.host().is_none() {
            return Err(GatewayError::InvalidRequest("Missing host in URI".to_string()));
        }
        return Ok(uri.clone());
    }

    // CONNECT and friends carry only an authority
    if uri.path_and_query().is_none() {
        return Err(GatewayError::InvalidRequest(format!(
            "unsupported request target: {}",
            uri
        )));
    }

    let host = parts
        .headers
        .get(HOST)
        .ok_or_else(|| GatewayError::InvalidRequest("Missing host in URI".to_string()))?
        .to_str()
        .map_err(|_| GatewayError::InvalidRequest("Invalid Host header".to_string()))?;

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{}{}", host, path)
        .parse()
        .map_err(|e| GatewayError::InvalidRequest(format!("Failed to parse URI: {}", e)))
}
