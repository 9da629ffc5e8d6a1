//! Proxy authentication
//!
//! Identifies the client from the Basic `Proxy-Authorization` header and
//! checks it against the configured user table.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hyper::header::{HeaderMap, PROXY_AUTHORIZATION};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Name reported for requests without usable credentials
pub const ANONYMOUS: &str = "-";

/// Identity extracted from an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpUser {
    pub name: String,
    pub password: Option<String>,
}

impl HttpUser {
    pub fn anonymous() -> Self {
        Self {
            name: ANONYMOUS.to_string(),
            password: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.password.is_none()
    }
}

/// Credential store consulted before a request is forwarded
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Pull the user identity out of the request headers
    fn extract_user(&self, headers: &HeaderMap) -> HttpUser;

    /// Whether the user may use the gateway
    async fn check_http_auth(&self, user: &HttpUser) -> bool;
}

/// Basic-auth store backed by a static user table
#[derive(Clone)]
pub struct BasicAuthStore {
    /// Whether authentication is enabled
    enabled: bool,
    /// Username to password
    users: HashMap<String, String>,
}

impl BasicAuthStore {
    /// Create a new auth store
    pub fn new(enabled: bool, users: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            enabled,
            users: users.into_iter().collect(),
        }
    }

    /// Create a store that lets everyone through
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            users: HashMap::new(),
        }
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decode a `Basic <base64>` credential
    pub fn parse_basic(value: &str) -> Result<HttpUser> {
        let encoded = value
            .strip_prefix("Basic ")
            .ok_or(GatewayError::AuthenticationFailed)?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| GatewayError::AuthenticationFailed)?;
        let credentials =
            String::from_utf8(decoded).map_err(|_| GatewayError::AuthenticationFailed)?;
        let (user, pass) = credentials
            .split_once(':')
            .ok_or(GatewayError::AuthenticationFailed)?;

        Ok(HttpUser {
            name: user.to_string(),
            password: Some(pass.to_string()),
        })
    }
}

#[async_trait]
impl AuthStore for BasicAuthStore {
    fn extract_user(&self, headers: &HeaderMap) -> HttpUser {
        let Some(value) = headers.get(PROXY_AUTHORIZATION) else {
            return HttpUser::anonymous();
        };

        value
            .to_str()
            .ok()
            .and_then(|raw| Self::parse_basic(raw).ok())
            .unwrap_or_else(|| {
                warn!("Invalid Proxy-Authorization header, expected Basic");
                HttpUser::anonymous()
            })
    }

    async fn check_http_auth(&self, user: &HttpUser) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(password) = &user.password else {
            return false;
        };

        match self.users.get(&user.name) {
            Some(expected) if expected == password => {
                debug!("Proxy authentication successful for user: {}", user.name);
                true
            }
            _ => {
                warn!("Proxy authentication failed for user: {}", user.name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers_with_auth(auth: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = auth {
            headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn store() -> BasicAuthStore {
        BasicAuthStore::new(true, [("user".to_string(), "pass".to_string())])
    }

    #[tokio::test]
    async fn test_auth_disabled() {
        let auth = BasicAuthStore::disabled();
        let user = auth.extract_user(&headers_with_auth(None));
        assert!(user.is_anonymous());
        assert!(auth.check_http_auth(&user).await);
    }

    #[tokio::test]
    async fn test_auth_missing_header() {
        let auth = store();
        let user = auth.extract_user(&headers_with_auth(None));
        assert_eq!(user.name, ANONYMOUS);
        assert!(!auth.check_http_auth(&user).await);
    }

    #[tokio::test]
    async fn test_auth_valid_credentials() {
        let auth = store();
        let credentials = BASE64.encode(b"user:pass");
        let user = auth.extract_user(&headers_with_auth(Some(&format!("Basic {}", credentials))));
        assert_eq!(user.name, "user");
        assert!(auth.check_http_auth(&user).await);
    }

    #[tokio::test]
    async fn test_auth_invalid_credentials() {
        let auth = store();
        let credentials = BASE64.encode(b"user:wrong");
        let user = auth.extract_user(&headers_with_auth(Some(&format!("Basic {}", credentials))));
        assert_eq!(user.name, "user");
        assert!(!auth.check_http_auth(&user).await);
    }

    #[tokio::test]
    async fn test_auth_invalid_scheme() {
        let auth = store();
        let user = auth.extract_user(&headers_with_auth(Some("Bearer token123")));
        assert!(user.is_anonymous());
        assert!(!auth.check_http_auth(&user).await);
    }

    #[test]
    fn test_parse_basic_password_with_colon() {
        let encoded = BASE64.encode(b"user:pa:ss");
        let user = BasicAuthStore::parse_basic(&format!("Basic {}", encoded)).unwrap();
        assert_eq!(user.password.as_deref(), Some("pa:ss"));
    }
}
