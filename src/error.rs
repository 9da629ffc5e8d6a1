use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Authentication errors
    #[error("Authentication failed")]
    AuthenticationFailed,

    // Pool errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    // Transport errors
    #[error("Unknown proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    // Response streaming errors
    #[error("Stream error: {0}")]
    Stream(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            GatewayError::InvalidRequest(_) | GatewayError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            // 407 Proxy Authentication Required
            GatewayError::AuthenticationFailed => StatusCode::PROXY_AUTHENTICATION_REQUIRED,

            // 502 Bad Gateway
            GatewayError::UnsupportedScheme(_)
            | GatewayError::InvalidProxyAddress(_)
            | GatewayError::ProxyConnectionFailed(_)
            | GatewayError::Stream(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            GatewayError::NoProxiesAvailable => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 413 Payload Too Large
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,

            // 500 Internal Server Error
            GatewayError::Io(_) | GatewayError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Convert from hyper errors
impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidProxyAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            GatewayError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::UnsupportedScheme("ftp".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::NoProxiesAvailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::PayloadTooLarge(16).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_unsupported_scheme_message() {
        let err = GatewayError::UnsupportedScheme("ftp".to_string());
        assert_eq!(err.to_string(), "Unknown proxy scheme: ftp");
    }
}
