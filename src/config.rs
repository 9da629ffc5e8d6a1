use crate::error::{GatewayError, Result};
use crate::proxy::pool::RotationStrategy;
use std::env;
use std::fs;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy server configuration
    pub proxy: ProxyServerConfig,
    /// Proxy authentication
    pub auth: AuthConfig,
    /// Upstream pool configuration
    pub pool: PoolConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the proxy server (default: 8090)
    pub port: u16,
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Whole-exchange timeout in seconds, never zero
    pub timeout_secs: u64,
    /// Dump inbound requests at debug level
    pub debug_dump: bool,
    /// Largest request body buffered for replay, in bytes
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Enable proxy authentication
    pub enabled: bool,
    /// Username/password pairs
    pub users: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Rotation strategy (round_robin, random)
    pub rotation_strategy: RotationStrategy,
    /// Upstream proxy URLs
    pub upstreams: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            proxy: ProxyServerConfig {
                host: get_env_or("GATEWAY_HOST", "0.0.0.0"),
                port: get_env_or("GATEWAY_PORT", "8090").parse().map_err(|_| {
                    GatewayError::InvalidConfig("GATEWAY_PORT must be a valid port number".into())
                })?,
                retry_count: get_env_or("GATEWAY_RETRY_COUNT", "2").parse().map_err(|_| {
                    GatewayError::InvalidConfig(
                        "GATEWAY_RETRY_COUNT must be a non-negative number".into(),
                    )
                })?,
                timeout_secs: parse_timeout(&get_env_or("GATEWAY_TIMEOUT", "30"))?,
                debug_dump: parse_bool(&get_env_or("GATEWAY_DEBUG_DUMP", "false")),
                max_body_bytes: get_env_or("GATEWAY_MAX_BODY_BYTES", "10485760")
                    .parse()
                    .map_err(|_| {
                        GatewayError::InvalidConfig(
                            "GATEWAY_MAX_BODY_BYTES must be a valid number".into(),
                        )
                    })?,
            },
            auth: AuthConfig {
                enabled: parse_bool(&get_env_or("GATEWAY_AUTH_ENABLED", "false")),
                users: parse_users(&get_env_or("GATEWAY_AUTH_USERS", ""))?,
            },
            pool: PoolConfig {
                rotation_strategy: RotationStrategy::from_str(&get_env_or(
                    "GATEWAY_ROTATION_STRATEGY",
                    "round_robin",
                )),
                upstreams: load_upstreams()?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the proxy server address
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }
}

fn parse_timeout(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(GatewayError::InvalidConfig(
            "GATEWAY_TIMEOUT must be a positive number of seconds".into(),
        )),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_users(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(user, pass)| (user.to_string(), pass.to_string()))
                .ok_or_else(|| {
                    GatewayError::InvalidConfig(format!(
                        "GATEWAY_AUTH_USERS entry must be user:pass, got {}",
                        entry
                    ))
                })
        })
        .collect()
}

/// Upstreams from `GATEWAY_UPSTREAMS` followed by `GATEWAY_UPSTREAMS_FILE`
fn load_upstreams() -> Result<Vec<String>> {
    let mut upstreams: Vec<String> = get_env_or("GATEWAY_UPSTREAMS", "")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if let Ok(path) = env::var("GATEWAY_UPSTREAMS_FILE") {
        let contents = fs::read_to_string(&path).map_err(|e| {
            GatewayError::InvalidConfig(format!(
                "GATEWAY_UPSTREAMS_FILE {} could not be read: {}",
                path, e
            ))
        })?;
        upstreams.extend(parse_upstream_lines(&contents));
    }

    for raw in &upstreams {
        // scheme is checked per attempt, not here
        Url::parse(raw).map_err(|e| {
            GatewayError::InvalidConfig(format!("upstream {} must be a valid URL: {}", raw, e))
        })?;
    }

    Ok(upstreams)
}

fn parse_upstream_lines(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "GATEWAY_HOST",
        "GATEWAY_PORT",
        "GATEWAY_RETRY_COUNT",
        "GATEWAY_TIMEOUT",
        "GATEWAY_DEBUG_DUMP",
        "GATEWAY_MAX_BODY_BYTES",
        "GATEWAY_AUTH_ENABLED",
        "GATEWAY_AUTH_USERS",
        "GATEWAY_ROTATION_STRATEGY",
        "GATEWAY_UPSTREAMS",
        "GATEWAY_UPSTREAMS_FILE",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = assert_ok!(Config::from_env());

        assert_eq!(config.proxy_addr(), "0.0.0.0:8090");
        assert_eq!(config.proxy.retry_count, 2);
        assert_eq!(config.proxy.timeout_secs, 30);
        assert!(!config.proxy.debug_dump);
        assert_eq!(config.proxy.max_body_bytes, 10 * 1024 * 1024);
        assert!(!config.auth.enabled);
        assert!(config.auth.users.is_empty());
        assert_eq!(config.pool.rotation_strategy, RotationStrategy::RoundRobin);
        assert!(config.pool.upstreams.is_empty());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("GATEWAY_PORT", "9000");
        env::set_var("GATEWAY_HOST", "127.0.0.1");
        env::set_var("GATEWAY_RETRY_COUNT", "0");
        env::set_var("GATEWAY_TIMEOUT", "5");
        env::set_var("GATEWAY_DEBUG_DUMP", "true");
        env::set_var("GATEWAY_MAX_BODY_BYTES", "2048");
        env::set_var("GATEWAY_AUTH_ENABLED", "true");
        env::set_var("GATEWAY_AUTH_USERS", "alice:secret, bob:pa:ss");
        env::set_var("GATEWAY_ROTATION_STRATEGY", "random");
        env::set_var(
            "GATEWAY_UPSTREAMS",
            "http://10.0.0.1:3128, socks5://u:p@10.0.0.2:1080",
        );

        let config = assert_ok!(Config::from_env());

        assert_eq!(config.proxy_addr(), "127.0.0.1:9000");
        assert_eq!(config.proxy.retry_count, 0);
        assert_eq!(config.proxy.timeout_secs, 5);
        assert!(config.proxy.debug_dump);
        assert_eq!(config.proxy.max_body_bytes, 2048);
        assert!(config.auth.enabled);
        assert_eq!(
            config.auth.users,
            vec![
                ("alice".to_string(), "secret".to_string()),
                ("bob".to_string(), "pa:ss".to_string()),
            ]
        );
        assert_eq!(config.pool.rotation_strategy, RotationStrategy::Random);
        assert_eq!(
            config.pool.upstreams,
            vec!["http://10.0.0.1:3128", "socks5://u:p@10.0.0.2:1080"]
        );
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("GATEWAY_TIMEOUT", "0");
        assert!(matches!(
            Config::from_env(),
            Err(GatewayError::InvalidConfig(_))
        ));

        env::set_var("GATEWAY_TIMEOUT", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(GatewayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_malformed_user() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("GATEWAY_AUTH_USERS", "alice");
        let err = assert_err!(Config::from_env());
        assert!(err.to_string().contains("user:pass"));
    }

    #[test]
    fn test_config_upstream_scheme_not_validated() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("GATEWAY_UPSTREAMS", "ftp://10.0.0.1:21");
        let config = assert_ok!(Config::from_env());
        assert_eq!(config.pool.upstreams, vec!["ftp://10.0.0.1:21"]);

        env::set_var("GATEWAY_UPSTREAMS", "not a url");
        assert!(matches!(
            Config::from_env(),
            Err(GatewayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_upstreams_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let path = env::temp_dir().join(format!("proxyman-upstreams-{}.txt", std::process::id()));
        fs::write(
            &path,
            "# pool\nhttp://10.0.0.3:3128\n\n  socks5://10.0.0.4:1080  \n",
        )
        .unwrap();

        env::set_var("GATEWAY_UPSTREAMS", "http://10.0.0.1:3128");
        env::set_var("GATEWAY_UPSTREAMS_FILE", &path);
        let config = assert_ok!(Config::from_env());
        fs::remove_file(&path).unwrap();

        assert_eq!(
            config.pool.upstreams,
            vec![
                "http://10.0.0.1:3128",
                "http://10.0.0.3:3128",
                "socks5://10.0.0.4:1080",
            ]
        );
    }

    #[test]
    fn test_config_missing_upstreams_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("GATEWAY_UPSTREAMS_FILE", "/nonexistent/proxyman/upstreams.txt");
        assert!(matches!(
            Config::from_env(),
            Err(GatewayError::InvalidConfig(_))
        ));
    }
}
