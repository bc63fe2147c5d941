use std::env;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Connection options shared by clients and pools.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// How long a TCP connect may take before it counts as failed.
    pub connect_timeout: Duration,
    /// Delay before a dropped connection is dialed again. `None` disables
    /// reconnecting entirely.
    pub auto_reconnect_after: Option<Duration>,
    /// When true, a pipeline that opens with MULTI gets an EXEC appended at
    /// send time if the caller did not add one.
    pub auto_close_transaction: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(15),
            auto_reconnect_after: Some(Duration::from_secs(3)),
            auto_close_transaction: true,
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Config {
        Config {
            host: host.into(),
            port,
            ..Config::default()
        }
    }

    /// Reads `REDIS_HOST` and `REDIS_PORT`, falling back to the defaults for
    /// anything absent or unparsable.
    pub fn from_env() -> Config {
        let host = env::var("REDIS_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("REDIS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Config::new(host, port)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reads `REDIS_POOL_SIZE`, falling back to the default.
pub fn pool_size_from_env() -> usize {
    env::var("REDIS_POOL_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_POOL_SIZE)
}
