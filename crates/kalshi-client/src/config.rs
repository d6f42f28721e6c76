//! Client configuration
//!
//! The client never reads the process environment itself. A
//! [`KalshiConfig`] is built once (explicitly, or with
//! [`KalshiConfig::from_env`]) and handed to the constructors.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KalshiError, Result};
use crate::httpws::auth::{Credentials, PrivateKeySource};
use crate::{DEMO_REST_BASE, DEMO_WSS_BASE, PROD_REST_BASE, PROD_WSS_BASE};

/// Default minimum spacing between two reads (and between two writes)
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_millis(100);

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Exchange environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Demo,
}

impl Environment {
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Prod => PROD_REST_BASE,
            Environment::Demo => DEMO_REST_BASE,
        }
    }

    pub fn ws_base_url(&self) -> &'static str {
        match self {
            Environment::Prod => PROD_WSS_BASE,
            Environment::Demo => DEMO_WSS_BASE,
        }
    }

    /// Parse from string ("prod" / "demo", case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "prod" | "production" => Some(Environment::Prod),
            "demo" => Some(Environment::Demo),
            _ => None,
        }
    }
}

/// Everything a client needs, resolved up front
#[derive(Clone, Debug)]
pub struct KalshiConfig {
    pub environment: Environment,
    /// REST base URL including the API path prefix, e.g. `.../trade-api/v2`
    pub base_url: String,
    /// WebSocket base URL; the streaming path is appended to it
    pub ws_base_url: String,
    pub credentials: Credentials,
    pub read_interval: Duration,
    pub write_interval: Duration,
    pub request_timeout: Duration,
}

impl KalshiConfig {
    /// Config with the environment's default endpoints and intervals
    pub fn new(environment: Environment, credentials: Credentials) -> Self {
        Self {
            environment,
            base_url: environment.rest_base_url().to_string(),
            ws_base_url: environment.ws_base_url().to_string(),
            credentials,
            read_interval: DEFAULT_RATE_INTERVAL,
            write_interval: DEFAULT_RATE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_ws_base_url(mut self, ws_base_url: &str) -> Self {
        self.ws_base_url = ws_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_intervals(mut self, read: Duration, write: Duration) -> Self {
        self.read_interval = read;
        self.write_interval = write;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve a config from environment variables
    ///
    /// - `KALSHI_ENV`: `prod` or `demo` (default: `demo`)
    /// - `KALSHI_KEY_ID`: API key identifier (required)
    /// - `KALSHI_PRIVATE_KEY_PATH`: path to the PEM private key (required)
    /// - `KALSHI_BASE_URL`, `KALSHI_WS_URL`: optional endpoint overrides
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("KALSHI_ENV") {
            Some(value) => Environment::parse(&value).ok_or_else(|| {
                KalshiError::Config(format!("Invalid KALSHI_ENV '{}', expected prod or demo", value))
            })?,
            None => Environment::Demo,
        };

        let key_id = lookup("KALSHI_KEY_ID")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| KalshiError::Config("KALSHI_KEY_ID is not set".to_string()))?;
        let key_path = lookup("KALSHI_PRIVATE_KEY_PATH")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| KalshiError::Config("KALSHI_PRIVATE_KEY_PATH is not set".to_string()))?;

        let credentials = Credentials::new(key_id, PrivateKeySource::File(PathBuf::from(key_path)));
        let mut config = Self::new(environment, credentials);

        if let Some(base_url) = lookup("KALSHI_BASE_URL") {
            config = config.with_base_url(&base_url);
        }
        if let Some(ws_url) = lookup("KALSHI_WS_URL") {
            config = config.with_ws_base_url(&ws_url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on configuration that can never work
    pub fn validate(&self) -> Result<()> {
        if self.credentials.key_id.is_empty() {
            return Err(KalshiError::Config("API key id is empty".to_string()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| KalshiError::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        url::Url::parse(&self.ws_base_url).map_err(|e| {
            KalshiError::Config(format!("Invalid WebSocket URL '{}': {}", self.ws_base_url, e))
        })?;
        Ok(())
    }
}
