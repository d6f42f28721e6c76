//! Kalshi Trade API Client
//!
//! - `httpws`: signed REST client, request pacing, cursor pagination and
//!   the authenticated WebSocket stream
//! - `notify`: SMS delivery through Twilio
//!
//! # Official Documentation
//! - API Keys: https://trading-api.readme.io/reference/api-keys
//! - Pagination: https://trading-api.readme.io/reference/pagination
//! - WebSockets: https://trading-api.readme.io/reference/introduction-1

pub mod error;
pub mod types;

#[cfg(feature = "httpws")]
pub mod config;

#[cfg(feature = "httpws")]
pub mod httpws;

#[cfg(feature = "notify")]
pub mod notify;

pub use error::{KalshiError, Result};
pub use types::*;

#[cfg(feature = "httpws")]
pub use config::{Environment, KalshiConfig};

#[cfg(feature = "httpws")]
pub use httpws::{
    ChannelHandler, CloseInfo, Credentials, KalshiHttpClient, KalshiWsClient, PageOptions, PrivateKeySource,
    RequestSigner, SignedHeaders, StreamEvent, StreamHandler,
};

/// Production REST API base URL
pub const PROD_REST_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// Demo environment REST API base URL
pub const DEMO_REST_BASE: &str = "https://demo-api.kalshi.co/trade-api/v2";

/// Production WebSocket host
pub const PROD_WSS_BASE: &str = "wss://api.elections.kalshi.com";

/// Demo environment WebSocket host
pub const DEMO_WSS_BASE: &str = "wss://demo-api.kalshi.co";

/// WebSocket path, appended to the host and covered by the handshake signature
pub const WS_PATH: &str = "/trade-api/ws/v2";
