//! HTTP/WebSocket backend implementation
//!
//! Custom implementation using reqwest + tokio-tungstenite.
//! Every REST call and the WebSocket handshake are signed with the
//! account's RSA key and paced by a shared [`RateLimiter`].

pub mod auth;
pub mod limiter;
pub mod pagination;
pub mod rest;
pub mod ws;

pub use auth::*;
pub use limiter::*;
pub use pagination::{PageOptions, MAX_MARKETS_PAGE_SIZE, MAX_TRADES_PAGE_SIZE};
pub use rest::*;
pub use ws::*;
