//! Error taxonomy for the Kalshi client
//!
//! Every fallible operation returns [`Result`]. Nothing is retried inside
//! the client: HTTP failures, signing failures and decode failures all
//! propagate to the direct caller, which owns the retry policy.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, KalshiError>;

/// Errors raised by the Kalshi client
#[derive(Debug, Error)]
pub enum KalshiError {
    /// Missing or invalid configuration (credentials, endpoints).
    /// Raised at construction, never recovered automatically.
    #[error("configuration error: {0}")]
    Config(String),

    /// Private key could not be parsed or the sign operation failed
    #[error("signing error: {0}")]
    Signing(String),

    /// Non-2xx response, status and body passed through unmodified
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, timeout or other transport-level failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response (or one item of a page) did not match its target shape
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    /// Failure on the streaming connection
    #[error("stream error: {0}")]
    Stream(String),

    /// Outbound payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KalshiError {
    pub(crate) fn decode(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        KalshiError::Decode { what: what.into(), message: message.to_string() }
    }

    /// HTTP status code, if this is an HTTP error
    pub fn status(&self) -> Option<u16> {
        match self {
            KalshiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Build an `Http` error from a non-2xx response
///
/// A body that cannot be read still yields the status; the read failure
/// takes the body's place.
pub(crate) async fn http_error(response: reqwest::Response) -> KalshiError {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("<failed to read body: {}>", e),
    };
    KalshiError::Http { status, body }
}

impl From<tokio_tungstenite::tungstenite::Error> for KalshiError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        KalshiError::Stream(err.to_string())
    }
}
