//! WebSocket client for Kalshi push updates
//!
//! Endpoint: wss://api.elections.kalshi.com/trade-api/ws/v2
//!
//! # Lifecycle
//! - The handshake carries one set of signed headers, generated at
//!   connect time for `GET /trade-api/ws/v2`
//! - The first outbound frame is a `subscribe` command
//! - Inbound text frames go to the handler in arrival order
//! - An error or close is terminal; reconnecting is up to the caller

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::auth::RequestSigner;
use crate::config::KalshiConfig;
use crate::error::{KalshiError, Result};
use crate::types::SubscribeCommand;
use crate::WS_PATH;

/// Idle time after which a keepalive ping is sent
const KEEPALIVE_SECS: u64 = 30;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close frame details reported by the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Listener for connection events
///
/// Callbacks run on the connection task; blocking here stalls delivery.
pub trait StreamHandler {
    fn on_open(&mut self) {}

    fn on_message(&mut self, text: &str);

    fn on_error(&mut self, _error: &KalshiError) {}

    fn on_close(&mut self, _close: Option<CloseInfo>) {}
}

/// Connection event, as delivered by [`ChannelHandler`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Message(String),
    Error(String),
    Closed(Option<CloseInfo>),
}

/// Forwards every callback into an unbounded channel
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: StreamEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl StreamHandler for ChannelHandler {
    fn on_open(&mut self) {
        self.emit(StreamEvent::Opened);
    }

    fn on_message(&mut self, text: &str) {
        self.emit(StreamEvent::Message(text.to_string()));
    }

    fn on_error(&mut self, error: &KalshiError) {
        self.emit(StreamEvent::Error(error.to_string()));
    }

    fn on_close(&mut self, close: Option<CloseInfo>) {
        self.emit(StreamEvent::Closed(close));
    }
}

/// Authenticated push-update client
pub struct KalshiWsClient {
    endpoint: String,
    signer: Arc<RequestSigner>,
    channels: Vec<String>,
    market_tickers: Option<Vec<String>>,
    next_message_id: u64,
}

impl KalshiWsClient {
    /// Create a client for the configured environment, subscribing to `ticker`
    pub fn new(config: &KalshiConfig) -> Result<Self> {
        config.validate()?;
        let signer = Arc::new(RequestSigner::from_credentials(&config.credentials)?);
        Ok(Self::with_signer(&config.ws_base_url, signer))
    }

    /// Create with an existing signer (e.g. shared with the REST client)
    pub fn with_signer(ws_base_url: &str, signer: Arc<RequestSigner>) -> Self {
        Self {
            endpoint: format!("{}{}", ws_base_url.trim_end_matches('/'), WS_PATH),
            signer,
            channels: vec!["ticker".to_string()],
            market_tickers: None,
            next_message_id: 1,
        }
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_market_tickers(mut self, market_tickers: Vec<String>) -> Self {
        self.market_tickers = Some(market_tickers);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the next subscribe command; ids increase per client
    fn next_subscribe_command(&mut self) -> SubscribeCommand {
        let id = self.next_message_id;
        self.next_message_id += 1;
        SubscribeCommand::subscribe(id, self.channels.clone(), self.market_tickers.clone())
    }

    /// Connect, subscribe and dispatch messages until the connection ends
    ///
    /// Returns `Ok(())` on a clean close. Any failure is reported to
    /// `handler.on_error`, followed by `handler.on_close(None)`, and
    /// returned as the error.
    pub async fn connect<H: StreamHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let ws_stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Connection failed: {}", e);
                return Err(fail(handler, e));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        handler.on_open();
        self.run_session(&mut write, &mut read, handler).await
    }

    /// Subscribe, then read until the connection ends
    async fn run_session<W, R, H>(&mut self, write: &mut W, read: &mut R, handler: &mut H) -> Result<()>
    where
        W: Sink<Message, Error = WsError> + Unpin,
        R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
        H: StreamHandler + ?Sized,
    {
        let command = self.next_subscribe_command();
        let command_json = match serde_json::to_string(&command) {
            Ok(json) => json,
            Err(e) => return Err(fail(handler, e.into())),
        };
        info!("Subscribing to {:?} (id {})", command.params.channels, command.id);
        debug!("Subscribe request: {}", command_json);

        if let Err(e) = write.send(Message::Text(command_json.into())).await {
            return Err(fail(handler, e.into()));
        }

        loop {
            let msg = tokio::time::timeout(Duration::from_secs(KEEPALIVE_SECS), read.next()).await;

            match msg {
                Ok(Some(Ok(Message::Text(text)))) => {
                    handler.on_message(text.as_str());
                }
                Ok(Some(Ok(Message::Ping(data)))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        return Err(fail(handler, e.into()));
                    }
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    info!("Server closed connection: {:?}", frame);
                    let close = frame.map(|f| CloseInfo { code: u16::from(f.code), reason: f.reason.to_string() });
                    handler.on_close(close);
                    return Ok(());
                }
                Ok(Some(Ok(_))) => {
                    // Binary, pong and raw frames carry nothing for us
                }
                Ok(Some(Err(e))) => {
                    return Err(fail(handler, e.into()));
                }
                Ok(None) => {
                    info!("WebSocket stream ended");
                    handler.on_close(None);
                    return Ok(());
                }
                Err(_) => {
                    debug!("Read timeout, sending ping");
                    if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                        return Err(fail(handler, e.into()));
                    }
                }
            }
        }
    }

    /// Perform the signed handshake
    async fn open(&self) -> Result<WsStream> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| KalshiError::Config(format!("Invalid WebSocket URL '{}': {}", self.endpoint, e)))?;
        let headers = self.signer.sign("GET", url.path())?;

        let mut request = self.endpoint.as_str().into_client_request()?;
        for (name, value) in headers.to_pairs() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| KalshiError::Signing(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| KalshiError::Signing(format!("Invalid header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        info!("Connecting to {}", self.endpoint);
        let (ws_stream, response) = connect_async(request).await?;
        debug!("WebSocket connected, status: {}", response.status());

        Ok(ws_stream)
    }
}

fn fail<H: StreamHandler + ?Sized>(handler: &mut H, err: KalshiError) -> KalshiError {
    warn!("WebSocket error: {}", err);
    handler.on_error(&err);
    handler.on_close(None);
    err
}
