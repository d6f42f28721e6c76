//! REST client for the Kalshi trade API
//!
//! Base URL: https://api.elections.kalshi.com/trade-api/v2
//!
//! # Endpoints
//! - GET /portfolio/balance - Account balance in cents
//! - GET /events - Events (paginated)
//! - GET /events/{ticker} - One event
//! - GET /series/{ticker} - One series
//! - GET /markets - Markets (paginated)
//! - GET /markets/{ticker} - One market
//! - GET /markets/trades - Public trades (paginated)
//!
//! Every call is paced by the [`RateLimiter`] and signed by the
//! [`RequestSigner`]. Non-2xx responses become [`KalshiError::Http`] and
//! are never retried here.

use std::sync::Arc;

use futures::Stream;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::auth::RequestSigner;
use super::limiter::{RateLimiter, RequestKind};
use super::pagination::{decode_record, items_at, PageOptions, MAX_MARKETS_PAGE_SIZE, MAX_TRADES_PAGE_SIZE};
use crate::config::KalshiConfig;
use crate::error::{http_error, KalshiError, Result};
use crate::types::{Event, GetEventsParams, GetMarketsParams, GetTradesParams, Market, Query, QueryParams, Series, Trade};

pub const PORTFOLIO_BALANCE_PATH: &str = "/portfolio/balance";
pub const EVENTS_PATH: &str = "/events";
pub const SERIES_PATH: &str = "/series";
pub const MARKETS_PATH: &str = "/markets";
pub const TRADES_PATH: &str = "/markets/trades";

/// Signed, rate-limited REST client
///
/// Cloning is cheap; clones share the signer and the rate state.
#[derive(Clone)]
pub struct KalshiHttpClient {
    client: Client,
    base_url: String,
    signer: Arc<RequestSigner>,
    limiter: Arc<RateLimiter>,
}

impl KalshiHttpClient {
    /// Build a client, loading and validating credentials eagerly
    pub fn new(config: &KalshiConfig) -> Result<Self> {
        config.validate()?;
        let signer = Arc::new(RequestSigner::from_credentials(&config.credentials)?);
        let limiter = Arc::new(RateLimiter::new(config.read_interval, config.write_interval));
        Self::with_parts(config, signer, limiter)
    }

    /// Build a client around an existing signer and limiter
    pub fn with_parts(
        config: &KalshiConfig,
        signer: Arc<RequestSigner>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KalshiError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string(), signer, limiter })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn signer(&self) -> &Arc<RequestSigner> {
        &self.signer
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| KalshiError::Config(format!("Invalid URL '{}': {}", raw, e)))
    }

    /// Attach fresh auth headers; the signature covers the full URL path
    fn signed(&self, builder: RequestBuilder, method: &str, url: &Url) -> Result<RequestBuilder> {
        let headers = self.signer.sign(method, url.path())?;
        Ok(headers.to_pairs().into_iter().fold(builder, |b, (name, value)| b.header(name, value)))
    }

    /// GET request returning the decoded JSON body
    pub async fn get(&self, path: &str, query: &Query) -> Result<Value> {
        self.limiter.await_slot(RequestKind::Read).await;

        let url = self.url(path)?;
        debug!("GET {} {:?}", url, query);

        let request = self.signed(self.client.get(url.clone()).query(query), "GET", &url)?;
        let response = check_status(request.send().await?).await?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| KalshiError::decode(format!("GET {} body", path), e))
    }

    /// POST a JSON body, returning the raw response
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.limiter.await_slot(RequestKind::Write).await;

        let url = self.url(path)?;
        debug!("POST {}", url);

        let request = self.signed(self.client.post(url.clone()).json(body), "POST", &url)?;
        check_status(request.send().await?).await
    }

    /// GET a single object stored under `key` in the response
    async fn get_one<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<T> {
        let mut body = self.get(path, &Query::new()).await?;
        take_record(&mut body, path, key)
    }

    /// Account balance in cents
    ///
    /// Endpoint: GET /portfolio/balance
    pub async fn get_portfolio_balance(&self) -> Result<i64> {
        let body = self.get(PORTFOLIO_BALANCE_PATH, &Query::new()).await?;
        body.get("balance").and_then(Value::as_i64).ok_or_else(|| {
            KalshiError::decode(format!("GET {}", PORTFOLIO_BALANCE_PATH), "missing integer 'balance'")
        })
    }

    /// Public trades, newest first
    ///
    /// Endpoint: GET /markets/trades (page size <= 1000)
    pub fn get_trades(
        &self,
        params: &GetTradesParams,
        options: PageOptions,
    ) -> Result<impl Stream<Item = Result<Trade>> + Send + 'static> {
        Ok(self.paginate(
            TRADES_PATH,
            params.to_query()?,
            MAX_TRADES_PAGE_SIZE,
            options,
            items_at("trades"),
            decode_record::<Trade>,
        ))
    }

    /// Events matching the filters
    ///
    /// Endpoint: GET /events (page size <= 200)
    pub fn get_events(
        &self,
        params: &GetEventsParams,
        options: PageOptions,
    ) -> Result<impl Stream<Item = Result<Event>> + Send + 'static> {
        Ok(self.paginate(
            EVENTS_PATH,
            params.to_query()?,
            MAX_MARKETS_PAGE_SIZE,
            options,
            items_at("events"),
            decode_record::<Event>,
        ))
    }

    /// Markets matching the filters
    ///
    /// Endpoint: GET /markets (page size <= 200)
    pub fn get_markets(
        &self,
        params: &GetMarketsParams,
        options: PageOptions,
    ) -> Result<impl Stream<Item = Result<Market>> + Send + 'static> {
        Ok(self.paginate(
            MARKETS_PATH,
            params.to_query()?,
            MAX_MARKETS_PAGE_SIZE,
            options,
            items_at("markets"),
            decode_record::<Market>,
        ))
    }

    /// One event and the markets listed beside it
    ///
    /// Endpoint: GET /events/{event_ticker}
    ///
    /// A response without a `markets` array (or with `null`) yields no markets.
    pub async fn get_event(&self, event_ticker: &str) -> Result<(Event, Vec<Market>)> {
        let path = format!("{}/{}", EVENTS_PATH, event_ticker);
        let mut body = self.get(&path, &Query::new()).await?;
        let event = take_record(&mut body, &path, "event")?;

        let markets = match body.get("markets") {
            Some(_) => items_at("markets")(&mut body)?,
            None => Vec::new(),
        };
        let markets = markets.into_iter().map(decode_record).collect::<Result<Vec<Market>>>()?;
        Ok((event, markets))
    }

    /// Endpoint: GET /series/{series_ticker}
    pub async fn get_series(&self, series_ticker: &str) -> Result<Series> {
        self.get_one(&format!("{}/{}", SERIES_PATH, series_ticker), "series").await
    }

    /// Endpoint: GET /markets/{ticker}
    pub async fn get_market(&self, ticker: &str) -> Result<Market> {
        self.get_one(&format!("{}/{}", MARKETS_PATH, ticker), "market").await
    }

    /// Simple connectivity test against an authenticated endpoint
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity to {}", self.base_url);
        let balance = self.get_portfolio_balance().await?;
        info!("Connectivity: OK (balance {} cents)", balance);
        Ok(())
    }
}

impl std::fmt::Debug for KalshiHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiHttpClient")
            .field("base_url", &self.base_url)
            .field("signer", &self.signer)
            .finish()
    }
}

fn take_record<T: DeserializeOwned>(body: &mut Value, path: &str, key: &str) -> Result<T> {
    let item = body
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| KalshiError::decode(format!("GET {}", path), format!("missing '{}'", key)))?;
    decode_record(item)
}

/// Pass 2xx responses through, turn anything else into `Http { status, body }`
async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let err = http_error(response).await;
    debug!("{}", err);
    Err(err)
}
