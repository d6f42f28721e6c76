//! Protocol types for the Kalshi trade API
//!
//! # Design Principles
//! 1. Query parameter sets serialize to a flat string map; unset fields are
//!    omitted from the wire entirely
//! 2. Record types fail loudly on a missing or mistyped required field
//! 3. Known types preserve unrecognized fields in `#[serde(flatten)] extra`
//! 4. Unknown WebSocket message types fall back to `Unknown { raw }`

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Result;

// ============================================================================
// Query Parameters
// ============================================================================

/// Wire form of a query parameter set
pub type Query = BTreeMap<String, String>;

/// A typed query parameter set
///
/// Encoding rules: enums use their string value, lists are comma-joined,
/// timestamps are integer seconds, unset fields are dropped.
pub trait QueryParams: Serialize {
    fn to_query(&self) -> Result<Query> {
        let Value::Object(fields) = serde_json::to_value(self)? else {
            return Err(<serde_json::Error as serde::ser::Error>::custom(
                "query parameters must serialize to an object",
            )
            .into());
        };

        let mut query = Query::new();
        for (key, value) in fields {
            let encoded = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            query.insert(key, encoded);
        }
        Ok(query)
    }
}

fn serialize_comma_joined<S>(values: &Option<Vec<String>>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match values {
        Some(values) => serializer.serialize_str(&values.join(",")),
        None => serializer.serialize_none(),
    }
}

/// Market lifecycle status used as a filter
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Closed,
    Unopened,
    Settled,
}

impl MarketStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(MarketStatus::Open),
            "closed" => Some(MarketStatus::Closed),
            "unopened" => Some(MarketStatus::Unopened),
            "settled" => Some(MarketStatus::Settled),
            _ => None,
        }
    }
}

/// Filters for GET /markets
#[derive(Clone, Debug, Default, Serialize)]
pub struct GetMarketsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MarketStatus>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_comma_joined")]
    pub tickers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "chrono::serde::ts_seconds_option")]
    pub max_close_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "chrono::serde::ts_seconds_option")]
    pub min_close_ts: Option<DateTime<Utc>>,
}

impl QueryParams for GetMarketsParams {}

/// Filters for GET /events
#[derive(Clone, Debug, Default, Serialize)]
pub struct GetEventsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MarketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_nested_markets: Option<bool>,
}

impl QueryParams for GetEventsParams {}

/// Filters for GET /markets/trades
#[derive(Clone, Debug, Default, Serialize)]
pub struct GetTradesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", with = "chrono::serde::ts_seconds_option")]
    pub min_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "chrono::serde::ts_seconds_option")]
    pub max_ts: Option<DateTime<Utc>>,
}

impl GetTradesParams {
    pub fn for_ticker(ticker: impl Into<String>) -> Self {
        Self { ticker: Some(ticker.into()), ..Self::default() }
    }
}

impl QueryParams for GetTradesParams {}

// ============================================================================
// Records
// ============================================================================

/// Treats `""` (and `null`) as absent before decoding the inner type
fn empty_string_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Contract side
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

/// A public trade from GET /markets/trades
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub trade_id: String,
    pub ticker: String,
    /// Number of contracts
    pub count: i64,
    pub created_time: DateTime<Utc>,
    /// Prices in cents
    pub yes_price: i64,
    pub no_price: i64,
    pub taker_side: Side,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Binary,
    Scalar,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketResult {
    Yes,
    No,
    Void,
    AllNo,
    AllYes,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrikeType {
    Unknown,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    Between,
    Functional,
    Custom,
}

/// A market from GET /markets or GET /markets/{ticker}
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Market {
    pub can_close_early: bool,
    pub category: String,
    pub close_time: DateTime<Utc>,
    pub event_ticker: String,
    pub expiration_time: DateTime<Utc>,
    pub last_price: i64,
    pub latest_expiration_time: DateTime<Utc>,
    pub liquidity: i64,
    pub market_type: MarketType,
    pub no_ask: i64,
    pub no_bid: i64,
    pub no_sub_title: String,
    pub notional_value: i64,
    pub open_interest: i64,
    pub open_time: DateTime<Utc>,
    pub previous_price: i64,
    pub previous_yes_ask: i64,
    pub previous_yes_bid: i64,
    pub response_price_units: String,
    pub risk_limit_cents: i64,
    pub rules_primary: String,
    pub rules_secondary: String,
    pub settlement_timer_seconds: i64,
    pub status: String,
    pub tick_size: i64,
    pub ticker: String,
    pub title: String,
    pub volume: i64,
    pub volume_24h: i64,
    pub yes_ask: i64,
    pub yes_bid: i64,
    pub yes_sub_title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_strike: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_strike: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_waiver_expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_strike: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_strike: Option<String>,
    /// The API reports an unsettled market's result as ""
    #[serde(default, deserialize_with = "empty_string_as_none", skip_serializing_if = "Option::is_none")]
    pub result: Option<MarketResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none", skip_serializing_if = "Option::is_none")]
    pub strike_type: Option<StrikeType>,

    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An event from GET /events or GET /events/{ticker}
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_ticker: String,
    pub series_ticker: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub mutually_exclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike_period: Option<String>,
    /// Extra fields (including nested markets when requested)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A series from GET /series/{ticker}
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Series {
    pub ticker: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// WebSocket Commands (Outbound)
// ============================================================================

/// Parameters of a subscribe command
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeParams {
    pub channels: Vec<String>,
    /// Restrict market channels to these tickers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_tickers: Option<Vec<String>>,
}

/// `{"id": n, "cmd": "subscribe", "params": {...}}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeCommand {
    pub id: u64,
    pub cmd: String,
    pub params: SubscribeParams,
}

impl SubscribeCommand {
    pub fn subscribe(id: u64, channels: Vec<String>, market_tickers: Option<Vec<String>>) -> Self {
        Self { id, cmd: "subscribe".to_string(), params: SubscribeParams { channels, market_tickers } }
    }
}

// ============================================================================
// WebSocket Inbound Messages (from server)
// ============================================================================

/// Inbound WebSocket message - parsed with fallback to Unknown
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsInboundMessage {
    /// Successfully parsed message
    Kalshi(KalshiMessage),
    /// Unknown or unparseable message - raw JSON preserved
    Unknown(UnknownMessage),
}

/// Unknown message container - preserves raw JSON
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnknownMessage {
    pub raw: Value,
}

/// Known message types, tagged by `type`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KalshiMessage {
    /// Subscription acknowledged
    Subscribed(SubscribedMessage),
    /// Market ticker update
    Ticker(TickerMessage),
    /// Command rejected
    Error(ErrorMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribedMessage {
    /// Id of the command being acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub msg: SubscribedBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribedBody {
    pub channel: String,
    /// Subscription id
    pub sid: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickerMessage {
    pub sid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub msg: TickerBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickerBody {
    pub market_ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yes_bid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yes_ask: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<i64>,
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub msg: ErrorBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub msg: String,
}

impl WsInboundMessage {
    /// Try to parse a JSON string into a WsInboundMessage
    /// Never panics - falls back to Unknown on parse failure
    pub fn parse(json_str: &str) -> Self {
        let raw: Value = match serde_json::from_str(json_str) {
            Ok(v) => v,
            Err(_) => {
                return WsInboundMessage::Unknown(UnknownMessage {
                    raw: Value::String(json_str.to_string()),
                });
            }
        };

        if let Some("subscribed" | "ticker" | "error") = raw.get("type").and_then(|v| v.as_str()) {
            if let Ok(msg) = serde_json::from_value::<KalshiMessage>(raw.clone()) {
                return WsInboundMessage::Kalshi(msg);
            }
        }

        WsInboundMessage::Unknown(UnknownMessage { raw })
    }

    /// Get the message type string if available
    pub fn message_type(&self) -> Option<&str> {
        match self {
            WsInboundMessage::Kalshi(KalshiMessage::Subscribed(_)) => Some("subscribed"),
            WsInboundMessage::Kalshi(KalshiMessage::Ticker(_)) => Some("ticker"),
            WsInboundMessage::Kalshi(KalshiMessage::Error(_)) => Some("error"),
            WsInboundMessage::Unknown(u) => u.raw.get("type").and_then(|v| v.as_str()),
        }
    }

    /// Check if this is an unknown message type
    pub fn is_unknown(&self) -> bool {
        matches!(self, WsInboundMessage::Unknown(_))
    }
}

// ============================================================================
// Statistics Tracking
// ============================================================================

/// Statistics for message parsing
#[derive(Clone, Debug, Default)]
pub struct MessageStats {
    pub total_messages: u64,
    pub parsed_ok: u64,
    pub unknown_type_count: u64,
    pub type_counts: HashMap<String, u64>,
    pub last_message_type: Option<String>,
}

impl MessageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, msg: &WsInboundMessage) {
        self.total_messages += 1;

        if msg.is_unknown() {
            self.unknown_type_count += 1;
        } else {
            self.parsed_ok += 1;
        }

        let message_type = msg.message_type().unwrap_or("_no_type").to_string();
        *self.type_counts.entry(message_type.clone()).or_insert(0) += 1;
        self.last_message_type = Some(message_type);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value;

    /// A full market record as returned by GET /markets/{ticker}
    pub(crate) fn market_json() -> Value {
        serde_json::json!({
            "can_close_early": true,
            "category": "Economics",
            "close_time": "2024-12-31T23:59:00Z",
            "event_ticker": "FED-24DEC",
            "expiration_time": "2025-01-01T00:00:00Z",
            "last_price": 42,
            "latest_expiration_time": "2025-01-07T00:00:00Z",
            "liquidity": 120000,
            "market_type": "binary",
            "no_ask": 59,
            "no_bid": 57,
            "no_sub_title": "No cut",
            "notional_value": 100,
            "open_interest": 3100,
            "open_time": "2024-11-01T14:00:00Z",
            "previous_price": 40,
            "previous_yes_ask": 44,
            "previous_yes_bid": 39,
            "response_price_units": "usd_cent",
            "risk_limit_cents": 0,
            "rules_primary": "Resolves yes if the target rate is cut.",
            "rules_secondary": "",
            "settlement_timer_seconds": 300,
            "status": "active",
            "tick_size": 1,
            "ticker": "FED-24DEC-T4.50",
            "title": "Fed cut in December?",
            "volume": 52000,
            "volume_24h": 1800,
            "yes_ask": 43,
            "yes_bid": 41,
            "yes_sub_title": "Cut",
            "result": "",
            "strike_type": "less",
            "floor_strike": 4.5,
            "some_new_field": "kept"
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use testing::market_json;

    #[test]
    fn test_market_params_encoding() {
        let params = GetMarketsParams {
            status: Some(MarketStatus::Open),
            tickers: Some(vec!["A".to_string(), "B".to_string()]),
            ..Default::default()
        };

        let query = params.to_query().unwrap();
        let expected: Query = [("status", "open"), ("tickers", "A,B")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(query, expected);
    }

    #[test]
    fn test_unset_params_serialize_to_empty_map() {
        assert!(GetMarketsParams::default().to_query().unwrap().is_empty());
        assert!(GetEventsParams::default().to_query().unwrap().is_empty());
        assert!(GetTradesParams::default().to_query().unwrap().is_empty());
    }

    #[test]
    fn test_timestamps_encode_as_unix_seconds() {
        let params = GetTradesParams {
            min_ts: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..GetTradesParams::for_ticker("FED-24DEC-T4.50")
        };

        let query = params.to_query().unwrap();
        assert_eq!(query.get("ticker").map(String::as_str), Some("FED-24DEC-T4.50"));
        assert_eq!(query.get("min_ts").map(String::as_str), Some("1704067200"));
        assert!(!query.contains_key("max_ts"));
    }

    #[test]
    fn test_bool_param_encoding() {
        let params = GetEventsParams { with_nested_markets: Some(true), ..Default::default() };
        assert_eq!(
            params.to_query().unwrap().get("with_nested_markets").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_market_status_parse() {
        assert_eq!(MarketStatus::parse("OPEN"), Some(MarketStatus::Open));
        assert_eq!(MarketStatus::parse("settled"), Some(MarketStatus::Settled));
        assert_eq!(MarketStatus::parse("frozen"), None);
    }

    #[test]
    fn test_decode_trade() {
        let trade: Trade = serde_json::from_value(serde_json::json!({
            "trade_id": "d91bc706-ee49-470d-82d8-11418bda6fed",
            "ticker": "FED-24DEC-T4.50",
            "count": 10,
            "created_time": "2024-06-01T12:30:00.123Z",
            "yes_price": 41,
            "no_price": 59,
            "taker_side": "yes"
        }))
        .unwrap();

        assert_eq!(trade.count, 10);
        assert_eq!(trade.taker_side, Side::Yes);
        assert_eq!(trade.created_time.timestamp(), 1717245000);
    }

    #[test]
    fn test_decode_trade_missing_required_field_fails() {
        let result = serde_json::from_value::<Trade>(serde_json::json!({
            "trade_id": "abc",
            "count": 1,
            "created_time": "2024-06-01T12:30:00Z",
            "yes_price": 41,
            "no_price": 59,
            "taker_side": "no"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_market_with_empty_result() {
        let market: Market = serde_json::from_value(market_json()).unwrap();

        assert_eq!(market.market_type, MarketType::Binary);
        assert_eq!(market.result, None);
        assert_eq!(market.strike_type, Some(StrikeType::Less));
        assert_eq!(market.floor_strike, Some(4.5));
        assert_eq!(market.extra.get("some_new_field"), Some(&Value::String("kept".into())));
    }

    #[test]
    fn test_decode_market_settled_result() {
        let mut json = market_json();
        json["result"] = Value::String("all_yes".into());
        let market: Market = serde_json::from_value(json).unwrap();
        assert_eq!(market.result, Some(MarketResult::AllYes));
    }

    #[test]
    fn test_decode_market_bad_enum_fails() {
        let mut json = market_json();
        json["market_type"] = Value::String("ternary".into());
        assert!(serde_json::from_value::<Market>(json).is_err());
    }

    #[test]
    fn test_subscribe_command_shape() {
        let cmd = SubscribeCommand::subscribe(1, vec!["ticker".to_string()], None);
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 1, "cmd": "subscribe", "params": {"channels": ["ticker"]}})
        );
    }

    #[test]
    fn test_parse_ticker_message() {
        let json = r#"{
            "type": "ticker",
            "sid": 11,
            "msg": {"market_ticker": "FED-24DEC-T4.50", "price": 42, "yes_bid": 41, "yes_ask": 43, "ts": 1717245000}
        }"#;

        let msg = WsInboundMessage::parse(json);
        assert!(!msg.is_unknown());
        assert_eq!(msg.message_type(), Some("ticker"));
    }

    #[test]
    fn test_parse_subscribed_and_error_messages() {
        let ok = WsInboundMessage::parse(r#"{"id":1,"type":"subscribed","msg":{"channel":"ticker","sid":1}}"#);
        assert_eq!(ok.message_type(), Some("subscribed"));

        let err = WsInboundMessage::parse(r#"{"id":2,"type":"error","msg":{"code":6,"msg":"Already subscribed"}}"#);
        match err {
            WsInboundMessage::Kalshi(KalshiMessage::Error(e)) => assert_eq!(e.msg.code, 6),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_message() {
        let msg = WsInboundMessage::parse(r#"{"type": "orderbook_delta", "sid": 3, "msg": {}}"#);
        assert!(msg.is_unknown());
        assert_eq!(msg.message_type(), Some("orderbook_delta"));

        assert!(WsInboundMessage::parse("not valid json").is_unknown());
    }

    #[test]
    fn test_message_stats() {
        let mut stats = MessageStats::new();
        stats.record(&WsInboundMessage::parse(r#"{"type":"ticker","sid":1,"msg":{"market_ticker":"X"}}"#));
        stats.record(&WsInboundMessage::parse(r#"{"type":"fill","sid":2,"msg":{}}"#));
        stats.record(&WsInboundMessage::parse("garbage"));

        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.parsed_ok, 1);
        assert_eq!(stats.unknown_type_count, 2);
        assert_eq!(stats.type_counts.get("_no_type"), Some(&1));
        assert_eq!(stats.last_message_type.as_deref(), Some("_no_type"));
    }
}
