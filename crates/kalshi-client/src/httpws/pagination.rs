//! Cursor pagination
//!
//! `paginate` turns a cursor-paged endpoint into a lazy stream of typed
//! records. A page is fetched only when the consumer polls for an item the
//! buffered page cannot supply, so dropping the stream early issues no
//! further requests. The stream is single-pass.
//!
//! Termination: the server returns an empty or absent `cursor`, or the
//! overall `limit` has been yielded, whichever comes first. A decode
//! failure yields one `Decode` error and ends the stream; records already
//! yielded are unaffected.

use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::rest::KalshiHttpClient;
use crate::error::{KalshiError, Result};
use crate::types::Query;

/// Page size cap for GET /markets/trades
pub const MAX_TRADES_PAGE_SIZE: u32 = 1000;

/// Page size cap for GET /markets and GET /events
pub const MAX_MARKETS_PAGE_SIZE: u32 = 200;

/// Caller-side knobs for one pagination run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageOptions {
    /// Requested page size, clamped to the endpoint maximum
    pub page_size: Option<u32>,
    /// Stop after this many records
    pub limit: Option<usize>,
    /// Resume from a cursor returned by an earlier run
    pub cursor: Option<String>,
}

impl PageOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Size of the next request: clamped to `[1, max]`, never more than
    /// the records still wanted
    pub fn next_page_size(&self, max_page_size: u32, yielded: usize) -> u32 {
        let size = self.page_size.unwrap_or(max_page_size).clamp(1, max_page_size.max(1));
        match self.limit {
            Some(limit) => {
                let remaining = limit.saturating_sub(yielded).max(1);
                size.min(u32::try_from(remaining).unwrap_or(u32::MAX))
            }
            None => size,
        }
    }
}

/// Page-items extractor that takes the array stored under `key`
///
/// A `null` value is an empty page; a missing key is a malformed page.
pub fn items_at(key: &'static str) -> impl Fn(&mut Value) -> Result<Vec<Value>> + Send + Sync + Clone {
    move |page: &mut Value| match page.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) => Ok(Vec::new()),
        Some(other) => Err(KalshiError::decode(
            format!("page key '{}'", key),
            format!("expected an array, got {}", json_type_name(&other)),
        )),
        None => Err(KalshiError::decode(format!("page key '{}'", key), "key missing from response")),
    }
}

/// Decoder mapping one page item onto `T` through serde
pub fn decode_record<T: DeserializeOwned>(item: Value) -> Result<T> {
    serde_json::from_value(item).map_err(|e| KalshiError::decode(short_type_name::<T>(), e))
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// State carried between polls of a pagination stream
struct PageCursor<E, D> {
    client: KalshiHttpClient,
    path: String,
    query: Query,
    max_page_size: u32,
    options: PageOptions,
    extract: E,
    decode: D,
    buffer: std::vec::IntoIter<Value>,
    /// Cursor for the next request; `None` once the server has said "done"
    next_cursor: Option<String>,
    started: bool,
    yielded: usize,
}

impl<T, E, D> PageCursor<E, D>
where
    E: Fn(&mut Value) -> Result<Vec<Value>>,
    D: Fn(Value) -> Result<T>,
{
    fn exhausted(&self) -> bool {
        self.started && self.next_cursor.is_none()
    }

    fn limit_reached(&self) -> bool {
        self.options.limit.is_some_and(|limit| self.yielded >= limit)
    }

    async fn next_record(mut self) -> Result<Option<(T, Self)>> {
        loop {
            if self.limit_reached() {
                return Ok(None);
            }

            if let Some(item) = self.buffer.next() {
                let record = (self.decode)(item)?;
                self.yielded += 1;
                return Ok(Some((record, self)));
            }

            if self.exhausted() {
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let page_size = self.options.next_page_size(self.max_page_size, self.yielded);
        self.query.insert("limit".to_string(), page_size.to_string());
        match self.next_cursor.take() {
            Some(cursor) => {
                self.query.insert("cursor".to_string(), cursor);
            }
            None => {
                self.query.remove("cursor");
            }
        }

        let mut page = self.client.get(&self.path, &self.query).await?;
        let items = (self.extract)(&mut page)?;
        let cursor = page
            .get("cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        debug!("Received {} items from {}, cursor: {:?}", items.len(), self.path, cursor);

        self.started = true;
        self.next_cursor = cursor;
        self.buffer = items.into_iter();
        Ok(())
    }
}

impl KalshiHttpClient {
    /// Lazily walk a cursor-paged endpoint
    ///
    /// # Arguments
    /// * `path` - Endpoint path, e.g. `/markets`
    /// * `query` - Filter parameters; `limit` and `cursor` are managed here
    /// * `max_page_size` - Endpoint cap on the `limit` parameter
    /// * `options` - Page size, overall limit and starting cursor
    /// * `extract` - Pulls the item array out of a page (see [`items_at`])
    /// * `decode` - Maps one item onto a record (see [`decode_record`])
    pub fn paginate<T, E, D>(
        &self,
        path: &str,
        query: Query,
        max_page_size: u32,
        options: PageOptions,
        extract: E,
        decode: D,
    ) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        E: Fn(&mut Value) -> Result<Vec<Value>> + Send + Sync + 'static,
        D: Fn(Value) -> Result<T> + Send + Sync + 'static,
    {
        let next_cursor = options.cursor.clone();
        let state = PageCursor {
            client: self.clone(),
            path: path.to_string(),
            query,
            max_page_size,
            options,
            extract,
            decode,
            buffer: Vec::new().into_iter(),
            next_cursor,
            started: false,
            yielded: 0,
        };

        stream::try_unfold(state, PageCursor::next_record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::httpws::auth::testing;
    use crate::{Environment, KalshiConfig};
    use futures::{StreamExt, TryStreamExt};
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    async fn client_for(server: &MockServer) -> KalshiHttpClient {
        let config = KalshiConfig::new(Environment::Demo, testing::credentials())
            .with_base_url(&server.uri())
            .with_intervals(Duration::ZERO, Duration::ZERO);
        KalshiHttpClient::new(&config).unwrap()
    }

    fn page(ids: std::ops::Range<u32>, cursor: &str) -> ResponseTemplate {
        let items: Vec<Value> = ids.map(|id| json!({ "id": id })).collect();
        ResponseTemplate::new(200).set_body_json(json!({ "items": items, "cursor": cursor }))
    }

    fn item_stream(client: &KalshiHttpClient, options: PageOptions) -> impl Stream<Item = Result<Item>> {
        client.paginate("/items", Query::new(), 100, options, items_at("items"), decode_record::<Item>)
    }

    #[test]
    fn test_next_page_size_clamps_and_respects_limit() {
        assert_eq!(PageOptions::default().next_page_size(1000, 0), 1000);
        assert_eq!(PageOptions::default().page_size(5000).next_page_size(200, 0), 200);
        assert_eq!(PageOptions::default().page_size(0).next_page_size(200, 0), 1);
        assert_eq!(PageOptions::with_limit(50).next_page_size(200, 0), 50);
        assert_eq!(PageOptions::with_limit(250).next_page_size(200, 200), 50);
        assert_eq!(PageOptions::with_limit(5000).next_page_size(1000, 0), 1000);
    }

    #[test]
    fn test_items_at_rejects_missing_key() {
        let extract = items_at("trades");
        assert_eq!(extract(&mut json!({"trades": null})).unwrap().len(), 0);
        assert_eq!(extract(&mut json!({"trades": [1, 2]})).unwrap().len(), 2);
        assert!(matches!(extract(&mut json!({"markets": []})), Err(KalshiError::Decode { .. })));
        assert!(matches!(extract(&mut json!({"trades": "x"})), Err(KalshiError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_walks_all_pages_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param_is_missing("cursor"))
            .respond_with(page(0..3, "c1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("cursor", "c1"))
            .respond_with(page(3..5, "c2"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("cursor", "c2"))
            .respond_with(page(5..7, ""))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let items: Vec<Item> = item_stream(&client, PageOptions::default()).try_collect().await.unwrap();

        let ids: Vec<u32> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_overall_limit_stops_after_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param_is_missing("cursor"))
            .and(query_param("limit", "2"))
            .respond_with(page(0..5, "c1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("cursor", "c1"))
            .respond_with(page(5..10, ""))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let items: Vec<Item> = item_stream(&client, PageOptions::with_limit(2)).try_collect().await.unwrap();

        assert_eq!(items, vec![Item { id: 0 }, Item { id: 1 }]);
    }

    #[tokio::test]
    async fn test_zero_limit_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(page(0..5, "")).expect(0).mount(&server).await;

        let client = client_for(&server).await;
        let items: Vec<Item> = item_stream(&client, PageOptions::with_limit(0)).try_collect().await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param_is_missing("cursor"))
            .respond_with(page(0..2, "c1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("cursor", "c1"))
            .respond_with(page(2..4, ""))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let stream = item_stream(&client, PageOptions::default());
        let first_two: Vec<Item> = stream.take(2).try_collect().await.unwrap();
        assert_eq!(first_two.len(), 2);
    }

    #[tokio::test]
    async fn test_starting_cursor_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("cursor", "resume-here"))
            .respond_with(page(10..12, ""))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let items: Vec<Item> = item_stream(&client, PageOptions::default().cursor("resume-here"))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![Item { id: 10 }, Item { id: 11 }]);
    }

    #[tokio::test]
    async fn test_decode_failure_ends_stream_after_valid_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": 1}, {"id": 2}, {"name": "no id"}, {"id": 4}],
                "cursor": "c1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut stream = Box::pin(item_stream(&client, PageOptions::default()));

        let mut yielded = Vec::new();
        let mut failure = None;
        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => yielded.push(item),
                Err(e) => failure = Some(e),
            }
        }

        assert_eq!(yielded, vec![Item { id: 1 }, Item { id: 2 }]);
        assert!(matches!(failure, Some(KalshiError::Decode { ref what, .. }) if what == "Item"));
    }

    #[tokio::test]
    async fn test_http_error_aborts_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result: Result<Vec<Item>> = item_stream(&client, PageOptions::default()).try_collect().await;
        assert!(matches!(result, Err(KalshiError::Http { status: 500, ref body }) if body == "boom"));
    }
}
