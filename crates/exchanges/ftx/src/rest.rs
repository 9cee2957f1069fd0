use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use syncbot_core::*;
use tracing::debug;

use crate::auth;
use crate::messages::*;
use crate::{FtxConfig, EXCHANGE_NAME};

/// Span of the first history window.
const HISTORY_WINDOW_SECS: i64 = 86_400;
const MAX_HISTORY_WINDOW_SECS: i64 = 32 * 86_400;
/// Largest `limit` sent to a history endpoint.
const MAX_HISTORY_PAGE: usize = 5_000;

/// Signed REST client for one FTX account.
pub struct FtxClient {
    http: reqwest::Client,
    config: FtxConfig,
}

impl FtxClient {
    pub fn new(config: FtxConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &FtxConfig {
        &self.config
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, private: bool) -> Result<T, ExchangeError> {
        self.request(Method::GET, path, None, private).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        private: bool,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.config.rest_url.trim_end_matches('/'), path);
        let mut req = self.http.request(method.clone(), &url);

        if private {
            let (key, secret) = self.config.credentials().ok_or_else(|| {
                ExchangeError::Unauthenticated("API key and secret are not configured".to_string())
            })?;
            let ts = Utc::now().timestamp_millis();
            let payload =
                auth::rest_payload(ts, method.as_str(), path, body.as_deref().unwrap_or(""));
            let sign = auth::sign(secret, &payload)
                .map_err(|e| ExchangeError::Other(format!("Signing failed: {}", e)))?;
            req = req
                .header("FTX-KEY", key)
                .header("FTX-SIGN", sign)
                .header("FTX-TS", ts.to_string());
            if let Some(subaccount) = &self.config.subaccount {
                req = req.header("FTX-SUBACCOUNT", subaccount);
            }
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        debug!(%method, path, "FTX request");
        let response = req
            .send()
            .await
            .map_err(|e| ExchangeError::RequestFailed(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::RequestFailed(e.to_string()))?;

        let envelope: FtxResponse<T> = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                ExchangeError::Decode(format!("{}: {}", e, text))
            } else {
                ExchangeError::RequestFailed(format!("HTTP {}: {}", status, text))
            }
        })?;

        if !envelope.success || !status.is_success() {
            let message = envelope.error.unwrap_or_else(|| format!("HTTP {}", status));
            return Err(match status.as_u16() {
                401 => ExchangeError::Unauthenticated(message),
                _ if message.to_ascii_lowercase().contains("not found") => {
                    ExchangeError::OrderNotFound(message)
                }
                _ => ExchangeError::Rejected(message),
            });
        }
        envelope
            .result
            .ok_or_else(|| ExchangeError::Decode(format!("missing result: {}", text)))
    }

    /// The oldest `limit` rows of a newest-first history endpoint at or
    /// after `since` that pass `keep`, oldest first.
    ///
    /// Walks forward from `since` one time window at a time and stops after
    /// the window that brings the total to `limit`. Empty windows double the
    /// span of the next one.
    async fn history_since<T>(
        &self,
        endpoint: &str,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
        keep: impl Fn(&T) -> bool + Send + Sync,
    ) -> Result<Vec<T>, ExchangeError>
    where
        T: DeserializeOwned + HistoryRecord + Send,
    {
        let now = Utc::now();
        let mut span = Duration::seconds(HISTORY_WINDOW_SECS);
        let mut start = since;
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        loop {
            let end = (start + span).min(now);
            let before = rows.len();
            self.history_window(endpoint, symbol, (start, end), &keep, &mut seen, &mut rows)
                .await?;
            if rows.len() >= limit || end >= now {
                break;
            }
            if rows.len() == before {
                span = (span * 2).min(Duration::seconds(MAX_HISTORY_WINDOW_SECS));
            }
            start = end;
        }

        rows.retain(|r| r.time() >= since);
        rows.sort_by_key(|r| (r.time(), r.id()));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Every row inside `window` (both ends inclusive), paging backwards
    /// from its end.
    ///
    /// Each page ends at the oldest row of the previous one, so rows sharing
    /// that instant come back again and are told apart by id. A full page of
    /// rows already seen means the instant alone fills a page; it is asked
    /// for again with a doubled `limit` until older rows show up.
    async fn history_window<T>(
        &self,
        endpoint: &str,
        symbol: &str,
        (start, end): (DateTime<Utc>, DateTime<Utc>),
        keep: &(impl Fn(&T) -> bool + Send + Sync),
        seen: &mut HashSet<u64>,
        rows: &mut Vec<T>,
    ) -> Result<(), ExchangeError>
    where
        T: DeserializeOwned + HistoryRecord + Send,
    {
        let page_size = self.config.history_page_size.max(1);
        let mut size = page_size;
        let mut upper = end;

        loop {
            let path = format!(
                "{}?market={}&start_time={}&end_time={}&limit={}",
                endpoint,
                symbol,
                ftx_time(start),
                ftx_time(upper),
                size
            );
            let page: Vec<T> = self.get(&path, true).await?;
            let full = page.len() >= size;
            let Some(oldest) = page.iter().map(|r| r.time()).min() else {
                return Ok(());
            };

            let mut added = 0usize;
            for row in page {
                if seen.insert(row.id()) {
                    added += 1;
                    if keep(&row) {
                        rows.push(row);
                    }
                }
            }
            debug!(endpoint, added, %oldest, "FTX history page");

            if !full {
                return Ok(());
            }
            if added > 0 {
                upper = oldest;
                size = page_size;
            } else if size >= MAX_HISTORY_PAGE {
                return Err(ExchangeError::Other(format!(
                    "more than {} {} rows share timestamp {}",
                    MAX_HISTORY_PAGE, endpoint, oldest
                )));
            } else {
                size = (size * 2).min(MAX_HISTORY_PAGE);
            }
        }
    }
}

/// FTX takes fractional epoch seconds for history bounds.
fn ftx_time(t: DateTime<Utc>) -> String {
    format!("{}.{:06}", t.timestamp(), t.timestamp_subsec_micros())
}

#[async_trait]
impl Exchange for FtxClient {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    async fn query_account_balances(&self) -> Result<BalanceMap, ExchangeError> {
        let balances: Vec<FtxBalance> = self.get("/api/wallet/balances", true).await?;
        Ok(balances
            .into_iter()
            .map(|b| (b.coin.clone(), b.into_balance()))
            .collect())
    }

    async fn query_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        let markets: Vec<FtxMarket> = self.get("/api/markets", false).await?;
        Ok(markets.into_iter().filter_map(FtxMarket::into_market).collect())
    }

    async fn query_trades(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let fills: Vec<FtxFill> = self
            .history_since("/api/fills", symbol, since, limit, |_: &FtxFill| true)
            .await?;
        fills
            .into_iter()
            .map(|f| f.into_trade(EXCHANGE_NAME, symbol))
            .collect()
    }

    async fn query_closed_orders(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, ExchangeError> {
        let orders: Vec<FtxOrder> = self
            .history_since("/api/orders/history", symbol, since, limit, FtxOrder::is_closed)
            .await?;
        orders
            .into_iter()
            .map(|o| o.into_order(EXCHANGE_NAME))
            .collect()
    }

    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        let path = format!("/api/orders?market={}", symbol);
        let mut orders: Vec<FtxOrder> = self.get(&path, true).await?;
        orders.sort_by_key(|o| (o.created_at, o.id));
        orders
            .into_iter()
            .map(|o| o.into_order(EXCHANGE_NAME))
            .collect()
    }

    async fn submit_order(&self, order: &SubmitOrder) -> Result<Order, ExchangeError> {
        let body = serde_json::to_string(&PlaceOrderBody::from(order))
            .map_err(|e| ExchangeError::Other(format!("Serialization error: {}", e)))?;
        let placed: FtxOrder = self
            .request(Method::POST, "/api/orders", Some(body), true)
            .await?;
        placed.into_order(EXCHANGE_NAME)
    }

    async fn cancel_order(&self, cancel: &CancelOrder) -> Result<(), ExchangeError> {
        let path = match cancel {
            CancelOrder::ByOrderId(id) => format!("/api/orders/{}", id),
            CancelOrder::ByClientOrderId(id) => format!("/api/orders/by_client_id/{}", id),
        };
        let _: serde_json::Value = self.request(Method::DELETE, &path, None, true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers each connection with the next canned body and records the
    /// request head, lowercased.
    async fn mock_server(bodies: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                captured
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head).to_ascii_lowercase());
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (url, requests)
    }

    fn client(url: &str) -> FtxClient {
        FtxClient::new(FtxConfig {
            rest_url: url.to_string(),
            subaccount: Some("sub".to_string()),
            ..FtxConfig::default().with_credentials("k", "s")
        })
    }

    fn paged_client(url: &str, history_page_size: usize) -> FtxClient {
        FtxClient::new(FtxConfig {
            history_page_size,
            ..client(url).config().clone()
        })
    }

    /// Whole seconds, `hours` ago.
    fn hours_ago(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(Utc::now().timestamp() - hours * 3600, 0).unwrap()
    }

    fn fill(id: u64, at: DateTime<Utc>) -> String {
        format!(
            r#"{{"id": {}, "market": "BTC/USD", "side": "buy", "price": 100, "size": 1, "fee": 0,
                "feeCurrency": "USD", "liquidity": "taker", "orderId": null, "time": "{}"}}"#,
            id,
            at.to_rfc3339()
        )
    }

    fn order(id: u64, status: &str, at: DateTime<Utc>) -> String {
        format!(
            r#"{{"id": {}, "clientId": null, "market": "BTC/USD", "side": "buy", "type": "limit",
                "price": 100, "size": 1, "filledSize": 0, "status": "{}", "createdAt": "{}"}}"#,
            id,
            status,
            at.to_rfc3339()
        )
    }

    fn page(rows: &[String]) -> String {
        format!(r#"{{"success": true, "result": [{}]}}"#, rows.join(","))
    }

    #[tokio::test]
    async fn test_fills_are_paged_backwards_and_returned_oldest_first() {
        let since = hours_ago(1);
        let at = |minutes| since + Duration::minutes(minutes);
        let (url, requests) = mock_server(vec![
            page(&[fill(3, at(30)), fill(2, at(20))]),
            page(&[fill(2, at(20)), fill(1, at(10))]),
            page(&[fill(1, at(10))]),
        ])
        .await;

        let trades = paged_client(&url, 2)
            .query_trades("BTC/USD", since, 100)
            .await
            .unwrap();
        let ids: Vec<_> = trades.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(trades[0].price, dec!(100));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with(&format!(
            "get /api/fills?market=btc/usd&start_time={}&end_time=",
            ftx_time(since)
        )));
        assert!(requests[1].contains(&format!("&end_time={}&limit=2 ", ftx_time(at(20)))));
        assert!(requests[2].contains(&format!("&end_time={}&limit=2 ", ftx_time(at(10)))));
        assert!(requests[0].contains("ftx-key: k"));
        assert!(requests[0].contains("ftx-sign: "));
        assert!(requests[0].contains("ftx-subaccount: sub"));
    }

    #[tokio::test]
    async fn test_page_filled_by_one_instant_is_widened_not_skipped() {
        let since = hours_ago(1);
        let at = |minutes| since + Duration::minutes(minutes);
        let (url, requests) = mock_server(vec![
            page(&[fill(7, at(25)), fill(6, at(20))]),
            page(&[fill(6, at(20)), fill(5, at(20))]),
            page(&[fill(6, at(20)), fill(5, at(20))]),
            page(&[fill(6, at(20)), fill(5, at(20)), fill(4, at(15))]),
        ])
        .await;

        let trades = paged_client(&url, 2)
            .query_trades("BTC/USD", since, 100)
            .await
            .unwrap();
        let ids: Vec<_> = trades.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "5", "6", "7"]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests[2].contains(&format!("&end_time={}&limit=2 ", ftx_time(at(20)))));
        assert!(requests[3].contains(&format!("&end_time={}&limit=4 ", ftx_time(at(20)))));
    }

    #[tokio::test]
    async fn test_history_stops_at_the_window_that_fills_the_limit() {
        let since = hours_ago(5 * 24);
        let (url, requests) = mock_server(vec![
            page(&[]),
            page(&[fill(1, since + Duration::days(2))]),
        ])
        .await;

        let trades = paged_client(&url, 2)
            .query_trades("BTC/USD", since, 1)
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains(&format!(
            "start_time={}&end_time={}&",
            ftx_time(since),
            ftx_time(since + Duration::days(1))
        )));
        assert!(requests[1].contains(&format!(
            "start_time={}&end_time={}&",
            ftx_time(since + Duration::days(1)),
            ftx_time(since + Duration::days(3))
        )));
    }

    #[tokio::test]
    async fn test_closed_and_open_orders() {
        let since = hours_ago(1);
        let at = |minutes| since + Duration::minutes(minutes);
        let (url, requests) = mock_server(vec![
            page(&[order(2, "open", at(20)), order(1, "closed", at(10))]),
            page(&[order(9, "open", at(30)), order(8, "new", at(5))]),
        ])
        .await;
        let client = paged_client(&url, 3);

        let closed = client.query_closed_orders("BTC/USD", since, 10).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].order_id, "1");

        let open = client.query_open_orders("BTC/USD").await.unwrap();
        let ids: Vec<_> = open.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["8", "9"]);
        assert!(open.iter().all(|o| o.status == OrderStatus::New));

        let requests = requests.lock().unwrap();
        assert!(requests[0].starts_with("get /api/orders/history?market=btc/usd&"));
        assert!(requests[1].starts_with("get /api/orders?market=btc/usd "));
    }

    #[tokio::test]
    async fn test_markets_are_public() {
        let body = r#"{"success": true, "result": [
            {"name": "ETH/USDT", "type": "spot", "baseCurrency": "ETH", "quoteCurrency": "USDT"}
        ]}"#;
        let (url, requests) = mock_server(vec![body.to_string()]).await;
        let client = FtxClient::new(FtxConfig {
            rest_url: url,
            ..FtxConfig::default()
        });

        let markets = client.query_markets().await.unwrap();
        assert_eq!(markets, vec![Market::new("ETH/USDT", "ETH", "USDT")]);
        assert!(!requests.lock().unwrap()[0].contains("ftx-key"));
    }

    #[tokio::test]
    async fn test_private_call_without_credentials_fails_locally() {
        let client = FtxClient::new(FtxConfig {
            rest_url: "http://127.0.0.1:1".to_string(),
            ..FtxConfig::default()
        });
        let err = client.query_account_balances().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced() {
        let body = r#"{"success": false, "error": "Order already closed"}"#;
        let (url, _) = mock_server(vec![body.to_string()]).await;
        let err = client(&url)
            .cancel_order(&CancelOrder::ByOrderId("1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(m) if m == "Order already closed"));
    }

    #[tokio::test]
    async fn test_balances_split_free_and_locked() {
        let body = r#"{"success": true, "result": [
            {"coin": "USDT", "free": 4321.2, "total": 4340.2, "usdValue": 4340.2}
        ]}"#;
        let (url, _) = mock_server(vec![body.to_string()]).await;
        let balances = client(&url).query_account_balances().await.unwrap();
        let usdt = &balances["USDT"];
        assert_eq!(usdt.available, dec!(4321.2));
        assert_eq!(usdt.locked, dec!(19.0));
        assert_eq!(usdt.total(), dec!(4340.2));
    }
}
