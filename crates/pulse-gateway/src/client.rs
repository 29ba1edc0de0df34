//! HTTP client for the market data feed and the remote analysis endpoint.
//!
//! Price and kline fetches retry per the fetch policy but bypass the queue: they are
//! already deduplicated by the synchronizer. Analysis calls go through the
//! `RequestGateway` with a single attempt so a stale cycle fails fast.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{Direction, Proposal, Timeframe};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::queue::RequestGateway;
use crate::retry::{run_with_retry, RetryPolicy};

/// Upper bound accepted by the kline endpoint.
pub const MAX_KLINE_LIMIT: u32 = 500;

/// Remote endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub prices_url: String,
    pub klines_url: String,
    pub analyze_url: String,
}

/// Body of a remote analysis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub symbol: String,
    pub direction: Direction,
    pub leverage: u32,
    pub interval: Timeframe,
}

/// Market data and analysis client.
pub struct MarketClient {
    client: Client,
    endpoints: Endpoints,
    gateway: Arc<RequestGateway>,
    fetch_policy: RetryPolicy,
    analyze_policy: RetryPolicy,
}

impl MarketClient {
    pub fn new(
        endpoints: Endpoints,
        gateway: Arc<RequestGateway>,
        fetch_policy: RetryPolicy,
        analyze_policy: RetryPolicy,
    ) -> GatewayResult<Self> {
        // Per-attempt deadlines are enforced by `run_with_retry`.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GatewayError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints,
            gateway,
            fetch_policy,
            analyze_policy,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// Fetch the raw price payload (envelope or legacy shape).
    pub async fn get_prices(&self) -> GatewayResult<Value> {
        let url = self.endpoints.prices_url.as_str();
        run_with_retry(url, &self.fetch_policy, |_| {
            self.send_once(self.client.get(url))
        })
        .await
    }

    /// Fetch the raw kline payload for `symbol`. `limit` is clamped to `1..=500`.
    pub async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> GatewayResult<Value> {
        let url = self.endpoints.klines_url.as_str();
        let limit = limit.clamp(1, MAX_KLINE_LIMIT).to_string();
        run_with_retry(url, &self.fetch_policy, |_| {
            let request = self.client.get(url).query(&[
                ("symbol", symbol),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ]);
            self.send_once(request)
        })
        .await
    }

    /// Ask the remote evaluator for one directional analysis.
    ///
    /// Queued behind the gateway. Missing identity fields in the response are filled in
    /// from the request.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> GatewayResult<Proposal> {
        let url = self.endpoints.analyze_url.as_str();
        let body = self
            .gateway
            .submit(run_with_retry(url, &self.analyze_policy, |_| {
                self.send_once(self.client.post(url).json(request))
            }))
            .await?;

        let payload = match body {
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };

        let mut proposal: Proposal = serde_json::from_value(payload)
            .map_err(|e| GatewayError::Decode(format!("analysis payload: {e}")))?;
        if proposal.symbol.is_empty() {
            proposal.symbol = request.symbol.clone();
        }
        if proposal.timeframe.is_none() {
            proposal.timeframe = Some(request.interval);
        }
        if proposal.leverage <= 1 {
            proposal.leverage = request.leverage;
        }
        Ok(proposal)
    }

    async fn send_once(&self, request: RequestBuilder) -> GatewayResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        debug!(status = status.as_u16(), "Response received");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            attempt_timeout: Duration::from_millis(500),
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(20),
        }
    }

    fn client_for(server: &MockServer, fetch: RetryPolicy) -> MarketClient {
        let endpoints = Endpoints {
            prices_url: format!("{}/prices", server.uri()),
            klines_url: format!("{}/klines", server.uri()),
            analyze_url: format!("{}/analyze", server.uri()),
        };
        MarketClient::new(
            endpoints,
            Arc::new(RequestGateway::new(2)),
            fetch,
            RetryPolicy::no_retry(Duration::from_millis(500)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"BTC": {"price": 65000.5}},
                "source": "binance"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy());
        let body = client.get_prices().await.unwrap();
        assert_eq!(body["source"], "binance");
        assert_eq!(body["data"]["BTC"]["price"], 65000.5);
    }

    #[tokio::test]
    async fn test_server_error_then_recovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ETH": {"price": 3000}})))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy());
        let body = client.get_prices().await.unwrap();
        assert_eq!(body["ETH"]["price"], 3000);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_message_from_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/klines"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad symbol"})))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy().with_max_retries(0));
        let err = client
            .get_klines("NOPE", Timeframe::M15, 100)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Status {
                status: 400,
                message: "bad symbol".into()
            }
        );
    }

    #[tokio::test]
    async fn test_klines_query_and_limit_clamp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/klines"))
            .and(query_param("symbol", "SOL"))
            .and(query_param("interval", "1h"))
            .and(query_param("limit", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy());
        let body = client.get_klines("SOL", Timeframe::H1, 9999).await.unwrap();
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_analyze_posts_request_and_fills_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(body_partial_json(json!({
                "symbol": "BTC",
                "direction": "LONG",
                "leverage": 20,
                "interval": "15m"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "direction": "LONG",
                "decision": "ENTER",
                "confidence": "81",
                "price": 100.0,
                "tp": 104.0,
                "sl": 98.0,
                "rr_ratio": "2.0",
                "bots": [{"name": "trend", "signal": "bullish"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy());
        let request = AnalyzeRequest {
            symbol: "BTC".into(),
            direction: Direction::Long,
            leverage: 20,
            interval: Timeframe::M15,
        };
        let proposal = client.analyze(&request).await.unwrap();
        assert_eq!(proposal.symbol, "BTC");
        assert_eq!(proposal.confidence, 81.0);
        assert_eq!(proposal.leverage, 20);
        assert_eq!(proposal.timeframe, Some(Timeframe::M15));
        assert_eq!(proposal.rr_ratio, Some(2.0));
        assert_eq!(proposal.source_bots.len(), 1);
        assert_eq!(client.gateway().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_slow_response_times_out_each_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;

        let policy = fast_policy()
            .with_max_retries(1)
            .with_timeout(Duration::from_millis(100));
        let client = client_for(&server, policy);
        let err = client.get_prices().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
