//! Broker gateway REST adapter.
//!
//! Signed REST client for the broker system: order placement, the
//! completed-order feed, position snapshots and demat holdings. Every payload
//! deserializes into a typed struct; unrecognized order statuses are carried
//! verbatim instead of being coerced.
//!
//! Dry-run mode synthesizes placements locally and reports them back as
//! COMPLETE (at zero price) from the completed-order feed, so workflows can
//! be rehearsed without touching the broker.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Mutex;
use tracing::{debug, info};

use async_trait::async_trait;

use crate::config::BrokerConfig;
use crate::domain::{
    BrokerCompletedOrder, BrokerOrderStatus, BrokerPosition, DematHolding, OrderInstruction,
    OrderType, OrderValidity, PlacedOrder,
};
use crate::engine::BrokerGateway;
use crate::error::{PocketError, Result};

type HmacSha256 = Hmac<Sha256>;

// ==================== Wire types ====================

#[derive(Debug, Serialize)]
struct PlaceOrderRequest<'a> {
    client_id: &'a str,
    instrument_token: i64,
    exchange: &'a str,
    trading_symbol: &'a str,
    transaction_type: String,
    quantity: i64,
    order_type: OrderType,
    validity: OrderValidity,
    product: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletedOrderWire {
    order_id: String,
    instrument_token: i64,
    #[serde(default)]
    trading_symbol: String,
    status: String,
    #[serde(default)]
    average_price: Decimal,
    #[serde(default)]
    filled_quantity: i64,
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    instrument_token: i64,
    #[serde(default)]
    trading_symbol: String,
    #[serde(default)]
    buy_quantity: i64,
    #[serde(default)]
    sell_quantity: i64,
}

#[derive(Debug, Deserialize)]
struct HoldingWire {
    instrument_token: i64,
    #[serde(default)]
    trading_symbol: String,
    #[serde(default)]
    quantity: i64,
}

// ==================== Client ====================

#[derive(Default)]
struct DryRunState {
    placed: Vec<(String, OrderInstruction)>,
    next_seq: usize,
}

pub struct BrokerRestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    product: String,
    dry_run: bool,
    sim: Mutex<DryRunState>,
}

impl BrokerRestClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pockets-broker-adapter/0.1")
            .build()
            .map_err(|e| {
                PocketError::Internal(format!("failed to build broker HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            product: config.product.clone(),
            dry_run: config.dry_run,
            sim: Mutex::new(DryRunState::default()),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn auth_headers(&self, method: &Method, path: &str, body: &str) -> Result<HeaderMap> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| PocketError::Auth("broker api_key is required".to_string()))?;
        let secret = self
            .api_secret
            .as_ref()
            .ok_or_else(|| PocketError::Auth("broker api_secret is required".to_string()))?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let sign_payload = format!(
            "{}{}{}{}",
            timestamp,
            method.as_str().to_uppercase(),
            path,
            body
        );

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PocketError::Auth(format!("invalid broker secret: {}", e)))?;
        mac.update(sign_payload.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-broker-api-key"),
            HeaderValue::from_str(key)
                .map_err(|e| PocketError::Auth(format!("invalid broker API key header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-broker-signature"),
            HeaderValue::from_str(&signature)
                .map_err(|e| PocketError::Auth(format!("invalid broker signature header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-broker-timestamp"),
            HeaderValue::from_str(&timestamp)
                .map_err(|e| PocketError::Auth(format!("invalid broker timestamp header: {}", e)))?,
        );

        Ok(headers)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let body_text = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(String::new);

        let mut req = self.http.request(method.clone(), &url);

        if let Some(query) = query {
            req = req.query(query);
        }

        req = req.headers(self.auth_headers(&method, path, &body_text)?);

        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(PocketError::Upstream(format!(
                "broker {} {} failed: status={} body={}",
                method, path, status, text
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            PocketError::Upstream(format!("malformed broker response for {}: {}", path, e))
        })
    }

    fn dry_run_place(&self, instruction: &OrderInstruction) -> PlacedOrder {
        let mut sim = self.sim.lock().unwrap();
        sim.next_seq += 1;
        let order_id = format!("DRY-{:06}", sim.next_seq);
        sim.placed.push((order_id.clone(), instruction.clone()));
        debug!(order_id = %order_id, symbol = %instruction.trading_symbol, "dry-run placement");
        PlacedOrder {
            order_id,
            instrument_token: instruction.instrument_token,
            trading_symbol: instruction.trading_symbol.clone(),
        }
    }

    fn dry_run_completed(&self) -> Vec<BrokerCompletedOrder> {
        let sim = self.sim.lock().unwrap();
        sim.placed
            .iter()
            .map(|(order_id, instruction)| BrokerCompletedOrder {
                order_id: order_id.clone(),
                instrument_token: instruction.instrument_token,
                trading_symbol: instruction.trading_symbol.clone(),
                status: BrokerOrderStatus::Complete,
                price: Decimal::ZERO,
                qty: instruction.qty,
            })
            .collect()
    }
}

#[async_trait]
impl BrokerGateway for BrokerRestClient {
    async fn place_order(
        &self,
        client_id: &str,
        instruction: &OrderInstruction,
    ) -> Result<PlacedOrder> {
        if self.dry_run {
            return Ok(self.dry_run_place(instruction));
        }

        let request = PlaceOrderRequest {
            client_id,
            instrument_token: instruction.instrument_token,
            exchange: &instruction.exchange,
            trading_symbol: &instruction.trading_symbol,
            transaction_type: instruction.side.to_string(),
            quantity: instruction.qty,
            order_type: OrderType::Market,
            validity: OrderValidity::IOC,
            product: &self.product,
        };

        let response: PlaceOrderResponse = self
            .request(
                Method::POST,
                "/orders",
                None,
                Some(serde_json::to_value(&request)?),
            )
            .await?;

        let order_id = response.order_id.ok_or_else(|| {
            PocketError::Upstream(format!(
                "broker placement response missing order_id (status={:?})",
                response.status
            ))
        })?;

        info!(
            client_id,
            order_id = %order_id,
            symbol = %instruction.trading_symbol,
            qty = instruction.qty,
            side = %instruction.side,
            "order placed with broker"
        );

        Ok(PlacedOrder {
            order_id,
            instrument_token: instruction.instrument_token,
            trading_symbol: instruction.trading_symbol.clone(),
        })
    }

    async fn completed_orders(&self, client_id: &str) -> Result<Vec<BrokerCompletedOrder>> {
        if self.dry_run {
            return Ok(self.dry_run_completed());
        }

        let rows: Vec<CompletedOrderWire> = self
            .request(
                Method::GET,
                "/orders/completed",
                Some(&[("client_id", client_id.to_string())]),
                None,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| BrokerCompletedOrder {
                order_id: row.order_id,
                instrument_token: row.instrument_token,
                trading_symbol: row.trading_symbol,
                status: BrokerOrderStatus::parse(&row.status),
                price: row.average_price,
                qty: row.filled_quantity,
            })
            .collect())
    }

    async fn positions(&self, client_id: &str) -> Result<Vec<BrokerPosition>> {
        if self.dry_run {
            return Ok(Vec::new());
        }

        let rows: Vec<PositionWire> = self
            .request(
                Method::GET,
                "/positions",
                Some(&[
                    ("client_id", client_id.to_string()),
                    ("kind", "historical".to_string()),
                ]),
                None,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| BrokerPosition {
                instrument_token: row.instrument_token,
                trading_symbol: row.trading_symbol,
                buy_qty: row.buy_quantity,
                sell_qty: row.sell_quantity,
            })
            .collect())
    }

    async fn demat_holdings(&self, client_id: &str) -> Result<Vec<DematHolding>> {
        if self.dry_run {
            return Ok(Vec::new());
        }

        let rows: Vec<HoldingWire> = self
            .request(
                Method::GET,
                "/holdings/demat",
                Some(&[("client_id", client_id.to_string())]),
                None,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| DematHolding {
                instrument_token: row.instrument_token,
                trading_symbol: row.trading_symbol,
                qty: row.quantity,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;

    fn dry_run_client() -> BrokerRestClient {
        BrokerRestClient::new(&BrokerConfig {
            base_url: "http://localhost:9200".to_string(),
            api_key: None,
            api_secret: None,
            product: "CNC".to_string(),
            dry_run: true,
        })
        .unwrap()
    }

    fn instruction(token: i64, qty: i64) -> OrderInstruction {
        OrderInstruction {
            instrument_token: token,
            exchange: "NSE".to_string(),
            trading_symbol: format!("SYM{}", token),
            qty,
            side: OrderSide::Buy,
        }
    }

    #[tokio::test]
    async fn dry_run_placements_show_up_as_complete() {
        let client = dry_run_client();

        let placed = client
            .place_order("C1", &instruction(100, 5))
            .await
            .unwrap();
        assert!(placed.order_id.starts_with("DRY-"));

        let feed = client.completed_orders("C1").await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].order_id, placed.order_id);
        assert_eq!(feed[0].status, BrokerOrderStatus::Complete);
        assert_eq!(feed[0].qty, 5);
    }

    #[tokio::test]
    async fn dry_run_snapshots_are_empty() {
        let client = dry_run_client();
        assert!(client.positions("C1").await.unwrap().is_empty());
        assert!(client.demat_holdings("C1").await.unwrap().is_empty());
    }

    #[test]
    fn live_client_requires_credentials_for_signing() {
        let client = dry_run_client();
        let err = client
            .auth_headers(&Method::GET, "/orders/completed", "")
            .unwrap_err();
        assert!(matches!(err, PocketError::Auth(_)));
    }
}
