//! Binance order execution client.
//!
//! Places and cancels limit orders over Binance's signed REST API (HMAC-SHA256
//! request signing) and reports acks back to the live driver as discrete
//! events. Wrapped in the same circuit breaker used elsewhere in this crate.

use crate::domain::orders::{PendingOrder, Side};
use crate::infrastructure::binance::common::denormalize_symbol;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of placing or cancelling an order against the exchange, fed back
/// into the engine as a discrete event at the next bar boundary.
#[derive(Debug, Clone)]
pub enum ExecutionAck {
    Placed {
        order_id: String,
        exchange_order_id: String,
    },
    Rejected {
        order_id: String,
        reason: String,
    },
    Cancelled {
        order_id: String,
    },
    CancelFailed {
        order_id: String,
        reason: String,
    },
}

pub struct BinanceExecutionClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceExecutionClient {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "BinanceExecution",
                5,
                3,
                std::time::Duration::from_secs(60),
            )),
        }
    }

    fn sign(&self, query_string: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub async fn place_limit_order(&self, order: &PendingOrder) -> Result<ExecutionAck> {
        let order = order.clone();
        self.circuit_breaker
            .call(async move {
                let api_symbol = denormalize_symbol(&order.symbol);
                let side = match order.side {
                    Side::Buy => "BUY",
                    Side::Sell => "SELL",
                };
                let timestamp = chrono::Utc::now().timestamp_millis();

                let query_string = format!(
                    "symbol={}&side={}&type=LIMIT&timeInForce=GTC&quantity={}&price={}&newClientOrderId={}&timestamp={}",
                    api_symbol, side, order.quantity, order.price, order.id, timestamp
                );
                let signature = self.sign(&query_string);
                let url = format!("{}/api/v3/order?{}&signature={}", self.base_url, query_string, signature);

                let response = self
                    .client
                    .post(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("failed to place order on Binance")?;

                if !response.status().is_success() {
                    let text = response.text().await.unwrap_or_default();
                    warn!(order_id = %order.id, error = %text, "Binance order placement rejected");
                    return Ok(ExecutionAck::Rejected {
                        order_id: order.id.clone(),
                        reason: text,
                    });
                }

                let body: serde_json::Value = response.json().await?;
                let exchange_order_id = body
                    .get("orderId")
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                info!(order_id = %order.id, %exchange_order_id, "Binance order placed");
                Ok(ExecutionAck::Placed {
                    order_id: order.id.clone(),
                    exchange_order_id,
                })
            })
            .await
            .map_err(Self::flatten_circuit_error)
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<ExecutionAck> {
        let symbol = symbol.to_string();
        let order_id = order_id.to_string();
        self.circuit_breaker
            .call(async move {
                let api_symbol = denormalize_symbol(&symbol);
                let timestamp = chrono::Utc::now().timestamp_millis();
                let query_string = format!(
                    "symbol={}&origClientOrderId={}&timestamp={}",
                    api_symbol, order_id, timestamp
                );
                let signature = self.sign(&query_string);
                let url = format!(
                    "{}/api/v3/order?{}&signature={}",
                    self.base_url, query_string, signature
                );

                let response = self
                    .client
                    .delete(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("failed to cancel order on Binance")?;

                if !response.status().is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Ok(ExecutionAck::CancelFailed {
                        order_id: order_id.clone(),
                        reason: text,
                    });
                }

                Ok(ExecutionAck::Cancelled {
                    order_id: order_id.clone(),
                })
            })
            .await
            .map_err(Self::flatten_circuit_error)
    }

    fn flatten_circuit_error(e: CircuitBreakerError<anyhow::Error>) -> anyhow::Error {
        match e {
            CircuitBreakerError::Open(msg) => {
                anyhow::anyhow!("Binance execution circuit breaker open: {}", msg)
            }
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}
