//! Binance historical kline backfill.
//!
//! Provides the REST `/api/v3/klines` fetch used both for the backtest
//! driver's replay source and for live-mode warmup (filling the indicator
//! ring buffer before the engine starts trading a symbol).

use crate::domain::bar::Bar;
use crate::infrastructure::binance::common::denormalize_symbol;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;

pub struct BinanceMarketDataClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl BinanceMarketDataClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: base_url.into(),
        }
    }

    /// Fetches up to `limit` (max 1000 per Binance's API) historical bars for
    /// `symbol` at `interval` (e.g. "1m"), optionally bounded by
    /// `start_time_ms`/`end_time_ms`.
    pub async fn fetch_historical_bars(
        &self,
        symbol: &str,
        interval: &str,
        start_time_ms: Option<i64>,
        end_time_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Bar>> {
        let api_symbol = denormalize_symbol(symbol);
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url.trim_end_matches('/'),
            api_symbol,
            interval,
            limit.min(1000)
        );
        if let Some(start) = start_time_ms {
            url.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end_time_ms {
            url.push_str(&format!("&endTime={end}"));
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to fetch klines from Binance")?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance klines fetch failed: {}", text);
        }

        let raw: Vec<serde_json::Value> = response.json().await?;
        let bars = raw
            .into_iter()
            .filter_map(|entry| parse_kline_row(&entry))
            .collect();
        Ok(bars)
    }
}

fn parse_kline_row(row: &serde_json::Value) -> Option<Bar> {
    let arr = row.as_array()?;
    let timestamp = arr.first()?.as_i64()?;
    let open: f64 = arr.get(1)?.as_str()?.parse().ok()?;
    let high: f64 = arr.get(2)?.as_str()?.parse().ok()?;
    let low: f64 = arr.get(3)?.as_str()?.parse().ok()?;
    let close: f64 = arr.get(4)?.as_str()?.parse().ok()?;
    let volume: f64 = arr.get(5)?.as_str()?.parse().ok()?;

    Some(Bar::new(
        timestamp,
        Decimal::from_f64_retain(open)?,
        Decimal::from_f64_retain(high)?,
        Decimal::from_f64_retain(low)?,
        Decimal::from_f64_retain(close)?,
        Decimal::from_f64_retain(volume)?,
    ))
}
