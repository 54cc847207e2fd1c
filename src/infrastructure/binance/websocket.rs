use crate::domain::bar::Bar;
use crate::infrastructure::binance::common::{denormalize_symbol, normalize_symbol};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// A closed kline event, normalized and ready to feed `Engine::on_bar`.
#[derive(Debug, Clone)]
pub struct KlineEvent {
    pub symbol: String,
    pub bar: Bar,
}

/// Streams closed klines for a set of symbols over Binance's combined
/// websocket, reconnecting with exponential backoff (capped at 60s) on any
/// disconnect. Publishes each closed candle on an `mpsc` channel; it never
/// touches the engine directly.
pub struct BinanceMarketDataStream {
    ws_url: String,
    interval: String,
}

impl BinanceMarketDataStream {
    pub fn new(ws_url: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            interval: interval.into(),
        }
    }

    pub async fn run(self, symbols: Vec<String>, tx: mpsc::Sender<KlineEvent>) {
        let mut backoff = 1u64;
        const MAX_BACKOFF: u64 = 60;

        loop {
            match self.connect_and_stream(&symbols, &tx).await {
                Ok(_) => {
                    info!("Binance kline stream closed gracefully");
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    backoff = 1;
                }
                Err(e) => {
                    error!(
                        "Binance kline stream error: {}. Reconnecting in {}s...",
                        e, backoff
                    );
                    tokio::time::sleep(tokio::time::Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        symbols: &[String],
        tx: &mpsc::Sender<KlineEvent>,
    ) -> Result<()> {
        if symbols.is_empty() {
            warn!("No symbols configured, skipping websocket connection");
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            return Ok(());
        }

        let streams: Vec<String> = symbols
            .iter()
            .map(|s| {
                format!(
                    "{}@kline_{}",
                    denormalize_symbol(s).to_lowercase(),
                    self.interval
                )
            })
            .collect();

        let url = format!(
            "{}/stream?streams={}",
            self.ws_url.trim_end_matches('/'),
            streams.join("/")
        );

        info!("Connecting to Binance kline stream: {}", url);
        let (ws_stream, _) = connect_async(&url)
            .await
            .context("failed to connect to Binance kline stream")?;
        info!("Binance kline stream connected");

        let (mut write, mut read) = ws_stream.split();

        let (ping_tx, mut ping_rx) = mpsc::channel::<Message>(16);
        tokio::spawn(async move {
            while let Some(msg) = ping_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(180));
        let ping_tx_clone = ping_tx.clone();
        tokio::spawn(async move {
            loop {
                ping_interval.tick().await;
                if ping_tx_clone
                    .send(Message::Ping(vec![].into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = Self::handle_message(&text, tx).await {
                        warn!("Failed to handle Binance kline message: {}", e);
                    }
                }
                Ok(Message::Ping(_)) => {
                    let _ = ping_tx.send(Message::Pong(vec![].into())).await;
                }
                Ok(Message::Close(frame)) => {
                    info!("Binance kline stream closed by server: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("Binance kline stream read error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn handle_message(text: &str, tx: &mpsc::Sender<KlineEvent>) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct StreamMessage {
            data: serde_json::Value,
        }
        #[derive(Debug, Deserialize)]
        struct KlinePayload {
            #[serde(rename = "s")]
            symbol: String,
            k: KlineFields,
        }
        #[derive(Debug, Deserialize)]
        struct KlineFields {
            #[serde(rename = "t")]
            open_time: i64,
            #[serde(rename = "o")]
            open: String,
            #[serde(rename = "h")]
            high: String,
            #[serde(rename = "l")]
            low: String,
            #[serde(rename = "c")]
            close: String,
            #[serde(rename = "v")]
            volume: String,
            #[serde(rename = "x")]
            is_closed: bool,
        }

        let msg: StreamMessage = serde_json::from_str(text)?;
        let payload: KlinePayload = serde_json::from_value(msg.data)?;

        if !payload.k.is_closed {
            return Ok(());
        }

        let Some(symbol) = normalize_symbol(&payload.symbol) else {
            debug!("Unrecognized symbol in kline stream: {}", payload.symbol);
            return Ok(());
        };

        let bar = Bar::new(
            payload.k.open_time,
            payload
                .k
                .open
                .parse::<f64>()
                .ok()
                .and_then(Decimal::from_f64_retain)
                .unwrap_or_default(),
            payload
                .k
                .high
                .parse::<f64>()
                .ok()
                .and_then(Decimal::from_f64_retain)
                .unwrap_or_default(),
            payload
                .k
                .low
                .parse::<f64>()
                .ok()
                .and_then(Decimal::from_f64_retain)
                .unwrap_or_default(),
            payload
                .k
                .close
                .parse::<f64>()
                .ok()
                .and_then(Decimal::from_f64_retain)
                .unwrap_or_default(),
            payload
                .k
                .volume
                .parse::<f64>()
                .ok()
                .and_then(Decimal::from_f64_retain)
                .unwrap_or_default(),
        );

        let _ = tx.send(KlineEvent { symbol, bar }).await;
        Ok(())
    }
}
