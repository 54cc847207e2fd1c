use anyhow::{Context, Result};
use clap::Parser;
use gridbot::application::engine::Engine;
use gridbot::application::reporter::CsvReporter;
use gridbot::config::{Cli, Mode, init_logging, load_policy};
use gridbot::infrastructure::binance::execution::BinanceExecutionClient;
use gridbot::infrastructure::binance::market_data::BinanceMarketDataClient;
use gridbot::infrastructure::binance::websocket::BinanceMarketDataStream;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const BINANCE_REST_BASE: &str = "https://api.binance.com";
const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443";
const KLINE_INTERVAL: &str = "1m";
const WARMUP_BARS: u32 = 500;

/// Runs one symbol against live Binance klines. `Engine::on_bar` stays a
/// plain synchronous call; all I/O — streaming, REST warmup, order
/// placement/cancellation — happens around it in this binary.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    if cli.mode != Mode::Live {
        anyhow::bail!(
            "live binary invoked with mode={:?}; use --mode live",
            cli.mode
        );
    }

    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        warn!(
            "BINANCE_API_KEY / BINANCE_API_SECRET not set; order placement will be rejected by the exchange"
        );
    }

    let policy = load_policy(&cli)?;
    let initial_cash = Decimal::try_from(cli.initial_cash).unwrap_or(Decimal::new(10_000, 0));
    let mut engine = Engine::new(cli.symbol.clone(), policy, initial_cash);
    let mut reporter = CsvReporter::new(&cli.output_dir)?;

    let market_data = BinanceMarketDataClient::new(BINANCE_REST_BASE);
    let execution = BinanceExecutionClient::new(api_key, api_secret, BINANCE_REST_BASE.to_string());

    let mut equity = initial_cash;
    info!(symbol = %cli.symbol, "backfilling warmup history");
    let warmup = market_data
        .fetch_historical_bars(&cli.symbol, KLINE_INTERVAL, None, None, WARMUP_BARS)
        .await
        .context("failed to backfill warmup history")?;
    for bar in warmup {
        if let Ok(Some(output)) = engine.on_bar(bar, equity) {
            equity = output.equity;
        }
    }

    let (tx, mut rx) = mpsc::channel(256);
    let stream = BinanceMarketDataStream::new(BINANCE_WS_BASE, KLINE_INTERVAL);
    let symbol_for_stream = vec![cli.symbol.clone()];
    tokio::spawn(async move {
        stream.run(symbol_for_stream, tx).await;
    });

    info!(symbol = %cli.symbol, "entering live loop");
    while let Some(event) = rx.recv().await {
        if event.symbol != cli.symbol {
            continue;
        }

        match engine.on_bar(event.bar, equity) {
            Ok(Some(output)) => {
                equity = output.equity;
                if let Err(e) = reporter.record_output(&cli.symbol, &output) {
                    warn!(error = %e, "failed to append reporter output");
                }

                for order in &output.outcome.placements {
                    match execution.place_limit_order(order).await {
                        Ok(ack) => info!(?ack, "order placement acked"),
                        Err(e) => warn!(order_id = %order.id, error = %e, "order placement failed"),
                    }
                }
                for cancellation in &output.outcome.cancellations {
                    match execution
                        .cancel_order(&cli.symbol, &cancellation.order_id)
                        .await
                    {
                        Ok(ack) => info!(?ack, "cancellation acked"),
                        Err(e) => {
                            warn!(order_id = %cancellation.order_id, error = %e, "cancellation failed")
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(symbol = %cli.symbol, error = %e, "fatal engine invariant breach, stopping");
                return Err(e.into());
            }
        }
    }

    Ok(())
}
