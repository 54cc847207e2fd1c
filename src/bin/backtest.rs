use anyhow::{Context, Result};
use clap::Parser;
use gridbot::application::engine::Engine;
use gridbot::application::reporter::CsvReporter;
use gridbot::config::{Cli, Mode, init_logging, load_policy};
use gridbot::domain::bar::Bar;
use rust_decimal::Decimal;
use tracing::{error, info};

/// Replays historical candles from a CSV source through the same
/// `Engine::on_bar` the live driver uses, without any network I/O. This is
/// how the engine's end-to-end scenarios and the R1 replay idempotence
/// property are exercised outside of unit tests.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    if cli.mode != Mode::Backtest {
        anyhow::bail!(
            "backtest binary invoked with mode={:?}; use --mode backtest",
            cli.mode
        );
    }
    let historical_path = cli
        .historical_data
        .as_ref()
        .context("--historical-data is required in backtest mode")?;

    let policy = load_policy(&cli)?;
    let bars = read_candles(historical_path)?;
    info!(symbol = %cli.symbol, bars = bars.len(), "loaded historical candles");

    let initial_cash = Decimal::try_from(cli.initial_cash).unwrap_or(Decimal::new(10_000, 0));
    let mut engine = Engine::new(cli.symbol.clone(), policy, initial_cash);
    let mut reporter = CsvReporter::new(&cli.output_dir)?;

    let mut equity = initial_cash;
    for bar in bars {
        match engine.on_bar(bar, equity) {
            Ok(Some(output)) => {
                equity = output.equity;
                reporter.record_output(&cli.symbol, &output)?;
            }
            Ok(None) => {}
            Err(e) => {
                error!(symbol = %cli.symbol, error = %e, "fatal engine invariant breach");
                anyhow::bail!(e);
            }
        }
    }

    let final_equity = engine.cumulative_pnl();
    reporter.write_summary(&cli.symbol, &final_equity.to_string(), &equity.to_string())?;
    info!(symbol = %cli.symbol, %equity, "backtest complete");
    Ok(())
}

/// Reads a CSV of `timestamp,open,high,low,close,volume` rows.
fn read_candles(path: &std::path::Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open historical data at {}", path.display()))?;
    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.context("failed to read historical-data row")?;
        let timestamp: i64 = record.get(0).context("missing timestamp column")?.parse()?;
        let open: Decimal = record.get(1).context("missing open column")?.parse()?;
        let high: Decimal = record.get(2).context("missing high column")?.parse()?;
        let low: Decimal = record.get(3).context("missing low column")?.parse()?;
        let close: Decimal = record.get(4).context("missing close column")?.parse()?;
        let volume: Decimal = record.get(5).context("missing volume column")?.parse()?;
        bars.push(Bar::new(timestamp, open, high, low, close, volume));
    }
    Ok(bars)
}
