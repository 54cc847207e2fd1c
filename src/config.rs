use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Live,
    Backtest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// CLI surface owned by the driver, not the core: symbol, mode, policy path,
/// historical-data path (backtest), and log level/format.
#[derive(Debug, Parser)]
#[command(name = "gridbot", about = "Hybrid grid/DCA/TP market-making engine")]
pub struct Cli {
    /// Trading symbol, e.g. BTC/USDT
    #[arg(long)]
    pub symbol: String,

    /// live: stream Binance klines and place real orders. backtest: replay historical candles.
    #[arg(long, value_enum)]
    pub mode: Mode,

    /// Path to the TOML policy document.
    #[arg(long, default_value = "policy.toml")]
    pub policy: PathBuf,

    /// Path to a CSV of historical candles (required for backtest mode).
    #[arg(long)]
    pub historical_data: Option<PathBuf>,

    /// Output directory for the CSV reporter.
    #[arg(long, default_value = "out")]
    pub output_dir: PathBuf,

    /// Starting cash, used as the initial lifecycle equity.
    #[arg(long, default_value_t = 10_000.0)]
    pub initial_cash: f64,

    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

pub fn init_logging(cli: &Cli) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.as_filter()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
    Ok(())
}

pub fn load_policy(cli: &Cli) -> Result<crate::domain::policy::Policy> {
    let raw = std::fs::read_to_string(&cli.policy)
        .with_context(|| format!("failed to read policy file at {}", cli.policy.display()))?;
    let document: crate::domain::policy::PolicyDocument = toml::from_str(&raw)
        .with_context(|| format!("failed to parse policy TOML at {}", cli.policy.display()))?;
    document.resolve(&cli.symbol)
}
