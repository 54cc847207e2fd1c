use crate::application::engine::EngineOutput;
use crate::domain::orders::PendingOrder;
use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;

#[derive(Debug, Serialize)]
struct OrderRecord<'a> {
    id: &'a str,
    symbol: &'a str,
    side: String,
    price: String,
    quantity: String,
    reason: String,
    tag: &'a str,
    placed_at: i64,
    status: String,
}

#[derive(Debug, Serialize)]
struct FillRecord<'a> {
    order_id: &'a str,
    fill_price: String,
    fill_qty: String,
    fee: String,
    fee_asset: &'a str,
    realized_pnl: String,
    cumulative_pnl: String,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct SessionSummary<'a> {
    symbol: &'a str,
    bars_processed: u64,
    fills: u64,
    realized_pnl: String,
    final_equity: String,
    stop_events: u64,
}

/// Append-only CSV sink for orders, fills, and the final session summary.
/// Fed by the same discrete events the execution collaborator produces; it
/// only ever appends and never mutates engine state.
pub struct CsvReporter {
    orders: Writer<std::fs::File>,
    fills: Writer<std::fs::File>,
    summary_path: std::path::PathBuf,
    bars_processed: u64,
    fills_count: u64,
    stop_events: u64,
}

impl CsvReporter {
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("failed to create output directory {}", output_dir.display())
        })?;

        let orders_path = output_dir.join("orders.csv");
        let fills_path = output_dir.join("fills.csv");
        let summary_path = output_dir.join("session_summary.csv");

        let orders_existed = orders_path.exists();
        let fills_existed = fills_path.exists();

        let orders_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&orders_path)
            .with_context(|| format!("failed to open {}", orders_path.display()))?;
        let fills_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&fills_path)
            .with_context(|| format!("failed to open {}", fills_path.display()))?;

        let orders = Writer::from_writer(orders_file);
        let fills = Writer::from_writer(fills_file);

        let mut reporter = Self {
            orders,
            fills,
            summary_path,
            bars_processed: 0,
            fills_count: 0,
            stop_events: 0,
        };
        if !orders_existed {
            reporter.orders.write_record([
                "id",
                "symbol",
                "side",
                "price",
                "quantity",
                "reason",
                "tag",
                "placed_at",
                "status",
            ])?;
            reporter.orders.flush()?;
        }
        if !fills_existed {
            reporter.fills.write_record([
                "order_id",
                "fill_price",
                "fill_qty",
                "fee",
                "fee_asset",
                "realized_pnl",
                "cumulative_pnl",
                "timestamp",
            ])?;
            reporter.fills.flush()?;
        }
        Ok(reporter)
    }

    pub fn record_order(&mut self, symbol: &str, order: &PendingOrder) -> Result<()> {
        self.orders.serialize(OrderRecord {
            id: &order.id,
            symbol,
            side: order.side.to_string(),
            price: order.price.to_string(),
            quantity: order.quantity.to_string(),
            reason: order.reason.to_string(),
            tag: &order.tag,
            placed_at: order.placed_at,
            status: order.status.to_string(),
        })?;
        self.orders.flush()?;
        Ok(())
    }

    pub fn record_output(&mut self, symbol: &str, output: &EngineOutput) -> Result<()> {
        self.bars_processed += 1;
        if output.plan.sl_action.stop {
            self.stop_events += 1;
        }

        for order in &output.outcome.placements {
            self.record_order(symbol, order)?;
        }

        for fill in &output.outcome.fills {
            self.fills_count += 1;
            self.fills.serialize(FillRecord {
                order_id: &fill.order_id,
                fill_price: fill.fill_price.to_string(),
                fill_qty: fill.fill_qty.to_string(),
                fee: fill.fee.to_string(),
                fee_asset: &fill.fee_asset,
                realized_pnl: fill.realized_pnl.map(|p| p.to_string()).unwrap_or_default(),
                cumulative_pnl: fill.cumulative_pnl.to_string(),
                timestamp: fill.timestamp,
            })?;
        }
        self.fills.flush()?;
        Ok(())
    }

    pub fn write_summary(
        &self,
        symbol: &str,
        realized_pnl: &str,
        final_equity: &str,
    ) -> Result<()> {
        let mut writer = Writer::from_path(&self.summary_path)
            .with_context(|| format!("failed to open {}", self.summary_path.display()))?;
        writer.serialize(SessionSummary {
            symbol,
            bars_processed: self.bars_processed,
            fills: self.fills_count,
            realized_pnl: realized_pnl.to_string(),
            final_equity: final_equity.to_string(),
            stop_events: self.stop_events,
        })?;
        writer.flush()?;
        Ok(())
    }
}
