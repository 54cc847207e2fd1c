use crate::application::lifecycle::{BarOutcome, OrderLifecycleManager};
use crate::application::planner::OrderPlanner;
use crate::domain::band::{self, BandResolution};
use crate::domain::bar::Bar;
use crate::domain::errors::EngineError;
use crate::domain::gate::{self, DayFrame, GateEvaluation};
use crate::domain::hard_stop::{self, StopState};
use crate::domain::indicators::IndicatorPipeline;
use crate::domain::orders::{Reason, Side};
use crate::domain::plan::Plan;
use crate::domain::policy::Policy;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub plan: Plan,
    pub outcome: BarOutcome,
    pub gate_eval: GateEvaluation,
    /// Cash + position marked at this bar's close, as tracked by the order
    /// lifecycle manager. The driver feeds this back as next bar's exogenous
    /// `equity` input, closing the loop without needing a live broker feed.
    pub equity: Decimal,
}

/// One `Engine` instance owns C1-C6 for a single symbol. `on_bar` is a plain
/// synchronous function: no tokio, no channels, no locks. The execution
/// collaborator (live driver or backtest driver) calls it once per bar and
/// is responsible for all I/O around it.
pub struct Engine {
    symbol: String,
    policy: Policy,
    pipeline: IndicatorPipeline,
    day_frame: DayFrame,
    stop_state: StopState,
    planner: OrderPlanner,
    lifecycle: OrderLifecycleManager,
    bar_index: u64,
    last_bar_timestamp: Option<i64>,
    last_output: Option<EngineOutput>,
}

impl Engine {
    pub fn new(symbol: impl Into<String>, policy: Policy, initial_cash: Decimal) -> Self {
        let symbol = symbol.into();
        Self {
            pipeline: IndicatorPipeline::new(&policy),
            lifecycle: OrderLifecycleManager::new(symbol.clone(), initial_cash),
            planner: OrderPlanner::new(),
            day_frame: DayFrame::default(),
            stop_state: StopState::default(),
            policy,
            symbol,
            bar_index: 0,
            last_bar_timestamp: None,
            last_output: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn cumulative_pnl(&self) -> Decimal {
        self.lifecycle.cumulative_pnl()
    }

    /// Advances the engine by one bar. `equity` is the exogenous portfolio
    /// equity for this bar (broker-reported in live mode, or the previous
    /// bar's lifecycle-tracked equity fed back by the backtest driver so the
    /// loop is self-consistent without a live exchange). Returns `None` when
    /// the bar is dropped: non-finite/invalid OHLCV, a duplicate timestamp
    /// (R1), or an out-of-order arrival.
    pub fn on_bar(
        &mut self,
        bar: Bar,
        equity: Decimal,
    ) -> Result<Option<EngineOutput>, EngineError> {
        if let Some(last_ts) = self.last_bar_timestamp {
            if bar.timestamp == last_ts {
                return Ok(self.last_output.clone());
            }
            if bar.timestamp < last_ts {
                warn!(symbol = %self.symbol, timestamp = bar.timestamp, "dropping out-of-order bar");
                return Ok(None);
            }
        }

        if !self.pipeline.on_bar(&bar) {
            warn!(symbol = %self.symbol, timestamp = bar.timestamp, "skipped invalid bar");
            return Ok(None);
        }

        self.last_bar_timestamp = Some(bar.timestamp);

        let equity_f64 = equity.to_f64().unwrap_or(0.0);
        self.day_frame.maybe_roll(&bar, equity_f64);

        let close_f64 = bar.close.to_f64().unwrap_or(0.0);
        let gate_eval = gate::evaluate(&self.policy, &self.day_frame, close_f64, equity_f64);

        let snapshot = self.pipeline.current();
        let previous = self.pipeline.previous();

        hard_stop::step(
            &self.policy,
            &mut self.stop_state,
            &gate_eval,
            close_f64,
            snapshot.rsi,
            bar.timestamp,
        );

        let band_res: BandResolution = match (snapshot.atr_pct, snapshot.rsi) {
            (Some(atr_pct), Some(rsi)) => band::resolve(&self.policy, atr_pct, rsi),
            _ => BandResolution {
                band: crate::domain::band::Band::Near,
                spread_pct: self.policy.spread_near_pct,
                tp_spread_pct: self.policy.tp_spread_near_pct,
            },
        };

        let plan = self.planner.plan(
            &self.policy,
            gate_eval.state,
            &self.stop_state,
            &snapshot,
            &band_res,
            close_f64,
            bar.timestamp,
            self.bar_index,
        );

        let cash_before = self.lifecycle.cash();

        let outcome = self.lifecycle.on_bar(
            &bar,
            &plan,
            &self.policy,
            snapshot.rsi,
            snapshot.atr_pct,
            previous.atr_pct,
        );

        self.check_duplicate_ids()?;
        self.check_equity_consistency(cash_before, &outcome)?;

        for fill in &outcome.fills {
            if fill.reason == Reason::Dca {
                self.planner
                    .record_dca_fill(fill.fill_price.to_f64().unwrap_or(0.0), self.bar_index);
            }
        }

        self.bar_index += 1;

        let tracked_equity = self.lifecycle.equity(bar.close);
        let output = EngineOutput {
            plan,
            outcome,
            gate_eval,
            equity: tracked_equity,
        };
        self.last_output = Some(output.clone());
        Ok(Some(output))
    }

    /// Reconstructs cash purely from this bar's `Fill` log and compares it
    /// against the lifecycle manager's actual post-bar cash, independent of
    /// whichever internal path produced it. Catches a fee-sign or
    /// fill-application bug the moment it diverges from the ledger it
    /// claims to have produced.
    fn check_equity_consistency(
        &self,
        cash_before: Decimal,
        outcome: &BarOutcome,
    ) -> Result<(), EngineError> {
        let mut reconstructed = cash_before;
        for fill in &outcome.fills {
            let notional = fill.fill_price * fill.fill_qty;
            reconstructed += match fill.side {
                Side::Buy => -(notional + fill.fee),
                Side::Sell => notional - fill.fee,
            };
        }

        let cash_after = self.lifecycle.cash();
        let diff = (cash_after - reconstructed).abs();
        if diff > Decimal::new(1, 8) {
            return Err(EngineError::EquityMismatch {
                symbol: self.symbol.clone(),
                cash: cash_after.to_string(),
                reconstructed: reconstructed.to_string(),
                diff: diff.to_string(),
            });
        }
        Ok(())
    }

    fn check_duplicate_ids(&self) -> Result<(), EngineError> {
        let orders = self.lifecycle.live_orders();
        for (i, a) in orders.iter().enumerate() {
            for b in &orders[i + 1..] {
                if a.id == b.id {
                    return Err(EngineError::DuplicateOrderId {
                        symbol: self.symbol.clone(),
                        order_id: a.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
