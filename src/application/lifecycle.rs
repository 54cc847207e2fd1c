use crate::domain::bar::Bar;
use crate::domain::orders::{
    Fill, OrderIntent, OrderStatus, PendingOrder, Reason, Side, rounded_tick,
};
use crate::domain::plan::Plan;
use crate::domain::policy::Policy;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub order_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub tag: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BarOutcome {
    pub fills: Vec<Fill>,
    pub cancellations: Vec<Cancellation>,
    pub placements: Vec<PendingOrder>,
    pub rejections: Vec<Rejection>,
}

/// Owns the live-order set for a single symbol and the cash/position
/// bookkeeping that backs the equity invariant. Exclusively owned by the
/// engine; no other component mutates it.
#[derive(Debug)]
pub struct OrderLifecycleManager {
    symbol: String,
    live_orders: Vec<PendingOrder>,
    cash: Decimal,
    position_qty: Decimal,
    avg_entry_price: Decimal,
    cumulative_pnl: Decimal,
}

impl OrderLifecycleManager {
    pub fn new(symbol: impl Into<String>, initial_cash: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            live_orders: Vec::new(),
            cash: initial_cash,
            position_qty: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            cumulative_pnl: Decimal::ZERO,
        }
    }

    pub fn live_orders(&self) -> &[PendingOrder] {
        &self.live_orders
    }

    pub fn equity(&self, mark_price: Decimal) -> Decimal {
        self.cash + self.position_qty * mark_price
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn cumulative_pnl(&self) -> Decimal {
        self.cumulative_pnl
    }

    /// Advances the lifecycle by one bar: fill detection, then cancellation
    /// sweep, then plan application, in that fixed order (a same-bar fill
    /// must settle against the old grid before kill-replace wipes it).
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        plan: &Plan,
        policy: &Policy,
        current_rsi: Option<f64>,
        atr_pct: Option<f64>,
        previous_atr_pct: Option<f64>,
    ) -> BarOutcome {
        let mut outcome = BarOutcome::default();

        self.detect_fills(bar, policy, &mut outcome);
        self.sweep_cancellations(
            bar,
            policy,
            current_rsi,
            atr_pct,
            previous_atr_pct,
            &mut outcome,
        );

        if plan.kill_replace {
            self.cancel_all_grid_orders(bar.timestamp, "kill-replace", &mut outcome);
        }

        for intent in plan
            .grid_orders
            .iter()
            .chain(plan.dca_orders.iter())
            .chain(plan.tp_orders.iter())
        {
            self.apply_intent(bar, policy, intent, current_rsi, &mut outcome);
        }

        outcome
    }

    fn detect_fills(&mut self, bar: &Bar, policy: &Policy, outcome: &mut BarOutcome) {
        let mut still_live = Vec::with_capacity(self.live_orders.len());
        let orders = std::mem::take(&mut self.live_orders);

        for mut order in orders {
            let fills = match order.side {
                Side::Buy => bar.low <= order.price,
                Side::Sell => bar.high >= order.price,
            };

            if !fills {
                still_live.push(order);
                continue;
            }

            let fill_price = order.price;
            let fill_qty = order.quantity;
            let fill_value = fill_price * fill_qty;
            let fee_fraction =
                Decimal::try_from(policy.effective_taker_fee_fraction()).unwrap_or(Decimal::ZERO);
            let fee = fill_value * fee_fraction;

            let realized_pnl = match order.side {
                Side::Buy => {
                    let new_qty = self.position_qty + fill_qty;
                    self.avg_entry_price = if self.position_qty.is_zero() {
                        fill_price
                    } else {
                        (self.avg_entry_price * self.position_qty + fill_price * fill_qty) / new_qty
                    };
                    self.position_qty = new_qty;
                    self.cash -= fill_value + fee;
                    None
                }
                Side::Sell => {
                    let pnl = fill_qty * (fill_price - self.avg_entry_price) - fee;
                    self.position_qty -= fill_qty;
                    if self.position_qty < Decimal::ZERO {
                        self.position_qty = Decimal::ZERO;
                    }
                    self.cash += fill_value - fee;
                    self.cumulative_pnl += pnl;
                    Some(pnl)
                }
            };

            order.status = OrderStatus::Filled;
            info!(
                symbol = %self.symbol,
                order_id = %order.id,
                side = %order.side,
                price = %fill_price,
                "order filled"
            );

            outcome.fills.push(Fill {
                order_id: order.id.clone(),
                side: order.side,
                reason: order.reason,
                tag: order.tag.clone(),
                fill_price,
                fill_qty,
                fee,
                fee_asset: "USDT".to_string(),
                realized_pnl,
                cumulative_pnl: self.cumulative_pnl,
                timestamp: bar.timestamp,
            });
        }

        self.live_orders = still_live;
    }

    fn sweep_cancellations(
        &mut self,
        bar: &Bar,
        policy: &Policy,
        current_rsi: Option<f64>,
        atr_pct: Option<f64>,
        previous_atr_pct: Option<f64>,
        outcome: &mut BarOutcome,
    ) {
        let close_f64 = bar.close.to_f64().unwrap_or(0.0);

        let volatility_spike = policy.order_cancel_on_volatility_spike
            && atr_pct.zip(previous_atr_pct).is_some_and(|(now, prev)| {
                prev > 0.0 && now >= prev * policy.order_volatility_spike_threshold
            });

        if volatility_spike {
            self.cancel_all_grid_orders(bar.timestamp, "volatility spike", outcome);
        }

        let mut still_live = Vec::with_capacity(self.live_orders.len());
        let orders = std::mem::take(&mut self.live_orders);

        for order in orders {
            let age_seconds = (bar.timestamp - order.placed_at) as f64 / 1000.0;
            if age_seconds >= policy.order_max_age_seconds as f64 {
                self.push_cancellation(order, "age", bar.timestamp, outcome);
                continue;
            }

            let order_price_f64 = order.price.to_f64().unwrap_or(0.0);
            if order_price_f64 > 0.0 {
                let drift_pct = (close_f64 - order_price_f64).abs() / order_price_f64 * 100.0;
                if drift_pct >= policy.order_price_drift_threshold_pct {
                    self.push_cancellation(order, "price drift", bar.timestamp, outcome);
                    continue;
                }
            }

            if policy.order_cancel_on_rsi_reversal
                && let (Some(initial), Some(current)) = (order.initial_rsi, current_rsi)
            {
                let reversed = match order.side {
                    Side::Buy => initial < 40.0 && current > 60.0,
                    Side::Sell => initial > 60.0 && current < 40.0,
                };
                if reversed && (current - initial).abs() >= policy.order_rsi_reversal_threshold {
                    self.push_cancellation(order, "RSI reversal", bar.timestamp, outcome);
                    continue;
                }
            }

            still_live.push(order);
        }

        self.live_orders = still_live;
    }

    fn cancel_all_grid_orders(&mut self, timestamp: i64, reason: &str, outcome: &mut BarOutcome) {
        let orders = std::mem::take(&mut self.live_orders);
        let (grid, rest): (Vec<_>, Vec<_>) =
            orders.into_iter().partition(|o| o.reason == Reason::Grid);
        for order in grid {
            self.push_cancellation(order, reason, timestamp, outcome);
        }
        self.live_orders = rest;
    }

    fn push_cancellation(
        &self,
        mut order: PendingOrder,
        reason: &str,
        _timestamp: i64,
        outcome: &mut BarOutcome,
    ) {
        order.status = OrderStatus::Cancelled;
        debug!(symbol = %self.symbol, order_id = %order.id, reason, "order cancelled");
        outcome.cancellations.push(Cancellation {
            order_id: order.id,
            reason: reason.to_string(),
        });
    }

    /// Cancellation is idempotent: cancelling an id that is no longer live
    /// (already filled, already cancelled, or unknown) is a no-op.
    pub fn cancel(&mut self, order_id: &str, reason: &str) -> Option<Cancellation> {
        let idx = self.live_orders.iter().position(|o| o.id == order_id)?;
        let order = self.live_orders.remove(idx);
        let cancellation = Cancellation {
            order_id: order.id,
            reason: reason.to_string(),
        };
        Some(cancellation)
    }

    fn apply_intent(
        &mut self,
        bar: &Bar,
        policy: &Policy,
        intent: &OrderIntent,
        current_rsi: Option<f64>,
        outcome: &mut BarOutcome,
    ) {
        let target_tick = rounded_tick(intent.price);
        let collides = self.live_orders.iter().any(|o| {
            o.side == intent.side && rounded_tick(o.price.to_f64().unwrap_or(0.0)) == target_tick
        });
        if collides {
            return;
        }

        let price = match Decimal::try_from(intent.price) {
            Ok(p) => p,
            Err(_) => return,
        };
        if price <= Decimal::ZERO {
            return;
        }
        let quantity = match Decimal::try_from(policy.order_quantity_usd / intent.price) {
            Ok(q) => q,
            Err(_) => return,
        };
        let value = price * quantity;

        let min_notional = Decimal::try_from(policy.min_notional).unwrap_or(Decimal::ZERO);
        if value < min_notional {
            warn!(symbol = %self.symbol, tag = %intent.tag, %value, "order intent too small, skipped");
            outcome.rejections.push(Rejection {
                tag: intent.tag.clone(),
                reason: "too small".to_string(),
            });
            return;
        }

        let order = PendingOrder {
            id: Uuid::new_v4().to_string(),
            symbol: self.symbol.clone(),
            side: intent.side,
            price,
            quantity,
            value,
            placed_at: bar.timestamp,
            initial_rsi: current_rsi,
            reason: intent.reason,
            tag: intent.tag.clone(),
            status: OrderStatus::New,
        };

        debug!(symbol = %self.symbol, order_id = %order.id, side = %order.side, %price, "order placed");
        self.live_orders.push(order.clone());
        outcome.placements.push(order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::band::Band;
    use crate::domain::gate::GateState;
    use crate::domain::orders::Side;
    use rust_decimal_macros::dec;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(
            ts,
            Decimal::try_from(open).unwrap(),
            Decimal::try_from(high).unwrap(),
            Decimal::try_from(low).unwrap(),
            Decimal::try_from(close).unwrap(),
            dec!(1),
        )
    }

    fn plan_with_grid() -> Plan {
        let mut plan = Plan::empty(GateState::Run, Band::Mid, 0.5, 100.0);
        plan.kill_replace = true;
        plan.grid_orders = vec![
            crate::domain::orders::OrderIntent::new(Side::Buy, 99.5, "grid_buy_1", Reason::Grid),
            crate::domain::orders::OrderIntent::new(Side::Sell, 100.5, "grid_sell_1", Reason::Grid),
        ];
        plan
    }

    #[test]
    fn placing_then_filling_buy_updates_cash_and_equity() {
        let mut mgr = OrderLifecycleManager::new("BTC/USDT", dec!(10000));
        let policy = Policy::default();
        let b1 = bar(0, 100.0, 100.5, 99.5, 100.0);
        let outcome = mgr.on_bar(
            &b1,
            &plan_with_grid(),
            &policy,
            Some(50.0),
            Some(1.0),
            Some(1.0),
        );
        assert_eq!(outcome.placements.len(), 2);

        let b2 = bar(1000, 100.0, 100.3, 99.0, 100.0); // dips to 99.0, fills the 99.5 buy only
        let empty_plan = Plan::empty(GateState::Run, Band::Mid, 0.5, 100.0);
        let outcome2 = mgr.on_bar(&b2, &empty_plan, &policy, Some(50.0), Some(1.0), Some(1.0));
        assert_eq!(outcome2.fills.len(), 1);
        assert_eq!(outcome2.fills[0].fill_price, dec!(99.5));

        let equity = mgr.equity(dec!(100.0));
        let expected_cash = dec!(10000)
            - dec!(99.5) * outcome2.fills[0].fill_qty
            - outcome2.fills[0].fill_qty
                * dec!(99.5)
                * Decimal::try_from(policy.effective_taker_fee_fraction()).unwrap();
        let expected_equity = expected_cash + outcome2.fills[0].fill_qty * dec!(100.0);
        assert!((equity - expected_equity).abs() < dec!(0.0001));
    }

    #[test]
    fn cancellation_by_price_drift_matches_scenario_6() {
        let mut mgr = OrderLifecycleManager::new("BTC/USDT", dec!(10000));
        let policy = Policy::default();

        let b1 = bar(0, 100.0, 100.0, 100.0, 100.0);
        let mut plan = Plan::empty(GateState::Run, Band::Mid, 0.5, 100.0);
        plan.grid_orders = vec![crate::domain::orders::OrderIntent::new(
            Side::Buy,
            100.0,
            "grid_buy_1",
            Reason::Grid,
        )];
        mgr.on_bar(&b1, &plan, &policy, Some(50.0), Some(1.0), Some(1.0));
        assert_eq!(mgr.live_orders().len(), 1);

        // four minutes later (before the order-max-age threshold), close drifts
        // to 102.05 (> 2% drift threshold), no new fill condition
        let b2 = bar(4 * 60_000, 102.05, 102.1, 101.9, 102.05);
        let empty_plan = Plan::empty(GateState::Run, Band::Mid, 0.5, 102.05);
        let outcome = mgr.on_bar(&b2, &empty_plan, &policy, Some(50.0), Some(1.0), Some(1.0));
        assert_eq!(outcome.cancellations.len(), 1);
        assert_eq!(outcome.cancellations[0].reason, "price drift");
        assert!(mgr.live_orders().is_empty());
    }

    #[test]
    fn duplicate_price_and_side_intent_is_rejected_silently() {
        let mut mgr = OrderLifecycleManager::new("BTC/USDT", dec!(10000));
        let policy = Policy::default();
        let b1 = bar(0, 100.0, 100.5, 99.6, 100.0);
        let mut plan = Plan::empty(GateState::Run, Band::Mid, 0.5, 100.0);
        plan.grid_orders = vec![crate::domain::orders::OrderIntent::new(
            Side::Buy,
            99.5,
            "grid_buy_1",
            Reason::Grid,
        )];
        mgr.on_bar(
            &b1,
            &plan.clone(),
            &policy,
            Some(50.0),
            Some(1.0),
            Some(1.0),
        );
        let outcome = mgr.on_bar(&b1, &plan, &policy, Some(50.0), Some(1.0), Some(1.0));
        assert!(outcome.placements.is_empty());
        assert_eq!(mgr.live_orders().len(), 1);
    }

    #[test]
    fn notional_below_minimum_is_rejected() {
        let mut mgr = OrderLifecycleManager::new("BTC/USDT", dec!(10000));
        let mut policy = Policy::default();
        policy.order_quantity_usd = 1.0; // below min_notional of 11.0
        let b1 = bar(0, 100.0, 100.5, 99.5, 100.0);
        let mut plan = Plan::empty(GateState::Run, Band::Mid, 0.5, 100.0);
        plan.grid_orders = vec![crate::domain::orders::OrderIntent::new(
            Side::Buy,
            99.5,
            "grid_buy_1",
            Reason::Grid,
        )];
        let outcome = mgr.on_bar(&b1, &plan, &policy, Some(50.0), Some(1.0), Some(1.0));
        assert!(outcome.placements.is_empty());
        assert_eq!(outcome.rejections.len(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut mgr = OrderLifecycleManager::new("BTC/USDT", dec!(10000));
        let policy = Policy::default();
        let b1 = bar(0, 100.0, 100.5, 99.5, 100.0);
        mgr.on_bar(
            &b1,
            &plan_with_grid(),
            &policy,
            Some(50.0),
            Some(1.0),
            Some(1.0),
        );
        let id = mgr.live_orders()[0].id.clone();
        assert!(mgr.cancel(&id, "manual").is_some());
        assert!(mgr.cancel(&id, "manual").is_none());
    }

    #[test]
    fn kill_replace_wipes_grid_but_not_dca_or_tp() {
        let mut mgr = OrderLifecycleManager::new("BTC/USDT", dec!(10000));
        let policy = Policy::default();
        let b1 = bar(0, 100.0, 100.5, 99.5, 100.0);
        let mut plan = plan_with_grid();
        plan.dca_orders = vec![crate::domain::orders::OrderIntent::new(
            Side::Buy,
            95.0,
            "dca",
            Reason::Dca,
        )];
        mgr.on_bar(&b1, &plan, &policy, Some(30.0), Some(1.0), Some(1.0));
        assert_eq!(mgr.live_orders().len(), 3);

        let b2 = bar(200_000, 96.0, 96.5, 95.5, 96.0);
        let mut plan2 = Plan::empty(GateState::Run, Band::Mid, 0.5, 96.0);
        plan2.kill_replace = true;
        let outcome = mgr.on_bar(&b2, &plan2, &policy, Some(30.0), Some(1.0), Some(1.0));
        // both grid orders cancelled (drift also triggers on one of them, but
        // kill_replace alone accounts for all grid orders being gone)
        assert!(mgr.live_orders().iter().all(|o| o.reason != Reason::Grid));
        assert!(mgr.live_orders().iter().any(|o| o.reason == Reason::Dca));
        assert!(!outcome.cancellations.is_empty());
    }
}
