use crate::domain::band::BandResolution;
use crate::domain::gate::GateState;
use crate::domain::hard_stop::StopState;
use crate::domain::indicators::Snapshot;
use crate::domain::orders::{OrderIntent, Reason, Side};
use crate::domain::plan::Plan;
use crate::domain::policy::Policy;

/// Emits grid/DCA/TP intents for a bar, honoring cooldowns, kill-replace
/// thresholds, and gate/stop suppression. Owns the cross-bar state needed to
/// evaluate those cooldowns: the last grid's reference price and timestamp,
/// and the last DCA fill's price and bar index.
#[derive(Debug, Default)]
pub struct OrderPlanner {
    last_grid_ref_price: Option<f64>,
    last_grid_timestamp_ms: Option<i64>,
    last_dca_fill_price: Option<f64>,
    last_dca_fill_bar_index: Option<u64>,
}

impl OrderPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the engine whenever the lifecycle manager reports a DCA
    /// fill, so gate 3/4 of the next bar's DCA evaluation see it.
    pub fn record_dca_fill(&mut self, price: f64, bar_index: u64) {
        self.last_dca_fill_price = Some(price);
        self.last_dca_fill_bar_index = Some(bar_index);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plan(
        &mut self,
        policy: &Policy,
        gate_state: GateState,
        stop_state: &StopState,
        snapshot: &Snapshot,
        band_res: &BandResolution,
        ref_price: f64,
        timestamp_ms: i64,
        bar_index: u64,
    ) -> Plan {
        if stop_state.active {
            return Plan::stopped(
                gate_state,
                stop_state.reason.as_str().to_string(),
                band_res.band,
                ref_price,
            );
        }

        if gate_state == GateState::Paused {
            return Plan::empty(gate_state, band_res.band, band_res.spread_pct, ref_price);
        }

        let mut plan = Plan::empty(gate_state, band_res.band, band_res.spread_pct, ref_price);

        if gate_state == GateState::Run
            && let Some(grid) = self.plan_grid(policy, ref_price, band_res.spread_pct, timestamp_ms)
        {
            plan.grid_orders = grid;
            plan.kill_replace = true;
        }

        if let Some(rsi) = snapshot.rsi {
            if let Some(dca) = self.plan_dca(policy, snapshot, rsi, ref_price, bar_index) {
                plan.dca_orders = vec![dca];
            }
            if let Some(tp) = self.plan_tp(policy, snapshot, rsi, ref_price, band_res.tp_spread_pct)
            {
                plan.tp_orders = vec![tp];
            }
        }

        plan
    }

    fn plan_grid(
        &mut self,
        policy: &Policy,
        ref_price: f64,
        spread_pct: f64,
        timestamp_ms: i64,
    ) -> Option<Vec<OrderIntent>> {
        if !policy.grid_enabled {
            return None;
        }

        let drift_pct = match self.last_grid_ref_price {
            Some(last) if last != 0.0 => (ref_price - last).abs() / last * 100.0,
            _ => f64::INFINITY,
        };

        if let Some(last_ts) = self.last_grid_timestamp_ms {
            let elapsed_seconds = (timestamp_ms - last_ts) as f64 / 1000.0;
            if elapsed_seconds < policy.grid_min_seconds_between as f64 {
                return None;
            }
        }

        if drift_pct < policy.grid_kill_replace_threshold_pct {
            return None;
        }

        let n = policy.grid_levels_per_side;
        let mut intents = Vec::with_capacity(n * 2);
        for k in 1..=n {
            let kf = k as f64;
            let buy_price = ref_price * (1.0 - spread_pct * kf / 100.0);
            intents.push(OrderIntent::new(
                Side::Buy,
                buy_price,
                format!("grid_buy_{k}"),
                Reason::Grid,
            ));
        }
        for k in 1..=n {
            let kf = k as f64;
            let sell_price = ref_price * (1.0 + spread_pct * kf / 100.0);
            intents.push(OrderIntent::new(
                Side::Sell,
                sell_price,
                format!("grid_sell_{k}"),
                Reason::Grid,
            ));
        }

        self.last_grid_ref_price = Some(ref_price);
        self.last_grid_timestamp_ms = Some(timestamp_ms);

        Some(intents)
    }

    fn plan_dca(
        &self,
        policy: &Policy,
        snapshot: &Snapshot,
        rsi: f64,
        close: f64,
        bar_index: u64,
    ) -> Option<OrderIntent> {
        if !policy.dca_enabled {
            return None;
        }
        if rsi >= policy.dca_rsi_threshold {
            return None;
        }
        if policy.dca_use_ema_gate {
            let Some(ema_fast) = snapshot.ema_fast else {
                return None;
            };
            if close >= ema_fast {
                return None;
            }
        }

        if let Some(last_fill_bar) = self.last_dca_fill_bar_index {
            let bars_since = bar_index.saturating_sub(last_fill_bar);
            if bars_since < policy.dca_cooldown_bars as u64 {
                return None;
            }
        }

        if let Some(last_price) = self.last_dca_fill_price
            && last_price != 0.0
        {
            let distance_pct = (close - last_price).abs() / last_price * 100.0;
            if distance_pct < policy.dca_min_distance_from_last_fill_pct {
                return None;
            }
        }

        let price = close * (1.0 - policy.dca_price_offset_pct / 100.0);
        Some(OrderIntent::new(
            Side::Buy,
            price,
            format!("dca_rsi_{rsi:.1}"),
            Reason::Dca,
        ))
    }

    fn plan_tp(
        &self,
        policy: &Policy,
        snapshot: &Snapshot,
        rsi: f64,
        close: f64,
        tp_spread_pct: f64,
    ) -> Option<OrderIntent> {
        if !policy.tp_enabled {
            return None;
        }
        if rsi <= policy.tp_rsi_threshold {
            return None;
        }
        let Some(ema_fast) = snapshot.ema_fast else {
            return None;
        };
        if close <= ema_fast {
            return None;
        }

        let price = close * (1.0 + tp_spread_pct / 100.0);
        Some(OrderIntent::new(
            Side::Sell,
            price,
            format!("tp_rsi_{rsi:.1}"),
            Reason::Tp,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::band::Band;
    use crate::domain::hard_stop::Reason as StopReason;

    fn assert_prices_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "actual={actual:?} expected={expected:?}"
        );
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(
                (a - e).abs() < 1e-6,
                "actual={actual:?} expected={expected:?}"
            );
        }
    }

    fn band_res() -> BandResolution {
        BandResolution {
            band: Band::Mid,
            spread_pct: 0.5,
            tp_spread_pct: 0.8,
        }
    }

    fn snapshot(rsi: f64, ema_fast: f64) -> Snapshot {
        Snapshot {
            rsi: Some(rsi),
            atr: Some(1.0),
            atr_pct: Some(1.2),
            ema_fast: Some(ema_fast),
            ema_mid: Some(ema_fast),
            ema_slow: Some(ema_fast),
            bb_upper: Some(101.0),
            bb_lower: Some(99.0),
        }
    }

    #[test]
    fn grid_emission_on_first_bar_matches_scenario_1() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let plan = planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snapshot(50.0, 100.0),
            &band_res(),
            100.0,
            0,
            0,
        );
        assert_eq!(plan.grid_orders.len(), 6);
        assert!(plan.kill_replace);
        let buys: Vec<f64> = plan
            .grid_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .collect();
        assert_prices_close(&buys, &[99.5, 99.0, 98.5]);
        let sells: Vec<f64> = plan
            .grid_orders
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .collect();
        assert_prices_close(&sells, &[100.5, 101.0, 101.5]);
    }

    #[test]
    fn dca_trigger_matches_scenario_2() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let snap = snapshot(30.0, 96.0);
        let plan = planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snap,
            &band_res(),
            95.0,
            0,
            0,
        );
        assert_eq!(plan.dca_orders.len(), 1);
        let order = &plan.dca_orders[0];
        assert!((order.price - 94.905).abs() < 1e-9);
        assert!(order.tag.contains("30"));
    }

    #[test]
    fn second_grid_within_cooldown_window_is_suppressed() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snapshot(50.0, 100.0),
            &band_res(),
            100.0,
            0,
            0,
        );
        // drift exceeds threshold but elapsed time has not
        let plan = planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snapshot(50.0, 100.0),
            &band_res(),
            110.0,
            10_000,
            1,
        );
        assert!(plan.grid_orders.is_empty());
    }

    #[test]
    fn second_grid_after_cooldown_and_drift_emits() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snapshot(50.0, 100.0),
            &band_res(),
            100.0,
            0,
            0,
        );
        let plan = planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snapshot(50.0, 100.0),
            &band_res(),
            110.0,
            400_000,
            1,
        );
        assert_eq!(plan.grid_orders.len(), 6);
    }

    #[test]
    fn tp_suppressed_in_paused_matches_scenario_3() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let snap = snapshot(72.0, 100.0);
        let plan = planner.plan(
            &policy,
            GateState::Paused,
            &StopState::default(),
            &snap,
            &band_res(),
            105.0,
            0,
            0,
        );
        assert!(plan.is_empty_of_orders());
        assert!(!plan.sl_action.stop);
    }

    #[test]
    fn degraded_suppresses_grid_but_allows_dca_and_tp() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let snap = snapshot(30.0, 96.0);
        let plan = planner.plan(
            &policy,
            GateState::Degraded,
            &StopState::default(),
            &snap,
            &band_res(),
            95.0,
            0,
            0,
        );
        assert!(plan.grid_orders.is_empty());
        assert_eq!(plan.dca_orders.len(), 1);
    }

    #[test]
    fn active_stop_suppresses_entire_plan() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let stop = StopState {
            active: true,
            stop_price: 100.0,
            stop_timestamp: 0,
            bars_since_stop: 1,
            reason: StopReason::DailyPnl,
        };
        let plan = planner.plan(
            &policy,
            GateState::Run,
            &stop,
            &snapshot(50.0, 100.0),
            &band_res(),
            100.0,
            0,
            0,
        );
        assert!(plan.sl_action.stop);
        assert!(plan.is_empty_of_orders());
    }

    #[test]
    fn dca_cooldown_blocks_reemission_within_cooldown_bars() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        planner.record_dca_fill(95.0, 0);
        let plan = planner.plan(
            &policy,
            GateState::Run,
            &StopState::default(),
            &snapshot(30.0, 96.0),
            &band_res(),
            94.0,
            0,
            3,
        );
        assert!(plan.dca_orders.is_empty());
    }
}
