use serde::{Deserialize, Serialize};

/// Per-symbol immutable configuration for the hybrid strategy engine.
///
/// Deserialized from TOML by the driver (never by the core) with
/// `deny_unknown_fields`, then shallow-merged: a per-symbol table overrides
/// whatever fields it sets, defaults carry the rest. The merged value is
/// handed to [`crate::application::engine::Engine`] as already-valid.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Policy {
    pub use_dynamic_spread: bool,
    pub band_near_threshold: f64,
    pub band_mid_threshold: f64,
    pub spread_near_pct: f64,
    pub spread_mid_pct: f64,
    pub spread_far_pct: f64,
    pub fixed_spread_pct: f64,

    pub rsi_adjust_enabled: bool,
    pub rsi_adjust_factor: f64,

    pub grid_enabled: bool,
    pub grid_levels_per_side: usize,
    pub grid_kill_replace_threshold_pct: f64,
    pub grid_min_seconds_between: i64,

    pub dca_enabled: bool,
    pub dca_rsi_threshold: f64,
    pub dca_use_ema_gate: bool,
    pub dca_cooldown_bars: u32,
    pub dca_min_distance_from_last_fill_pct: f64,
    pub dca_price_offset_pct: f64,

    pub tp_enabled: bool,
    pub tp_rsi_threshold: f64,
    pub tp_spread_near_pct: f64,
    pub tp_spread_mid_pct: f64,
    pub tp_spread_far_pct: f64,

    pub gate_degraded_gap_pct: f64,
    pub gate_paused_gap_pct: f64,
    pub gate_degraded_daily_pnl_pct: f64,
    pub gate_paused_daily_pnl_pct: f64,

    pub hard_stop_daily_pnl_pct: f64,
    pub hard_stop_gap_pct: f64,

    pub auto_resume_enabled: bool,
    pub resume_rsi_threshold: f64,
    pub resume_price_recovery_pct: f64,
    pub resume_cooldown_bars: u32,

    pub order_max_age_seconds: i64,
    pub order_price_drift_threshold_pct: f64,
    pub order_cancel_on_volatility_spike: bool,
    pub order_volatility_spike_threshold: f64,
    pub order_cancel_on_rsi_reversal: bool,
    pub order_rsi_reversal_threshold: f64,

    pub maker_fee_pct: f64,
    pub taker_fee_pct: f64,
    pub use_bnb_discount: bool,
    pub bnb_discount_pct: f64,

    pub min_notional: f64,
    /// Fixed USD notional target per placed order. The execution collaborator
    /// is the true sizing authority (per the concurrency model); the core
    /// uses this as a deterministic stand-in so the lifecycle manager can
    /// apply the exchange minimum-notional check without waiting on an
    /// external quantity resolution.
    pub order_quantity_usd: f64,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub ema_fast_period: usize,
    pub ema_mid_period: usize,
    pub ema_slow_period: usize,
    pub bb_period: usize,
    pub bb_stddev: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            use_dynamic_spread: true,
            band_near_threshold: 1.0,
            band_mid_threshold: 2.0,
            spread_near_pct: 0.3,
            spread_mid_pct: 0.5,
            spread_far_pct: 0.8,
            fixed_spread_pct: 0.5,

            rsi_adjust_enabled: true,
            rsi_adjust_factor: 0.1,

            grid_enabled: true,
            grid_levels_per_side: 3,
            grid_kill_replace_threshold_pct: 1.0,
            grid_min_seconds_between: 300,

            dca_enabled: true,
            dca_rsi_threshold: 35.0,
            dca_use_ema_gate: false,
            dca_cooldown_bars: 5,
            dca_min_distance_from_last_fill_pct: 1.0,
            dca_price_offset_pct: 0.1,

            tp_enabled: true,
            tp_rsi_threshold: 65.0,
            tp_spread_near_pct: 0.5,
            tp_spread_mid_pct: 0.8,
            tp_spread_far_pct: 1.2,

            gate_degraded_gap_pct: -3.0,
            gate_paused_gap_pct: -5.0,
            gate_degraded_daily_pnl_pct: -2.0,
            gate_paused_daily_pnl_pct: -4.0,

            hard_stop_daily_pnl_pct: -5.0,
            hard_stop_gap_pct: -8.0,

            auto_resume_enabled: true,
            resume_rsi_threshold: 40.0,
            resume_price_recovery_pct: 2.0,
            resume_cooldown_bars: 60,

            order_max_age_seconds: 300,
            order_price_drift_threshold_pct: 2.0,
            order_cancel_on_volatility_spike: true,
            order_volatility_spike_threshold: 1.5,
            order_cancel_on_rsi_reversal: true,
            order_rsi_reversal_threshold: 20.0,

            maker_fee_pct: 0.1,
            taker_fee_pct: 0.1,
            use_bnb_discount: false,
            bnb_discount_pct: 25.0,

            min_notional: 11.0,
            order_quantity_usd: 50.0,
            rsi_period: 14,
            atr_period: 14,
            ema_fast_period: 9,
            ema_mid_period: 21,
            ema_slow_period: 50,
            bb_period: 20,
            bb_stddev: 2.0,
        }
    }
}

impl Policy {
    /// Effective taker fee percentage after the BNB discount, expressed as a
    /// fraction (e.g. 0.001 for 0.1%).
    pub fn effective_taker_fee_fraction(&self) -> f64 {
        let pct = if self.use_bnb_discount {
            self.taker_fee_pct * (1.0 - self.bnb_discount_pct / 100.0)
        } else {
            self.taker_fee_pct
        };
        pct / 100.0
    }
}

/// A full policy document as loaded from TOML: a `[default]` table and an
/// optional per-symbol override table, shallow-merged at load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default)]
    pub default: Policy,
    #[serde(default)]
    pub symbols: std::collections::HashMap<String, toml::Value>,
}

impl PolicyDocument {
    /// Resolve the effective policy for a symbol by shallow-merging the
    /// symbol's override table onto `default`: only fields present in the
    /// override table are replaced, everything else comes from the default.
    pub fn resolve(&self, symbol: &str) -> anyhow::Result<Policy> {
        let Some(overrides) = self.symbols.get(symbol) else {
            return Ok(self.default.clone());
        };

        let mut merged = toml::Value::try_from(&self.default)?;
        let toml::Value::Table(ref mut merged_table) = merged else {
            unreachable!("Policy always serializes to a table");
        };
        if let toml::Value::Table(override_table) = overrides {
            for (k, v) in override_table {
                merged_table.insert(k.clone(), v.clone());
            }
        }

        Ok(merged.try_into()?)
    }
}
