use crate::domain::policy::Policy;
use std::fmt;

/// Volatility bucket derived from ATR%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Near,
    Mid,
    Far,
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Band::Near => "near",
            Band::Mid => "mid",
            Band::Far => "far",
        };
        write!(f, "{s}")
    }
}

/// Deterministic, side-effect-free mapping from (atr_pct, rsi) to a volatility
/// band and a dynamic spread percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandResolution {
    pub band: Band,
    pub spread_pct: f64,
    pub tp_spread_pct: f64,
}

pub fn resolve(policy: &Policy, atr_pct: f64, rsi: f64) -> BandResolution {
    let band = if atr_pct < policy.band_near_threshold {
        Band::Near
    } else if atr_pct < policy.band_mid_threshold {
        Band::Mid
    } else {
        Band::Far
    };

    let (base_spread, tp_spread) = match band {
        Band::Near => (policy.spread_near_pct, policy.tp_spread_near_pct),
        Band::Mid => (policy.spread_mid_pct, policy.tp_spread_mid_pct),
        Band::Far => (policy.spread_far_pct, policy.tp_spread_far_pct),
    };

    let spread_pct = if !policy.use_dynamic_spread {
        policy.fixed_spread_pct
    } else if policy.rsi_adjust_enabled && rsi < 30.0 {
        base_spread * (1.0 - policy.rsi_adjust_factor)
    } else if policy.rsi_adjust_enabled && rsi > 70.0 {
        base_spread * (1.0 + policy.rsi_adjust_factor)
    } else {
        base_spread
    };

    BandResolution {
        band,
        spread_pct,
        tp_spread_pct: tp_spread,
    }
}
