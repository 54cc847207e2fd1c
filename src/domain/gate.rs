use crate::domain::bar::Bar;
use crate::domain::policy::Policy;
use chrono::NaiveDate;

/// Current trading regime, derived purely from day-relative PnL. No
/// hysteresis: recovery is instantaneous when thresholds are crossed back.
/// Hysteresis belongs to the hard-stop controller, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Run,
    Degraded,
    Paused,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateState::Run => "RUN",
            GateState::Degraded => "DEGRADED",
            GateState::Paused => "PAUSED",
        };
        write!(f, "{s}")
    }
}

/// day_open_price / day_open_equity, rolled over once per calendar date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayFrame {
    pub day_open_price: f64,
    pub day_open_equity: f64,
    pub current_date: Option<NaiveDate>,
}

impl Default for DayFrame {
    fn default() -> Self {
        Self {
            day_open_price: 0.0,
            day_open_equity: 0.0,
            current_date: None,
        }
    }
}

impl DayFrame {
    /// Rolls the frame over if `bar`'s calendar date differs from (or is the
    /// first seen after) `current_date`. Must run before any gate evaluation
    /// reads `bar`.
    pub fn maybe_roll(&mut self, bar: &Bar, equity: f64) {
        let bar_date = bar.calendar_date();
        let should_roll = match self.current_date {
            None => true,
            Some(d) => bar_date != d,
        };
        if should_roll {
            self.current_date = Some(bar_date);
            self.day_open_price = bar.open.to_string().parse().unwrap_or(0.0);
            self.day_open_equity = equity;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateEvaluation {
    pub state: GateState,
    pub gap_pct: f64,
    pub daily_pnl_pct: f64,
}

pub fn evaluate(policy: &Policy, day_frame: &DayFrame, close: f64, equity: f64) -> GateEvaluation {
    let gap_pct = if day_frame.day_open_price != 0.0 {
        (close - day_frame.day_open_price) / day_frame.day_open_price * 100.0
    } else {
        0.0
    };
    let daily_pnl_pct = if day_frame.day_open_equity != 0.0 {
        (equity - day_frame.day_open_equity) / day_frame.day_open_equity * 100.0
    } else {
        0.0
    };

    let state = if gap_pct <= policy.gate_paused_gap_pct
        || daily_pnl_pct <= policy.gate_paused_daily_pnl_pct
    {
        GateState::Paused
    } else if gap_pct <= policy.gate_degraded_gap_pct
        || daily_pnl_pct <= policy.gate_degraded_daily_pnl_pct
    {
        GateState::Degraded
    } else {
        GateState::Run
    };

    GateEvaluation {
        state,
        gap_pct,
        daily_pnl_pct,
    }
}
