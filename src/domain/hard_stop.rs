use crate::domain::gate::GateEvaluation;
use crate::domain::policy::Policy;

/// Global stop latch triggered by catastrophic loss, cleared only by
/// auto-resume (or a process restart). A day rollover never clears it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StopState {
    pub active: bool,
    pub stop_price: f64,
    pub stop_timestamp: i64,
    pub bars_since_stop: u32,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reason {
    #[default]
    None,
    DailyPnl,
    Gap,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::None => "",
            Reason::DailyPnl => "daily PnL breached hard-stop threshold",
            Reason::Gap => "gap% breached hard-stop threshold",
        }
    }
}

/// Evaluate the hard-stop trigger and auto-resume conditions for the current
/// bar. Must run every bar, before the plan is emitted.
pub fn step(
    policy: &Policy,
    state: &mut StopState,
    gate_eval: &GateEvaluation,
    close: f64,
    rsi: Option<f64>,
    timestamp: i64,
) {
    if state.active {
        state.bars_since_stop += 1;

        if policy.auto_resume_enabled {
            let cooldown_ok = state.bars_since_stop >= policy.resume_cooldown_bars;
            let rsi_ok = rsi.is_some_and(|r| r >= policy.resume_rsi_threshold);
            let recovery_pct = if state.stop_price != 0.0 {
                (close - state.stop_price) / state.stop_price * 100.0
            } else {
                0.0
            };
            let recovery_ok = recovery_pct >= policy.resume_price_recovery_pct;

            if cooldown_ok && rsi_ok && recovery_ok {
                *state = StopState::default();
            }
        }
        return;
    }

    if gate_eval.daily_pnl_pct <= policy.hard_stop_daily_pnl_pct {
        *state = StopState {
            active: true,
            stop_price: close,
            stop_timestamp: timestamp,
            bars_since_stop: 0,
            reason: Reason::DailyPnl,
        };
    } else if gate_eval.gap_pct <= policy.hard_stop_gap_pct {
        *state = StopState {
            active: true,
            stop_price: close,
            stop_timestamp: timestamp,
            bars_since_stop: 0,
            reason: Reason::Gap,
        };
    }
}
