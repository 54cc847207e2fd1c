use crate::domain::bar::Bar;
use crate::domain::policy::Policy;
use std::collections::VecDeque;
use ta::Next;
use ta::indicators::{BollingerBands, ExponentialMovingAverage};

const RING_CAPACITY: usize = 500;

/// Derived indicator values for the latest bar. Fields are `None` until the
/// pipeline has seen enough bars for that indicator's lookback.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_mid: Option<f64>,
    pub ema_slow: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
}

impl Snapshot {
    pub fn is_fully_available(&self) -> bool {
        self.rsi.is_some()
            && self.atr.is_some()
            && self.ema_fast.is_some()
            && self.ema_mid.is_some()
            && self.ema_slow.is_some()
            && self.bb_upper.is_some()
            && self.bb_lower.is_some()
    }
}

/// Wilder-smoothed RSI, computed incrementally (average gain/loss updated
/// with alpha = 1/period rather than recomputed from the whole window).
struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    seen: usize,
    seed_gain_sum: f64,
    seed_loss_sum: f64,
}

impl WilderRsi {
    fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            avg_gain: None,
            avg_loss: None,
            seen: 0,
            seed_gain_sum: 0.0,
            seed_loss_sum: 0.0,
        }
    }

    fn next(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close else {
            self.prev_close = Some(close);
            return None;
        };
        self.prev_close = Some(close);

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        match (self.avg_gain, self.avg_loss) {
            (Some(ag), Some(al)) => {
                let alpha = 1.0 / self.period as f64;
                let new_ag = ag + alpha * (gain - ag);
                let new_al = al + alpha * (loss - al);
                self.avg_gain = Some(new_ag);
                self.avg_loss = Some(new_al);
            }
            _ => {
                self.seen += 1;
                self.seed_gain_sum += gain;
                self.seed_loss_sum += loss;
                if self.seen >= self.period {
                    self.avg_gain = Some(self.seed_gain_sum / self.period as f64);
                    self.avg_loss = Some(self.seed_loss_sum / self.period as f64);
                } else {
                    return None;
                }
            }
        }

        let ag = self.avg_gain.unwrap();
        let al = self.avg_loss.unwrap();
        if al == 0.0 {
            return Some(100.0);
        }
        let rs = ag / al;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// Wilder-smoothed Average True Range, computed incrementally.
struct WilderAtr {
    period: usize,
    prev_close: Option<f64>,
    avg_tr: Option<f64>,
    seen: usize,
    seed_tr_sum: f64,
}

impl WilderAtr {
    fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            avg_tr: None,
            seen: 0,
            seed_tr_sum: 0.0,
        }
    }

    fn next(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = match self.prev_close {
            None => high - low,
            Some(prev) => (high - low)
                .max((high - prev).abs())
                .max((low - prev).abs()),
        };
        self.prev_close = Some(close);

        match self.avg_tr {
            Some(atr) => {
                let alpha = 1.0 / self.period as f64;
                let new_atr = atr + alpha * (tr - atr);
                self.avg_tr = Some(new_atr);
            }
            None => {
                self.seen += 1;
                self.seed_tr_sum += tr;
                if self.seen >= self.period {
                    self.avg_tr = Some(self.seed_tr_sum / self.period as f64);
                } else {
                    return None;
                }
            }
        }

        self.avg_tr
    }
}

/// Maintains a fixed-capacity rolling window of bars and the derived
/// indicator snapshot, recomputed incrementally on each append.
pub struct IndicatorPipeline {
    window: VecDeque<Bar>,
    rsi: WilderRsi,
    atr: WilderAtr,
    ema_fast: ExponentialMovingAverage,
    ema_mid: ExponentialMovingAverage,
    ema_slow: ExponentialMovingAverage,
    bb: BollingerBands,
    current: Snapshot,
    previous: Snapshot,
}

impl IndicatorPipeline {
    pub fn new(policy: &Policy) -> Self {
        Self {
            window: VecDeque::with_capacity(RING_CAPACITY),
            rsi: WilderRsi::new(policy.rsi_period),
            atr: WilderAtr::new(policy.atr_period),
            ema_fast: ExponentialMovingAverage::new(policy.ema_fast_period)
                .expect("ema_fast_period must be nonzero"),
            ema_mid: ExponentialMovingAverage::new(policy.ema_mid_period)
                .expect("ema_mid_period must be nonzero"),
            ema_slow: ExponentialMovingAverage::new(policy.ema_slow_period)
                .expect("ema_slow_period must be nonzero"),
            bb: BollingerBands::new(policy.bb_period, policy.bb_stddev)
                .expect("bb_period must be nonzero, bb_stddev must be positive"),
            current: Snapshot::default(),
            previous: Snapshot::default(),
        }
    }

    pub fn current(&self) -> Snapshot {
        self.current
    }

    pub fn previous(&self) -> Snapshot {
        self.previous
    }

    /// Append a bar and recompute the snapshot. Bars with non-finite fields
    /// are rejected; the previous snapshot is retained and `false` is
    /// returned so the caller can log a "skipped bar" event.
    pub fn on_bar(&mut self, bar: &Bar) -> bool {
        if !bar.is_valid() {
            return false;
        }

        let close = match bar.close.to_string().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => return false,
        };
        let high: f64 = bar.high.to_string().parse().unwrap_or(f64::NAN);
        let low: f64 = bar.low.to_string().parse().unwrap_or(f64::NAN);
        if !high.is_finite() || !low.is_finite() {
            return false;
        }

        self.previous = self.current;

        if self.window.len() == RING_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(*bar);

        let rsi = self.rsi.next(close);
        let atr = self.atr.next(high, low, close);
        let atr_pct = atr.map(|a| a / close * 100.0);
        let ema_fast = Some(self.ema_fast.next(close));
        let ema_mid = Some(self.ema_mid.next(close));
        let ema_slow = Some(self.ema_slow.next(close));
        let bb_output = self.bb.next(close);

        self.current = Snapshot {
            rsi,
            atr,
            atr_pct,
            ema_fast,
            ema_mid,
            ema_slow,
            bb_upper: Some(bb_output.upper),
            bb_lower: Some(bb_output.lower),
        };

        true
    }
}
