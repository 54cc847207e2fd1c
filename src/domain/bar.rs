use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// One OHLCV candle at a fixed timeframe. Prices and volume are quote-currency
/// positive reals; timestamp is a Unix millisecond count and must arrive in
/// strictly ascending order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar is well-formed if every field is finite and positive and high/low
    /// bracket open/close. Non-finite values can only arise from upstream
    /// float parsing; Decimal itself cannot represent NaN/Inf, so this is a
    /// sanity check on relative ordering, not a finiteness probe.
    pub fn is_valid(&self) -> bool {
        self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.volume >= Decimal::ZERO
            && self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
    }

    pub fn calendar_date(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
            .date_naive()
    }
}
