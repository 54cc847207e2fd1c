use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        write!(f, "{s}")
    }
}

/// What produced an order intent or a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Grid,
    Dca,
    Tp,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::Grid => "GRID",
            Reason::Dca => "DCA",
            Reason::Tp => "TP",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Filled,
    Cancelled,
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An order intent emitted by the planner. Quantity is resolved later by the
/// execution collaborator against equity; the core never sizes orders.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub side: Side,
    pub price: f64,
    pub tag: String,
    pub reason: Reason,
}

impl OrderIntent {
    pub fn new(side: Side, price: f64, tag: impl Into<String>, reason: Reason) -> Self {
        Self {
            side,
            price,
            tag: tag.into(),
            reason,
        }
    }
}

/// A live order owned exclusively by the order lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub value: Decimal,
    pub placed_at: i64,
    pub initial_rsi: Option<f64>,
    pub reason: Reason,
    pub tag: String,
    pub status: OrderStatus,
}

/// Price rounded to 8 decimal places, used for "same price" tick comparisons
/// so float noise never causes a spurious duplicate or a spurious miss.
pub fn rounded_tick(price: f64) -> i64 {
    (price * 1e8).round() as i64
}

/// A realized fill event against a pending order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    pub side: Side,
    pub reason: Reason,
    pub tag: String,
    pub fill_price: Decimal,
    pub fill_qty: Decimal,
    pub fee: Decimal,
    pub fee_asset: String,
    pub realized_pnl: Option<Decimal>,
    pub cumulative_pnl: Decimal,
    pub timestamp: i64,
}
