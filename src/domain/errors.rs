use thiserror::Error;

/// Fatal faults that leave the engine's internal state undefined. The driver
/// treats these as unrecoverable: it stops feeding bars to the offending
/// engine and surfaces a non-zero exit code.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate order id {order_id} in live order set for {symbol}")]
    DuplicateOrderId { symbol: String, order_id: String },

    #[error(
        "equity inconsistency for {symbol}: cash {cash} does not match cash reconstructed from this bar's fills {reconstructed} (diff {diff})"
    )]
    EquityMismatch {
        symbol: String,
        cash: String,
        reconstructed: String,
        diff: String,
    },
}
