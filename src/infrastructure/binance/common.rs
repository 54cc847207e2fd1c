/// Converts `"BTC/USDT"` to Binance's wire form `"BTCUSDT"`.
pub fn denormalize_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// Best-effort inverse of [`denormalize_symbol`] for common quote assets.
/// Binance's `exchangeInfo` endpoint is the authoritative source for the
/// exact base/quote split; this covers the quote assets this engine trades
/// against.
pub fn normalize_symbol(wire_symbol: &str) -> Option<String> {
    const QUOTES: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];
    for quote in QUOTES {
        if let Some(base) = wire_symbol.strip_suffix(quote)
            && !base.is_empty()
        {
            return Some(format!("{base}/{quote}"));
        }
    }
    None
}
