// =============================================================================
// Venue tick rules — price buckets, size decimals, leverage tiers, fees
// =============================================================================
//
// Every price and size that leaves the engine passes through this module.
// The bucket table and the per-coin size decimals must match the venue
// exactly; a mis-rounded order is rejected at the wire.
// =============================================================================

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Taker fee rate charged on market / crossing orders.
pub const TAKER_FEE_RATE: Decimal = dec!(0.00035);
/// Maker fee rate charged on resting orders.
pub const MAKER_FEE_RATE: Decimal = dec!(0.0001);
/// Funding is exchanged once per hour.
pub const FUNDING_INTERVAL_HOURS: u32 = 1;

/// Round a price to the venue's bucket for its magnitude.
///
/// | Price range | Rounded to |
/// |---|---|
/// | >= 10 000 | integer |
/// | >= 1 000  | 0.1 |
/// | >= 100    | 0.01 |
/// | >= 10     | 0.001 |
/// | >= 1      | 0.0001 |
/// | >= 0.1    | 0.00001 |
/// | < 0.1     | 0.000001 |
pub fn round_price(price: Decimal) -> Decimal {
    let dp = price_decimals(price);
    price
        .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Decimal places for the price bucket containing `price`.
fn price_decimals(price: Decimal) -> u32 {
    let abs = price.abs();
    if abs >= dec!(10000) {
        0
    } else if abs >= dec!(1000) {
        1
    } else if abs >= dec!(100) {
        2
    } else if abs >= dec!(10) {
        3
    } else if abs >= dec!(1) {
        4
    } else if abs >= dec!(0.1) {
        5
    } else {
        6
    }
}

/// Size decimals the venue accepts per coin. Unknown coins default to 2.
pub fn sz_decimals(coin: &str) -> u32 {
    match coin {
        "BTC" => 4,
        "ETH" => 3,
        "SOL" | "AVAX" | "LINK" | "HYPE" => 2,
        "DOGE" | "XRP" => 0,
        _ => 2,
    }
}

/// Round an order size **up** to the coin's size decimals. Rounding up keeps
/// the order above the venue's minimum-notional check.
pub fn round_size(coin: &str, size: Decimal) -> Decimal {
    let dp = sz_decimals(coin);
    size.round_dp_with_strategy(dp, RoundingStrategy::AwayFromZero)
        .normalize()
}

/// Maximum leverage per liquidity tier. Unknown symbols get the most
/// conservative tier.
pub fn max_leverage(coin: &str) -> u32 {
    match coin {
        // Tier 1 — deepest books.
        "BTC" | "ETH" => 50,
        // Tier 2 — major alts.
        "SOL" | "XRP" | "BNB" | "AVAX" | "LINK" => 25,
        // Tier 3 — popular alts.
        "DOGE" | "ARB" | "OP" | "MATIC" | "SUI" => 20,
        // Tier 4 — smaller caps.
        "INJ" | "TIA" | "SEI" | "JTO" | "HYPE" => 10,
        // Tier 5 — memes and new listings, plus anything unknown.
        _ => 5,
    }
}

/// Clamp a user-requested leverage to the coin's tier cap.
pub fn clamp_leverage(coin: &str, requested: u32) -> u32 {
    requested.clamp(1, max_leverage(coin))
}

/// Taker fee for a fill of `size` at `price`.
pub fn taker_fee(price: Decimal, size: Decimal) -> Decimal {
    (price * size * TAKER_FEE_RATE).abs()
}
