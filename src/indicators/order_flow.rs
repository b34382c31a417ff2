// =============================================================================
// Order-flow delta — book-pressure classification
// =============================================================================
//
// delta% = (bid_size - ask_size) / (bid_size + ask_size) * 100 over the
// visible levels. Classified at +/-10 (lean) and +/-30 (strong).
// "Institutional activity" flags two or more levels above 3x the median
// level size.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::market_data::OrderBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowBias {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderFlow {
    /// Signed pressure in [-100, 100].
    pub delta_pct: f64,
    pub bias: FlowBias,
    /// Two or more outsized levels on either side of the book.
    pub institutional_activity: bool,
}

/// Classify the book's resting pressure.
pub fn order_flow(book: &OrderBook) -> OrderFlow {
    let bid_size: Decimal = book.bids.iter().map(|l| l.size).sum();
    let ask_size: Decimal = book.asks.iter().map(|l| l.size).sum();
    let total = bid_size + ask_size;

    let delta_pct = if total.is_zero() {
        0.0
    } else {
        ((bid_size - ask_size) / total * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    };

    let bias = if delta_pct >= 30.0 {
        FlowBias::StrongBuy
    } else if delta_pct >= 10.0 {
        FlowBias::Buy
    } else if delta_pct <= -30.0 {
        FlowBias::StrongSell
    } else if delta_pct <= -10.0 {
        FlowBias::Sell
    } else {
        FlowBias::Neutral
    };

    OrderFlow {
        delta_pct,
        bias,
        institutional_activity: detect_institutional(book),
    }
}

/// Two or more levels exceeding 3x the median size across both book sides.
fn detect_institutional(book: &OrderBook) -> bool {
    let mut sizes: Vec<Decimal> = book
        .bids
        .iter()
        .chain(book.asks.iter())
        .map(|l| l.size)
        .collect();
    if sizes.len() < 4 {
        return false;
    }
    sizes.sort();
    let median = sizes[sizes.len() / 2];
    if median.is_zero() {
        return false;
    }
    let threshold = median * Decimal::from(3);

    let outsized = book
        .bids
        .iter()
        .chain(book.asks.iter())
        .filter(|l| l.size > threshold)
        .count();
    outsized >= 2
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::OrderBookLevel;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> OrderBookLevel {
        OrderBookLevel {
            price,
            size,
            num_orders: None,
        }
    }

    fn book(bid_sizes: &[Decimal], ask_sizes: &[Decimal]) -> OrderBook {
        let bids = bid_sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| level(dec!(100) - Decimal::from(i as u32), s))
            .collect();
        let asks = ask_sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| level(dec!(101) + Decimal::from(i as u32), s))
            .collect();
        OrderBook::from_levels("BTC-PERP", bids, asks, 1)
    }

    #[test]
    fn balanced_book_is_neutral() {
        let flow = order_flow(&book(&[dec!(5), dec!(5)], &[dec!(5), dec!(5)]));
        assert!(flow.delta_pct.abs() < 1e-9);
        assert_eq!(flow.bias, FlowBias::Neutral);
    }

    #[test]
    fn classification_thresholds() {
        // (60 - 40) / 100 = +20% -> Buy.
        let flow = order_flow(&book(&[dec!(60)], &[dec!(40)]));
        assert_eq!(flow.bias, FlowBias::Buy);

        // (70 - 30) / 100 = +40% -> StrongBuy.
        let flow = order_flow(&book(&[dec!(70)], &[dec!(30)]));
        assert_eq!(flow.bias, FlowBias::StrongBuy);

        let flow = order_flow(&book(&[dec!(40)], &[dec!(60)]));
        assert_eq!(flow.bias, FlowBias::Sell);

        let flow = order_flow(&book(&[dec!(30)], &[dec!(70)]));
        assert_eq!(flow.bias, FlowBias::StrongSell);
    }

    #[test]
    fn empty_book_is_neutral() {
        let flow = order_flow(&book(&[], &[]));
        assert_eq!(flow.bias, FlowBias::Neutral);
        assert!(!flow.institutional_activity);
    }

    #[test]
    fn institutional_needs_two_outsized_levels() {
        // One whale level: not enough.
        let flow = order_flow(&book(
            &[dec!(1), dec!(1), dec!(10)],
            &[dec!(1), dec!(1), dec!(1)],
        ));
        assert!(!flow.institutional_activity);

        // Two whale levels across the book: flagged.
        let flow = order_flow(&book(
            &[dec!(1), dec!(1), dec!(10)],
            &[dec!(1), dec!(1), dec!(10)],
        ));
        assert!(flow.institutional_activity);
    }
}
