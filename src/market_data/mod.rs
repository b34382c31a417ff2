// =============================================================================
// Market data — value types shared by the cache, stream, and bridge
// =============================================================================

mod cache;
mod fanout;
mod stream;

pub use cache::MarketCache;
pub use fanout::{EventKind, MarketEvent, MarketFanout, SubscriptionHandle};
pub use stream::{run_market_stream, StreamConfig};

use std::collections::VecDeque;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Number of top-of-book levels feeding the imbalance computation.
const IMBALANCE_LEVELS: usize = 5;
/// A level is a wall when its size exceeds this multiple of the median size.
const WALL_MEDIAN_MULT: Decimal = rust_decimal_macros::dec!(3);

/// One price level of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub num_orders: Option<u32>,
}

/// Snapshot of one symbol's book with derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    /// Descending by price.
    pub bids: Vec<OrderBookLevel>,
    /// Ascending by price.
    pub asks: Vec<OrderBookLevel>,
    pub mid_price: Decimal,
    pub spread: Decimal,
    pub spread_pct: f64,
    /// Top-5 bid size share of top-5 total, in [0, 1]. 0.5 when empty.
    pub imbalance: f64,
    #[serde(default)]
    pub bid_wall: Option<OrderBookLevel>,
    #[serde(default)]
    pub ask_wall: Option<OrderBookLevel>,
    pub timestamp: i64,
}

impl OrderBook {
    /// Build a book from raw levels, computing mid, spread, imbalance, and
    /// walls. `bids` must be descending and `asks` ascending.
    pub fn from_levels(
        symbol: &str,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        timestamp: i64,
    ) -> Self {
        let best_bid = bids.first().map(|l| l.price).unwrap_or_default();
        let best_ask = asks.first().map(|l| l.price).unwrap_or_default();

        let (mid_price, spread, spread_pct) = if best_bid > Decimal::ZERO && best_ask > Decimal::ZERO
        {
            let mid = (best_bid + best_ask) / Decimal::TWO;
            let spread = best_ask - best_bid;
            let pct = (spread / mid).to_f64().unwrap_or(0.0) * 100.0;
            (mid, spread, pct)
        } else {
            (Decimal::ZERO, Decimal::ZERO, 0.0)
        };

        let imbalance = top_imbalance(&bids, &asks);
        let bid_wall = find_wall(&bids);
        let ask_wall = find_wall(&asks);

        Self {
            symbol: symbol.to_string(),
            bids,
            asks,
            mid_price,
            spread,
            spread_pct,
            imbalance,
            bid_wall,
            ask_wall,
            timestamp,
        }
    }
}

/// Top-5 bid share of top-5 total size; 0.5 when both sides are empty.
fn top_imbalance(bids: &[OrderBookLevel], asks: &[OrderBookLevel]) -> f64 {
    let bid_sum: Decimal = bids.iter().take(IMBALANCE_LEVELS).map(|l| l.size).sum();
    let ask_sum: Decimal = asks.iter().take(IMBALANCE_LEVELS).map(|l| l.size).sum();
    let total = bid_sum + ask_sum;
    if total.is_zero() {
        0.5
    } else {
        (bid_sum / total).to_f64().unwrap_or(0.5)
    }
}

/// A level whose size exceeds 3x the median size of the visible levels.
fn find_wall(levels: &[OrderBookLevel]) -> Option<OrderBookLevel> {
    if levels.len() < 3 {
        return None;
    }
    let mut sizes: Vec<Decimal> = levels.iter().map(|l| l.size).collect();
    sizes.sort();
    let median = sizes[sizes.len() / 2];
    if median.is_zero() {
        return None;
    }
    levels
        .iter()
        .find(|l| l.size > median * WALL_MEDIAN_MULT)
        .cloned()
}

/// One executed trade from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeTick {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: i64,
}

/// Forced-liquidation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationSide {
    Long,
    Short,
}

/// One liquidation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationTick {
    pub symbol: String,
    pub side: LiquidationSide,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: i64,
}

/// Funding context for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funding {
    pub symbol: String,
    pub funding_rate: Decimal,
    /// Wire field `premium`; carried without interpretation.
    pub predicted_rate: Decimal,
    pub open_interest: Decimal,
    pub timestamp: i64,
}

/// Fixed-capacity ring: pushing beyond capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> OrderBookLevel {
        OrderBookLevel {
            price,
            size,
            num_orders: None,
        }
    }

    #[test]
    fn book_derives_mid_spread_imbalance() {
        let bids = vec![level(dec!(99.9), dec!(3)), level(dec!(99.8), dec!(3))];
        let asks = vec![level(dec!(100.1), dec!(2)), level(dec!(100.2), dec!(2))];
        let book = OrderBook::from_levels("BTC-PERP", bids, asks, 1);

        assert_eq!(book.mid_price, dec!(100.0));
        assert_eq!(book.spread, dec!(0.2));
        assert!((book.spread_pct - 0.2).abs() < 1e-9);
        // 6 bid vs 4 ask => 0.6
        assert!((book.imbalance - 0.6).abs() < 1e-9);
        assert!(book.bids[0].price < book.asks[0].price);
    }

    #[test]
    fn empty_book_is_neutral() {
        let book = OrderBook::from_levels("BTC-PERP", vec![], vec![], 1);
        assert_eq!(book.mid_price, Decimal::ZERO);
        assert!((book.imbalance - 0.5).abs() < f64::EPSILON);
        assert!(book.bid_wall.is_none());
    }

    #[test]
    fn imbalance_uses_top_five_only() {
        let mut bids = vec![level(dec!(100), dec!(1)); 5];
        // A sixth giant bid level must not affect the imbalance.
        bids.push(level(dec!(94), dec!(1000)));
        let asks = vec![level(dec!(101), dec!(1)); 5];
        let book = OrderBook::from_levels("X-PERP", bids, asks, 1);
        assert!((book.imbalance - 0.5).abs() < 1e-9);
    }

    #[test]
    fn wall_detection_uses_median() {
        let bids = vec![
            level(dec!(100), dec!(1)),
            level(dec!(99), dec!(10)), // > 3x median(1)
            level(dec!(98), dec!(1)),
            level(dec!(97), dec!(1)),
        ];
        let book = OrderBook::from_levels("X-PERP", bids, vec![level(dec!(101), dec!(1)); 3], 1);
        assert_eq!(book.bid_wall.unwrap().price, dec!(99));
        assert!(book.ask_wall.is_none());
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut ring = Ring::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.front(), Some(&2));
        assert_eq!(ring.back(), Some(&4));
    }
}
