// =============================================================================
// Market Cache — per-symbol in-memory state fed by the stream handler
// =============================================================================
//
// Writers are the stream's message handlers (and the analysis loop's price
// refresh); everything else reads snapshots. No lock is held across an await.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Funding, LiquidationTick, OrderBook, Ring, TradeTick};
use crate::types::Side;

/// Trade ring length per symbol.
const TRADE_RING: usize = 100;
/// Liquidation ring length per symbol.
const LIQUIDATION_RING: usize = 50;
/// Close-price samples retained for indicator calculations.
const PRICE_RING: usize = 100;
/// 24h-change samples retained (one per recorded price).
const DAY_RING: usize = 2_000;
/// Volume-profile window, milliseconds.
pub const VOLUME_WINDOW_MS: i64 = 60_000;

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

/// Buy/sell notional split over the volume window.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VolumeProfile {
    pub buy_notional: f64,
    pub sell_notional: f64,
    /// buy / (buy + sell); 0.5 when the window is empty.
    pub buy_ratio: f64,
}

#[derive(Debug)]
struct SymbolData {
    book: Option<OrderBook>,
    trades: Ring<TradeTick>,
    liquidations: Ring<LiquidationTick>,
    funding: Option<Funding>,
    closes: Ring<f64>,
    day_samples: Ring<(i64, Decimal)>,
    volume_24h: Decimal,
}

impl SymbolData {
    fn new() -> Self {
        Self {
            book: None,
            trades: Ring::new(TRADE_RING),
            liquidations: Ring::new(LIQUIDATION_RING),
            funding: None,
            closes: Ring::new(PRICE_RING),
            day_samples: Ring::new(DAY_RING),
            volume_24h: Decimal::ZERO,
        }
    }
}

/// Shared market state for every tracked symbol.
pub struct MarketCache {
    symbols: RwLock<HashMap<String, SymbolData>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Writers (stream handler + analysis price refresh)
    // -------------------------------------------------------------------------

    pub fn apply_book(&self, book: OrderBook) {
        let symbol = book.symbol.clone();
        let mut symbols = self.symbols.write();
        symbols
            .entry(symbol)
            .or_insert_with(SymbolData::new)
            .book = Some(book);
    }

    pub fn apply_trade(&self, tick: TradeTick) {
        let mut symbols = self.symbols.write();
        symbols
            .entry(tick.symbol.clone())
            .or_insert_with(SymbolData::new)
            .trades
            .push(tick);
    }

    pub fn apply_liquidation(&self, tick: LiquidationTick) {
        let mut symbols = self.symbols.write();
        symbols
            .entry(tick.symbol.clone())
            .or_insert_with(SymbolData::new)
            .liquidations
            .push(tick);
    }

    pub fn apply_funding(&self, funding: Funding) {
        let symbol = funding.symbol.clone();
        let mut symbols = self.symbols.write();
        symbols
            .entry(symbol)
            .or_insert_with(SymbolData::new)
            .funding = Some(funding);
    }

    /// Record a close sample for the indicator ring and the 24h ring.
    pub fn record_price(&self, symbol: &str, price: Decimal, timestamp: i64) {
        let mut symbols = self.symbols.write();
        let data = symbols
            .entry(symbol.to_string())
            .or_insert_with(SymbolData::new);
        data.closes.push(price.to_f64().unwrap_or(0.0));
        data.day_samples.push((timestamp, price));
    }

    pub fn set_volume_24h(&self, symbol: &str, volume: Decimal) {
        let mut symbols = self.symbols.write();
        symbols
            .entry(symbol.to_string())
            .or_insert_with(SymbolData::new)
            .volume_24h = volume;
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    pub fn order_book(&self, symbol: &str) -> Option<OrderBook> {
        self.symbols.read().get(symbol).and_then(|d| d.book.clone())
    }

    /// Latest mid from the cached book, falling back to the last trade price.
    pub fn latest_mid(&self, symbol: &str) -> Option<Decimal> {
        let symbols = self.symbols.read();
        let data = symbols.get(symbol)?;
        if let Some(book) = &data.book {
            if book.mid_price > Decimal::ZERO {
                return Some(book.mid_price);
            }
        }
        data.trades.back().map(|t| t.price)
    }

    pub fn funding(&self, symbol: &str) -> Option<Funding> {
        self.symbols.read().get(symbol).and_then(|d| d.funding.clone())
    }

    /// Close-price series for indicator calculations, oldest first.
    pub fn closes(&self, symbol: &str) -> Vec<f64> {
        self.symbols
            .read()
            .get(symbol)
            .map(|d| d.closes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn recent_trades(&self, symbol: &str) -> Vec<TradeTick> {
        self.symbols
            .read()
            .get(symbol)
            .map(|d| d.trades.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn recent_liquidations(&self, symbol: &str) -> Vec<LiquidationTick> {
        self.symbols
            .read()
            .get(symbol)
            .map(|d| d.liquidations.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn volume_24h(&self, symbol: &str) -> Decimal {
        self.symbols
            .read()
            .get(symbol)
            .map(|d| d.volume_24h)
            .unwrap_or_default()
    }

    /// Buy/sell notional split over the trailing `VOLUME_WINDOW_MS`.
    pub fn volume_profile(&self, symbol: &str, now_ms: i64) -> VolumeProfile {
        let symbols = self.symbols.read();
        let Some(data) = symbols.get(symbol) else {
            return VolumeProfile {
                buy_ratio: 0.5,
                ..Default::default()
            };
        };

        let cutoff = now_ms - VOLUME_WINDOW_MS;
        let mut buy = Decimal::ZERO;
        let mut sell = Decimal::ZERO;
        for tick in data.trades.iter().filter(|t| t.timestamp >= cutoff) {
            let notional = tick.price * tick.size;
            match tick.side {
                Side::Buy => buy += notional,
                Side::Sell => sell += notional,
            }
        }

        let total = buy + sell;
        let ratio = if total.is_zero() {
            0.5
        } else {
            (buy / total).to_f64().unwrap_or(0.5)
        };
        VolumeProfile {
            buy_notional: buy.to_f64().unwrap_or(0.0),
            sell_notional: sell.to_f64().unwrap_or(0.0),
            buy_ratio: ratio,
        }
    }

    /// 24h percentage change: (current - oldest-within-24h) / oldest * 100.
    /// Falls back to the oldest available sample when no sample is 24h old.
    pub fn change_24h(&self, symbol: &str, now_ms: i64) -> Option<f64> {
        let symbols = self.symbols.read();
        let data = symbols.get(symbol)?;
        let (_, current) = *data.day_samples.back()?;

        let cutoff = now_ms - DAY_MS;
        let baseline = data
            .day_samples
            .iter()
            .find(|(ts, _)| *ts >= cutoff)
            .or_else(|| data.day_samples.front())
            .map(|(_, px)| *px)?;

        if baseline.is_zero() {
            return None;
        }
        ((current - baseline) / baseline * Decimal::ONE_HUNDRED).to_f64()
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.symbols.read().keys().cloned().collect()
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}
