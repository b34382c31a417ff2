// =============================================================================
// Confluence Scorer — weighted directional signal aggregation
// =============================================================================
//
// Each indicator emits a directional signal only when its precondition is
// satisfied. A direction wins when it has at least two more signals than the
// other side and at least two signals total. Total strength is the
// weight-weighted average of the winning side's strengths, rounded.
// =============================================================================

use serde::Serialize;

use crate::indicators::bollinger::bollinger_standard;
use crate::indicators::levels::{
    momentum, support_resistance, swing_pattern, trend_strength, SwingPattern, TrendDirection,
};
use crate::indicators::macd::{macd_standard, MacdCrossover};
use crate::indicators::order_flow::{order_flow, FlowBias};
use crate::indicators::oscillators::{cci, stoch_rsi, williams_r, StochCross};
use crate::indicators::rsi::rsi;
use crate::indicators::stats::{z_score, ZSignal};
use crate::market_data::OrderBook;
use crate::types::Side;

/// Direction a signal points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Long,
    Short,
}

impl SignalDirection {
    pub fn side(self) -> Side {
        match self {
            Self::Long => Side::Buy,
            Self::Short => Side::Sell,
        }
    }
}

/// One emitted signal.
#[derive(Debug, Clone, Serialize)]
pub struct ConfluenceSignal {
    pub name: &'static str,
    pub direction: SignalDirection,
    pub weight: f64,
    /// 0-100.
    pub strength: f64,
}

/// Outcome of one confluence evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfluenceReport {
    pub signals: Vec<ConfluenceSignal>,
    pub direction: Option<SignalDirection>,
    /// Signals aligned with the chosen direction.
    pub aligned_count: usize,
    /// Weighted average strength of the winning side, rounded.
    pub total_strength: f64,
}

impl ConfluenceReport {
    /// Whether this tick clears the profile's minimums.
    pub fn qualifies(&self, min_confirmations: usize, min_strength: f64) -> bool {
        self.direction.is_some()
            && self.aligned_count >= min_confirmations
            && self.total_strength >= min_strength
    }
}

/// Evaluate the full indicator set over the close series and optional book.
pub fn evaluate(closes: &[f64], book: Option<&OrderBook>) -> ConfluenceReport {
    let mut signals = Vec::new();
    let price = closes.last().copied().unwrap_or(0.0);

    // --- RSI (weight 1.2) ----------------------------------------------------
    let rsi_value = rsi(closes, 14);
    if rsi_value <= 35.0 {
        signals.push(signal("rsi", SignalDirection::Long, 1.2, 40.0 + (35.0 - rsi_value) * 2.0));
    } else if rsi_value >= 65.0 {
        signals.push(signal("rsi", SignalDirection::Short, 1.2, 40.0 + (rsi_value - 65.0) * 2.0));
    }

    // --- EMA stack (weight 1.5) ----------------------------------------------
    if let (Some(e9), Some(e21), Some(e50)) = (
        crate::indicators::ema::ema(closes, 9),
        crate::indicators::ema::ema(closes, 21),
        crate::indicators::ema::ema(closes, 50),
    ) {
        if e9 > e21 && e21 > e50 {
            let strength = if price > e9 { 80.0 } else { 65.0 };
            signals.push(signal("ema_stack", SignalDirection::Long, 1.5, strength));
        } else if e9 < e21 && e21 < e50 {
            let strength = if price < e9 { 80.0 } else { 65.0 };
            signals.push(signal("ema_stack", SignalDirection::Short, 1.5, strength));
        }
    }

    // --- MACD crossover (weight 1.6) -----------------------------------------
    if let Some(m) = macd_standard(closes) {
        match m.crossover {
            MacdCrossover::BullishCross => {
                signals.push(signal("macd_cross", SignalDirection::Long, 1.6, 80.0));
            }
            MacdCrossover::BearishCross => {
                signals.push(signal("macd_cross", SignalDirection::Short, 1.6, 80.0));
            }
            MacdCrossover::None => {}
        }
    }

    // --- Stochastic RSI crossover (weight 1.4) -------------------------------
    if let Some(s) = stoch_rsi(closes, 14, 14) {
        match s.crossover {
            StochCross::BullishCross if s.k < 80.0 => {
                signals.push(signal("stoch_rsi_cross", SignalDirection::Long, 1.4, 65.0));
            }
            StochCross::BearishCross if s.k > 20.0 => {
                signals.push(signal("stoch_rsi_cross", SignalDirection::Short, 1.4, 65.0));
            }
            _ => {}
        }
    }

    // --- Z-Score (weight 1.5 strong, 1.0 plain) ------------------------------
    if let Some(z) = z_score(closes, 20) {
        match z.signal {
            ZSignal::StrongBuy => signals.push(signal("z_score", SignalDirection::Long, 1.5, 85.0)),
            ZSignal::Buy => signals.push(signal("z_score", SignalDirection::Long, 1.0, 60.0)),
            ZSignal::StrongSell => {
                signals.push(signal("z_score", SignalDirection::Short, 1.5, 85.0))
            }
            ZSignal::Sell => signals.push(signal("z_score", SignalDirection::Short, 1.0, 60.0)),
            ZSignal::Neutral => {}
        }
    }

    // --- Bollinger squeeze breakout (weight 1.2) -----------------------------
    if let Some(b) = bollinger_standard(closes) {
        if b.squeeze {
            if b.percent_b >= 0.8 {
                signals.push(signal("bb_squeeze", SignalDirection::Long, 1.2, 60.0));
            } else if b.percent_b <= 0.2 {
                signals.push(signal("bb_squeeze", SignalDirection::Short, 1.2, 60.0));
            }
        }
    }

    // --- Support / resistance proximity (weight 1.3) -------------------------
    if let Some(sr) = support_resistance(closes) {
        if price > 0.0 && sr.support > 0.0 {
            let to_support = (price - sr.support) / price * 100.0;
            let to_resistance = (sr.resistance - price) / price * 100.0;
            if (0.0..=1.0).contains(&to_support) {
                signals.push(signal("support_bounce", SignalDirection::Long, 1.3, 65.0));
            } else if (0.0..=1.0).contains(&to_resistance) {
                signals.push(signal("resistance_reject", SignalDirection::Short, 1.3, 65.0));
            }
        }
    }

    // --- Momentum over 5 samples (weight 1.0) --------------------------------
    let m5 = momentum(closes, 5);
    if m5.abs() >= 1.5 {
        let direction = if m5 > 0.0 {
            SignalDirection::Long
        } else {
            SignalDirection::Short
        };
        signals.push(signal("momentum", direction, 1.0, (m5.abs() * 25.0).min(100.0)));
    }

    // --- Higher highs / lower lows (weight 1.1) ------------------------------
    match swing_pattern(closes, 20) {
        SwingPattern::HigherHighs => {
            signals.push(signal("higher_highs", SignalDirection::Long, 1.1, 60.0))
        }
        SwingPattern::LowerLows => {
            signals.push(signal("lower_lows", SignalDirection::Short, 1.1, 60.0))
        }
        SwingPattern::Mixed => {}
    }

    // --- Williams %R (weight 1.0) --------------------------------------------
    let wr = williams_r(closes, 14);
    if wr <= -80.0 {
        signals.push(signal("williams_r", SignalDirection::Long, 1.0, 55.0));
    } else if wr >= -20.0 {
        signals.push(signal("williams_r", SignalDirection::Short, 1.0, 55.0));
    }

    // --- CCI (weight 1.0) ----------------------------------------------------
    let cci_value = cci(closes, 20);
    if cci_value <= -100.0 {
        signals.push(signal("cci", SignalDirection::Long, 1.0, (cci_value.abs() / 2.0).min(100.0)));
    } else if cci_value >= 100.0 {
        signals.push(signal("cci", SignalDirection::Short, 1.0, (cci_value / 2.0).min(100.0)));
    }

    // --- Trend strength (weight 1.0) -----------------------------------------
    let trend = trend_strength(closes);
    match trend.direction {
        TrendDirection::Up => {
            signals.push(signal("trend", SignalDirection::Long, 1.0, trend.strength))
        }
        TrendDirection::Down => {
            signals.push(signal("trend", SignalDirection::Short, 1.0, trend.strength))
        }
        TrendDirection::Sideways => {}
    }

    // --- Book-derived signals ------------------------------------------------
    if let Some(book) = book {
        // Order-book imbalance (weight 0.8).
        if book.imbalance >= 0.65 {
            signals.push(signal(
                "book_imbalance",
                SignalDirection::Long,
                0.8,
                ((book.imbalance - 0.5) * 200.0).min(100.0),
            ));
        } else if book.imbalance <= 0.35 {
            signals.push(signal(
                "book_imbalance",
                SignalDirection::Short,
                0.8,
                ((0.5 - book.imbalance) * 200.0).min(100.0),
            ));
        }

        // Order-flow delta, strong readings only (weight 1.4).
        let flow = order_flow(book);
        match flow.bias {
            FlowBias::StrongBuy => {
                signals.push(signal("order_flow", SignalDirection::Long, 1.4, 80.0))
            }
            FlowBias::StrongSell => {
                signals.push(signal("order_flow", SignalDirection::Short, 1.4, 80.0))
            }
            _ => {}
        }
    }

    decide(signals)
}

fn signal(
    name: &'static str,
    direction: SignalDirection,
    weight: f64,
    strength: f64,
) -> ConfluenceSignal {
    ConfluenceSignal {
        name,
        direction,
        weight,
        strength: strength.clamp(0.0, 100.0),
    }
}

/// Pick a direction and compute the winning side's weighted strength.
fn decide(signals: Vec<ConfluenceSignal>) -> ConfluenceReport {
    let longs = signals
        .iter()
        .filter(|s| s.direction == SignalDirection::Long)
        .count();
    let shorts = signals.len() - longs;

    let direction = if longs >= shorts + 2 && longs >= 2 {
        Some(SignalDirection::Long)
    } else if shorts >= longs + 2 && shorts >= 2 {
        Some(SignalDirection::Short)
    } else {
        None
    };

    let (aligned_count, total_strength) = match direction {
        Some(dir) => {
            let aligned: Vec<&ConfluenceSignal> =
                signals.iter().filter(|s| s.direction == dir).collect();
            let weight_sum: f64 = aligned.iter().map(|s| s.weight).sum();
            let strength = if weight_sum > 0.0 {
                (aligned.iter().map(|s| s.strength * s.weight).sum::<f64>() / weight_sum).round()
            } else {
                0.0
            };
            (aligned.len(), strength)
        }
        None => (0, 0.0),
    };

    ConfluenceReport {
        signals,
        direction,
        aligned_count,
        total_strength,
    }
}
