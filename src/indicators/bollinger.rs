// =============================================================================
// Bollinger Bands — with %B, bandwidth, and squeeze flag
// =============================================================================

use serde::Serialize;

use super::ema::sma;

/// Bandwidth below this percentage flags a squeeze.
const SQUEEZE_BANDWIDTH_PCT: f64 = 4.0;

#[derive(Debug, Clone, Serialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Close position within the bands: 0 at lower, 1 at upper.
    pub percent_b: f64,
    /// (upper - lower) / middle * 100.
    pub bandwidth: f64,
    /// Bandwidth under 4%: volatility compression.
    pub squeeze: bool,
}

/// Bollinger(period, mult). `None` with fewer than `period` closes.
pub fn bollinger(closes: &[f64], period: usize, mult: f64) -> Option<Bollinger> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = sma(window, period)?;

    let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();

    let upper = middle + mult * stddev;
    let lower = middle - mult * stddev;
    let close = window[window.len() - 1];

    let percent_b = if upper > lower {
        (close - lower) / (upper - lower)
    } else {
        0.5
    };
    let bandwidth = if middle != 0.0 {
        (upper - lower) / middle * 100.0
    } else {
        0.0
    };

    Some(Bollinger {
        upper,
        middle,
        lower,
        percent_b,
        bandwidth,
        squeeze: bandwidth < SQUEEZE_BANDWIDTH_PCT,
    })
}

/// Standard Bollinger(20, 2).
pub fn bollinger_standard(closes: &[f64]) -> Option<Bollinger> {
    bollinger(closes, 20, 2.0)
}
