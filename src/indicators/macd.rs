// =============================================================================
// MACD — Moving Average Convergence/Divergence
// =============================================================================
//
// macd      = EMA(fast) - EMA(slow)
// signal    = EMA(macd, signal_period)
// histogram = macd - signal
//
// The crossover field compares the current macd/signal relationship against
// the previous sample, so a cross is reported exactly once.
// =============================================================================

use serde::Serialize;

use super::ema::ema_series;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdTrend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdCrossover {
    BullishCross,
    BearishCross,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub trend: MacdTrend,
    pub crossover: MacdCrossover,
}

/// MACD(fast, slow, signal). `None` until `slow + signal_period` closes are
/// available.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<Macd> {
    if fast == 0 || slow <= fast || closes.len() < slow + signal_period {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);

    // Align: slow starts (slow - fast) samples later than fast.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, &s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal_period);
    if signal_series.len() < 2 || macd_line.len() < 2 {
        return None;
    }

    let macd_now = *macd_line.last()?;
    let macd_prev = macd_line[macd_line.len() - 2];
    let signal_now = *signal_series.last()?;
    let signal_prev = signal_series[signal_series.len() - 2];

    let crossover = if macd_prev <= signal_prev && macd_now > signal_now {
        MacdCrossover::BullishCross
    } else if macd_prev >= signal_prev && macd_now < signal_now {
        MacdCrossover::BearishCross
    } else {
        MacdCrossover::None
    };

    let histogram = macd_now - signal_now;
    let trend = if histogram > 0.0 {
        MacdTrend::Bullish
    } else if histogram < 0.0 {
        MacdTrend::Bearish
    } else {
        MacdTrend::Neutral
    };

    Some(Macd {
        macd: macd_now,
        signal: signal_now,
        histogram,
        trend,
        crossover,
    })
}

/// Standard MACD(12, 26, 9).
pub fn macd_standard(closes: &[f64]) -> Option<Macd> {
    macd(closes, 12, 26, 9)
}
