// =============================================================================
// Oscillators — Stochastic RSI, Williams %R, CCI
// =============================================================================
//
// All three work on the close ring (typical price = close), matching how the
// market cache samples prices.
// =============================================================================

use serde::Serialize;

use super::ema::sma;
use super::rsi::rsi_series;

// -----------------------------------------------------------------------------
// Stochastic RSI
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StochCross {
    BullishCross,
    BearishCross,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct StochRsi {
    /// %K in [0, 100], SMA(3)-smoothed.
    pub k: f64,
    /// %D in [0, 100], SMA(3) of %K.
    pub d: f64,
    pub crossover: StochCross,
}

/// Stochastic RSI: the stochastic of the RSI series over `stoch_period`,
/// with 3/3 smoothing. `None` on insufficient data.
pub fn stoch_rsi(closes: &[f64], rsi_period: usize, stoch_period: usize) -> Option<StochRsi> {
    let rsi = rsi_series(closes, rsi_period);
    if stoch_period == 0 || rsi.len() < stoch_period + 4 {
        return None;
    }

    // Raw stochastic of RSI for every window position.
    let raw: Vec<f64> = rsi
        .windows(stoch_period)
        .map(|w| {
            let min = w.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = w.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let last = w[w.len() - 1];
            if max > min {
                (last - min) / (max - min) * 100.0
            } else {
                50.0
            }
        })
        .collect();

    // %K = SMA(3) of raw, %D = SMA(3) of %K; keep the last two of each for
    // crossover detection.
    let k_series: Vec<f64> = raw.windows(3).map(|w| w.iter().sum::<f64>() / 3.0).collect();
    let d_series: Vec<f64> = k_series
        .windows(3)
        .map(|w| w.iter().sum::<f64>() / 3.0)
        .collect();
    if k_series.len() < 2 || d_series.len() < 2 {
        return None;
    }

    let k_now = *k_series.last()?;
    let d_now = *d_series.last()?;
    let k_prev = k_series[k_series.len() - 2];
    let d_prev = d_series[d_series.len() - 2];

    let crossover = if k_prev <= d_prev && k_now > d_now {
        StochCross::BullishCross
    } else if k_prev >= d_prev && k_now < d_now {
        StochCross::BearishCross
    } else {
        StochCross::None
    };

    Some(StochRsi {
        k: k_now,
        d: d_now,
        crossover,
    })
}

// -----------------------------------------------------------------------------
// Williams %R
// -----------------------------------------------------------------------------

/// Williams %R over the last `period` closes, in [-100, 0]. Neutral -50 on
/// insufficient data.
pub fn williams_r(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period {
        return -50.0;
    }
    let window = &closes[closes.len() - period..];
    let highest = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let lowest = window.iter().cloned().fold(f64::INFINITY, f64::min);
    let close = window[window.len() - 1];

    if highest > lowest {
        (highest - close) / (highest - lowest) * -100.0
    } else {
        -50.0
    }
}

// -----------------------------------------------------------------------------
// Commodity Channel Index
// -----------------------------------------------------------------------------

/// CCI over the last `period` closes. Neutral 0 on insufficient data.
pub fn cci(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period {
        return 0.0;
    }
    let window = &closes[closes.len() - period..];
    let Some(mean) = sma(window, period) else {
        return 0.0;
    };

    let mean_dev = window.iter().map(|c| (c - mean).abs()).sum::<f64>() / period as f64;
    if mean_dev == 0.0 {
        return 0.0;
    }
    (window[window.len() - 1] - mean) / (0.015 * mean_dev)
}
