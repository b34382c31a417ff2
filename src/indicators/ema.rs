// =============================================================================
// Exponential Moving Average — SMA-seeded
// =============================================================================
//
// The first EMA value is the SMA of the first `period` closes; subsequent
// values apply the smoothing factor k = 2 / (period + 1).
// =============================================================================

/// Latest EMA value, `None` with fewer than `period` closes.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    ema_series(closes, period).last().copied()
}

/// Full EMA series, one value per close starting at index `period - 1`.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(closes.len() - period + 1);
    series.push(seed);

    let mut prev = seed;
    for &close in &closes[period..] {
        prev = (close - prev) * k + prev;
        series.push(prev);
    }
    series
}

/// Simple moving average of the last `period` closes.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    Some(closes[closes.len() - period..].iter().sum::<f64>() / period as f64)
}
