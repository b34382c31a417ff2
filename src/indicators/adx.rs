// =============================================================================
// ADX with +DI / -DI — close-to-close directional movement
// =============================================================================
//
// Directional movement from close deltas: an up move contributes to +DM, a
// down move to -DM. Both are Wilder-smoothed, normalized by ATR into the
// directional indices, and the DX series is smoothed once more into ADX.
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Adx {
    /// Trend strength 0-100.
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// ADX(period). `None` with fewer than `2 * period + 1` closes.
pub fn adx(closes: &[f64], period: usize) -> Option<Adx> {
    if period == 0 || closes.len() < 2 * period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_f = period as f64;

    // Seed smoothed +DM, -DM, TR with plain sums.
    let mut plus_dm: f64 = deltas[..period].iter().filter(|&&d| d > 0.0).sum();
    let mut minus_dm: f64 = deltas[..period].iter().filter(|&&d| d < 0.0).map(|d| -d).sum();
    let mut tr: f64 = deltas[..period].iter().map(|d| d.abs()).sum();

    let mut dx_values = Vec::new();
    dx_values.push(dx(plus_dm, minus_dm, tr));

    for &delta in &deltas[period..] {
        let up = delta.max(0.0);
        let down = (-delta).max(0.0);
        plus_dm = plus_dm - plus_dm / period_f + up;
        minus_dm = minus_dm - minus_dm / period_f + down;
        tr = tr - tr / period_f + delta.abs();
        dx_values.push(dx(plus_dm, minus_dm, tr));
    }

    if dx_values.len() < period {
        return None;
    }

    // ADX = Wilder smoothing of DX.
    let mut adx_value = dx_values[..period].iter().sum::<f64>() / period_f;
    for &d in &dx_values[period..] {
        adx_value = (adx_value * (period_f - 1.0) + d) / period_f;
    }

    let (plus_di, minus_di) = if tr > 0.0 {
        (plus_dm / tr * 100.0, minus_dm / tr * 100.0)
    } else {
        (0.0, 0.0)
    };

    Some(Adx {
        adx: adx_value,
        plus_di,
        minus_di,
    })
}

fn dx(plus_dm: f64, minus_dm: f64, tr: f64) -> f64 {
    if tr <= 0.0 {
        return 0.0;
    }
    let plus_di = plus_dm / tr * 100.0;
    let minus_di = minus_dm / tr * 100.0;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        0.0
    } else {
        (plus_di - minus_di).abs() / sum * 100.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_none() {
        assert!(adx(&[1.0; 20], 14).is_none());
        assert!(adx(&[], 14).is_none());
    }

    #[test]
    fn strong_uptrend_maxes_adx() {
        let closes: Vec<f64> = (0..60).map(|x| x as f64).collect();
        let a = adx(&closes, 14).unwrap();
        assert!(a.adx > 90.0, "adx {}", a.adx);
        assert!(a.plus_di > a.minus_di);
    }

    #[test]
    fn strong_downtrend_favours_minus_di() {
        let closes: Vec<f64> = (0..60).rev().map(|x| x as f64).collect();
        let a = adx(&closes, 14).unwrap();
        assert!(a.adx > 90.0);
        assert!(a.minus_di > a.plus_di);
    }

    #[test]
    fn oscillation_reads_weak() {
        let closes: Vec<f64> = (0..60)
            .map(|x| 100.0 + if x % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let a = adx(&closes, 14).unwrap();
        assert!(a.adx < 25.0, "adx {}", a.adx);
    }

    #[test]
    fn flat_series_is_zero() {
        let a = adx(&[100.0; 60], 14).unwrap();
        assert!(a.adx.abs() < 1e-9);
        assert!(a.plus_di.abs() < 1e-9);
    }
}
