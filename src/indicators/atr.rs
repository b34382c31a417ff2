// =============================================================================
// Average True Range — close-to-close variant
// =============================================================================
//
// The engine samples closes only, so the true range collapses to the
// absolute close-to-close move. Wilder-smoothed over `period`.
// =============================================================================

/// ATR in price units. `None` with fewer than `period + 1` closes.
pub fn atr(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let ranges: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]).abs()).collect();

    let period_f = period as f64;
    let mut value = ranges[..period].iter().sum::<f64>() / period_f;
    for &r in &ranges[period..] {
        value = (value * (period_f - 1.0) + r) / period_f;
    }
    Some(value)
}

/// ATR as a percentage of the latest close. `None` on insufficient data or a
/// non-positive close.
pub fn atr_pct(closes: &[f64], period: usize) -> Option<f64> {
    let last = *closes.last()?;
    if last <= 0.0 {
        return None;
    }
    atr(closes, period).map(|a| a / last * 100.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_none() {
        assert!(atr(&[], 14).is_none());
        assert!(atr(&[1.0; 14], 14).is_none());
        assert!(atr(&[1.0; 15], 0).is_none());
    }

    #[test]
    fn constant_steps_converge_to_step_size() {
        let closes: Vec<f64> = (0..40).map(|x| x as f64 * 2.0).collect();
        let value = atr(&closes, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn flat_series_is_zero() {
        assert!(atr(&[100.0; 30], 14).unwrap().abs() < 1e-12);
    }

    #[test]
    fn pct_scales_by_close() {
        let closes: Vec<f64> = (0..40).map(|x| 100.0 + x as f64).collect();
        // ATR 1.0 on a close of 139 => ~0.72%.
        let pct = atr_pct(&closes, 14).unwrap();
        assert!((pct - 100.0 / 139.0).abs() < 1e-6);
    }
}
