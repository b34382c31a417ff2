// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing
// =============================================================================
//
// Step 1 — Deltas from consecutive closes.
// Step 2 — Seed average gain / loss with the SMA of the first `period` deltas.
// Step 3 — Wilder smoothing:
//            avg = (prev_avg * (period - 1) + current) / period
// Step 4 — RS = avg_gain / avg_loss,  RSI = 100 - 100 / (1 + RS)
//
// Fewer than period + 1 closes yields the neutral value 50.
// =============================================================================

/// Latest RSI value in [0, 100]; 50 when there is not enough data.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    rsi_series(closes, period).last().copied().unwrap_or(50.0)
}

/// Full RSI series, one value per close starting at index `period`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut series = Vec::with_capacity(deltas.len() - period + 1);
    series.push(from_averages(avg_gain, avg_loss));

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        series.push(from_averages(avg_gain, avg_loss));
    }

    series
}

fn from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_neutral() {
        assert!((rsi(&[], 14) - 50.0).abs() < f64::EPSILON);
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!((rsi(&closes, 14) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn all_gains_is_100() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert!((rsi(&closes, 14) - 100.0).abs() < 1e-10);
    }

    #[test]
    fn all_losses_is_0() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        assert!(rsi(&closes, 14).abs() < 1e-10);
    }

    #[test]
    fn flat_market_is_neutral() {
        let closes = vec![100.0; 30];
        assert!((rsi(&closes, 14) - 50.0).abs() < 1e-10);
    }

    #[test]
    fn stays_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13, 44.01, 43.50,
        ];
        for v in rsi_series(&closes, 14) {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }

    #[test]
    fn known_vector() {
        // Classic Wilder example series; first RSI lands near 70.
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28,
        ];
        let series = rsi_series(&closes, 14);
        assert_eq!(series.len(), 1);
        assert!((series[0] - 70.46).abs() < 0.5, "got {}", series[0]);
    }
}
