// =============================================================================
// Statistical indicators — volatility, Z-Score, VWAP
// =============================================================================

use serde::Serialize;

// -----------------------------------------------------------------------------
// Volatility
// -----------------------------------------------------------------------------

/// Standard deviation of percentage returns over the series, in percent.
/// Zero on insufficient data.
pub fn volatility(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

// -----------------------------------------------------------------------------
// Z-Score
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZSignal {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZScore {
    pub value: f64,
    pub signal: ZSignal,
}

/// Z-Score of the latest close against the last `period` closes. Signal
/// thresholds: beyond +/-2 buy/sell, beyond +/-2.5 strong. Mean reversion:
/// a deeply negative score is a buy.
pub fn z_score(closes: &[f64], period: usize) -> Option<ZScore> {
    if period < 2 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return Some(ZScore {
            value: 0.0,
            signal: ZSignal::Neutral,
        });
    }

    let value = (window[window.len() - 1] - mean) / stddev;
    let signal = if value <= -2.5 {
        ZSignal::StrongBuy
    } else if value <= -2.0 {
        ZSignal::Buy
    } else if value >= 2.5 {
        ZSignal::StrongSell
    } else if value >= 2.0 {
        ZSignal::Sell
    } else {
        ZSignal::Neutral
    };

    Some(ZScore { value, signal })
}

// -----------------------------------------------------------------------------
// VWAP
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Vwap {
    pub vwap: f64,
    /// VWAP + one volume-weighted standard deviation.
    pub upper_band: f64,
    /// VWAP - one volume-weighted standard deviation.
    pub lower_band: f64,
}

/// Volume-weighted average price with one-sigma bands over `(price, volume)`
/// samples. `None` when total volume is zero.
pub fn vwap(samples: &[(f64, f64)]) -> Option<Vwap> {
    let total_volume: f64 = samples.iter().map(|(_, v)| v).sum();
    if total_volume <= 0.0 {
        return None;
    }

    let vwap_value = samples.iter().map(|(p, v)| p * v).sum::<f64>() / total_volume;
    let variance = samples
        .iter()
        .map(|(p, v)| (p - vwap_value).powi(2) * v)
        .sum::<f64>()
        / total_volume;
    let sigma = variance.sqrt();

    Some(Vwap {
        vwap: vwap_value,
        upper_band: vwap_value + sigma,
        lower_band: vwap_value - sigma,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatility_edge_cases() {
        assert!(volatility(&[]).abs() < f64::EPSILON);
        assert!(volatility(&[100.0]).abs() < f64::EPSILON);
        assert!(volatility(&[100.0; 20]).abs() < f64::EPSILON);
    }

    #[test]
    fn volatility_constant_returns_is_zero() {
        // +1% every step: all returns equal, stddev 0.
        let mut closes = vec![100.0];
        for _ in 0..20 {
            closes.push(closes.last().unwrap() * 1.01);
        }
        assert!(volatility(&closes) < 1e-9);
    }

    #[test]
    fn volatility_alternating_moves() {
        let closes: Vec<f64> = (0..30)
            .map(|x| if x % 2 == 0 { 100.0 } else { 102.0 })
            .collect();
        assert!(volatility(&closes) > 1.5);
    }

    #[test]
    fn z_score_signals() {
        let mut closes = vec![100.0; 19];
        closes.push(100.0);
        assert_eq!(z_score(&closes, 20).unwrap().signal, ZSignal::Neutral);

        // One large downside outlier in the window drags the close deeply
        // below the mean when the close itself is the low.
        let mut closes: Vec<f64> = (0..19).map(|x| 100.0 + (x % 3) as f64 * 0.1).collect();
        closes.push(95.0);
        let z = z_score(&closes, 20).unwrap();
        assert!(z.value < -2.5);
        assert_eq!(z.signal, ZSignal::StrongBuy);
    }

    #[test]
    fn z_score_insufficient_data() {
        assert!(z_score(&[1.0, 2.0], 20).is_none());
    }

    #[test]
    fn vwap_weights_by_volume() {
        let samples = [(100.0, 1.0), (110.0, 3.0)];
        let v = vwap(&samples).unwrap();
        assert!((v.vwap - 107.5).abs() < 1e-9);
        assert!(v.upper_band > v.vwap && v.lower_band < v.vwap);
    }

    #[test]
    fn vwap_zero_volume_is_none() {
        assert!(vwap(&[(100.0, 0.0)]).is_none());
        assert!(vwap(&[]).is_none());
    }
}
