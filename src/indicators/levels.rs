// =============================================================================
// Price structure — support/resistance, trend strength, momentum, swings
// =============================================================================

use serde::Serialize;

use super::adx::adx;
use super::ema::ema;

/// Window for support/resistance quantiles.
const SR_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
}

/// Support = 20% quantile, resistance = 80% quantile of the last 20 closes.
pub fn support_resistance(closes: &[f64]) -> Option<SupportResistance> {
    if closes.len() < SR_WINDOW {
        return None;
    }
    let mut window: Vec<f64> = closes[closes.len() - SR_WINDOW..].to_vec();
    window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let quantile = |q: f64| -> f64 {
        let idx = (q * (window.len() - 1) as f64).round() as usize;
        window[idx.min(window.len() - 1)]
    };

    Some(SupportResistance {
        support: quantile(0.2),
        resistance: quantile(0.8),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendStrength {
    /// 0-100, ADX-scaled.
    pub strength: f64,
    pub direction: TrendDirection,
}

/// ADX-based trend strength with an EMA-stack direction check.
pub fn trend_strength(closes: &[f64]) -> TrendStrength {
    let Some(a) = adx(closes, 14) else {
        return TrendStrength {
            strength: 0.0,
            direction: TrendDirection::Sideways,
        };
    };

    let direction = match (ema(closes, 9), ema(closes, 21)) {
        (Some(fast), Some(slow)) if a.adx >= 20.0 && fast > slow => TrendDirection::Up,
        (Some(fast), Some(slow)) if a.adx >= 20.0 && fast < slow => TrendDirection::Down,
        _ => TrendDirection::Sideways,
    };

    TrendStrength {
        strength: a.adx.clamp(0.0, 100.0),
        direction,
    }
}

/// Percentage change over the last `lookback` closes. Zero on insufficient
/// data.
pub fn momentum(closes: &[f64], lookback: usize) -> f64 {
    if lookback == 0 || closes.len() <= lookback {
        return 0.0;
    }
    let past = closes[closes.len() - 1 - lookback];
    if past == 0.0 {
        return 0.0;
    }
    (closes[closes.len() - 1] - past) / past * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingPattern {
    HigherHighs,
    LowerLows,
    Mixed,
}

/// Compare the two most recent half-windows: both the max and min rising is
/// a higher-high structure, both falling is lower-lows.
pub fn swing_pattern(closes: &[f64], window: usize) -> SwingPattern {
    if window < 4 || closes.len() < window {
        return SwingPattern::Mixed;
    }
    let recent = &closes[closes.len() - window..];
    let half = window / 2;
    let (older, newer) = recent.split_at(half);

    let max = |s: &[f64]| s.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = |s: &[f64]| s.iter().cloned().fold(f64::INFINITY, f64::min);

    if max(newer) > max(older) && min(newer) > min(older) {
        SwingPattern::HigherHighs
    } else if max(newer) < max(older) && min(newer) < min(older) {
        SwingPattern::LowerLows
    } else {
        SwingPattern::Mixed
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_resistance_quantiles() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let sr = support_resistance(&closes).unwrap();
        // Sorted window is 1..=20; 20% -> index 4 (value 5), 80% -> index 15 (16).
        assert!((sr.support - 5.0).abs() < 1e-9);
        assert!((sr.resistance - 16.0).abs() < 1e-9);
        assert!(sr.support < sr.resistance);
    }

    #[test]
    fn support_resistance_needs_window() {
        assert!(support_resistance(&[1.0; 19]).is_none());
    }

    #[test]
    fn trend_strength_direction() {
        let up: Vec<f64> = (0..60).map(|x| 100.0 + x as f64).collect();
        let t = trend_strength(&up);
        assert_eq!(t.direction, TrendDirection::Up);
        assert!(t.strength > 50.0);

        let down: Vec<f64> = (0..60).map(|x| 200.0 - x as f64).collect();
        assert_eq!(trend_strength(&down).direction, TrendDirection::Down);

        let flat = vec![100.0; 60];
        assert_eq!(trend_strength(&flat).direction, TrendDirection::Sideways);
    }

    #[test]
    fn momentum_pct_change() {
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        assert!((momentum(&closes, 5) - 5.0).abs() < 1e-9);
        assert!(momentum(&closes, 10).abs() < f64::EPSILON);
    }

    #[test]
    fn swing_patterns() {
        let up: Vec<f64> = (0..20).map(|x| x as f64).collect();
        assert_eq!(swing_pattern(&up, 10), SwingPattern::HigherHighs);

        let down: Vec<f64> = (0..20).rev().map(|x| x as f64).collect();
        assert_eq!(swing_pattern(&down, 10), SwingPattern::LowerLows);

        let flat = vec![5.0; 20];
        assert_eq!(swing_pattern(&flat, 10), SwingPattern::Mixed);
    }
}
