// =============================================================================
// Market Regime Detector — trend / range / volatility classification
// =============================================================================
//
// Classification inputs: ADX-style trend strength, the EMA stack, the 20-bar
// range percentage, and recent-vs-average volatility. The assessment carries
// the TP/SL multipliers the SL/TP builder applies:
//
//   trending:  TP x1.5, SL x0.8
//   ranging:   TP x0.7, SL x1.0
//   volatile:  TP x0.5, SL x1.5, recommendation Avoid
// =============================================================================

use serde::Serialize;

use crate::indicators::ema::ema;
use crate::indicators::levels::trend_strength;
use crate::indicators::stats::volatility;

/// Samples required before the detector commits to a label.
const MIN_SAMPLES: usize = 30;
/// Recent window for the volatility comparison.
const RECENT_WINDOW: usize = 10;
/// Recent volatility above this multiple of average volatility reads volatile.
const VOLATILE_RATIO: f64 = 1.8;
/// Absolute recent-volatility floor for the volatile label, percent.
const VOLATILE_FLOOR_PCT: f64 = 0.8;
/// ADX threshold for a trending label.
const TREND_ADX: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Unknown,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "trending_up"),
            Self::TrendingDown => write!(f, "trending_down"),
            Self::Ranging => write!(f, "ranging"),
            Self::Volatile => write!(f, "volatile"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// What the regime recommends doing this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeStrategy {
    Trade,
    Caution,
    Avoid,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeAssessment {
    pub regime: Regime,
    pub tp_multiplier: f64,
    pub sl_multiplier: f64,
    pub strategy: RegimeStrategy,
    /// Trend strength 0-100 backing the label.
    pub strength: f64,
}

/// Classify the current market structure from the close series.
pub fn classify(closes: &[f64]) -> RegimeAssessment {
    if closes.len() < MIN_SAMPLES {
        return RegimeAssessment {
            regime: Regime::Unknown,
            tp_multiplier: 1.0,
            sl_multiplier: 1.0,
            strategy: RegimeStrategy::Caution,
            strength: 0.0,
        };
    }

    let trend = trend_strength(closes);

    // Volatility: compare the recent window against the whole series.
    let avg_vol = volatility(closes);
    let recent_vol = volatility(&closes[closes.len() - RECENT_WINDOW..]);
    if recent_vol >= VOLATILE_FLOOR_PCT && avg_vol > 0.0 && recent_vol / avg_vol >= VOLATILE_RATIO {
        return RegimeAssessment {
            regime: Regime::Volatile,
            tp_multiplier: 0.5,
            sl_multiplier: 1.5,
            strategy: RegimeStrategy::Avoid,
            strength: trend.strength,
        };
    }

    // Trending: strong ADX with an agreeing EMA stack.
    if trend.strength >= TREND_ADX {
        let stacked_up = matches!((ema(closes, 9), ema(closes, 21)), (Some(f), Some(s)) if f > s);
        let regime = match trend.direction {
            crate::indicators::levels::TrendDirection::Up if stacked_up => Regime::TrendingUp,
            crate::indicators::levels::TrendDirection::Down if !stacked_up => Regime::TrendingDown,
            _ => Regime::Ranging,
        };
        if regime != Regime::Ranging {
            return RegimeAssessment {
                regime,
                tp_multiplier: 1.5,
                sl_multiplier: 0.8,
                strategy: RegimeStrategy::Trade,
                strength: trend.strength,
            };
        }
    }

    RegimeAssessment {
        regime: Regime::Ranging,
        tp_multiplier: 0.7,
        sl_multiplier: 1.0,
        strategy: RegimeStrategy::Trade,
        strength: trend.strength,
    }
}
