// =============================================================================
// Strategic SL/TP builder — ATR blend, regime awareness, fee-aware TP gate
// =============================================================================
//
// Fixed path: the user's base percentages scaled by the regime multipliers.
//
// Smart path (enough history + opted in): base percentages blended 60/40
// with ATR-derived percentages, then adjusted for trend alignment, trend
// strength, the volatility band, and the profile. The stop distance is
// clamped between 0.5x and 2x the base stop, and snapped just beyond a
// support/resistance level when one sits strategically closer.
// =============================================================================

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::indicators::atr::atr_pct;
use crate::indicators::levels::{support_resistance, trend_strength, TrendDirection};
use crate::indicators::stats::volatility;
use crate::settings::Settings;
use crate::types::{Side, TradingProfile};
use crate::venue::rounding::taker_fee;

use super::regime::RegimeAssessment;

/// Samples required for the smart path.
const SMART_MIN_SAMPLES: usize = 30;
/// Profit at TP must exceed this multiple of round-trip fees.
const MIN_PROFIT_FEE_MULT: Decimal = rust_decimal_macros::dec!(1.5);
/// Snap margin past a support/resistance level, fraction.
const SNAP_MARGIN: f64 = 0.001;

#[derive(Debug, Clone, Serialize)]
pub struct SlTpPlan {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub risk_reward: f64,
    /// Whether the smart path produced this plan.
    pub smart: bool,
}

/// Build the SL/TP plan for an entry at `entry`.
pub fn build_plan(
    entry: Decimal,
    side: Side,
    settings: &Settings,
    closes: &[f64],
    regime: &RegimeAssessment,
) -> SlTpPlan {
    let base_sl = settings.stop_loss_pct;
    let base_tp = settings.take_profit_pct;

    let (sl_pct, tp_pct, smart) = if settings.use_smart_sltp && closes.len() >= SMART_MIN_SAMPLES {
        smart_percentages(side, settings, closes, regime)
    } else {
        (
            base_sl * regime.sl_multiplier,
            base_tp * regime.tp_multiplier,
            false,
        )
    };

    let (stop_loss, take_profit) = to_prices(entry, side, sl_pct, tp_pct);
    let stop_loss = if smart {
        let snapped = snap_to_structure(entry, stop_loss, side, closes);
        // A snap that would leave the stop tighter than half the base stop
        // is discarded; the clamp outranks structure.
        if pct_distance(entry, snapped) >= base_sl * 0.5 {
            snapped
        } else {
            stop_loss
        }
    } else {
        stop_loss
    };

    // Recompute the stop percentage after a snap so R:R stays truthful.
    let final_sl_pct = pct_distance(entry, stop_loss);
    let risk_reward = if final_sl_pct > 0.0 {
        tp_pct / final_sl_pct
    } else {
        0.0
    };

    SlTpPlan {
        stop_loss,
        take_profit,
        stop_loss_pct: final_sl_pct,
        take_profit_pct: tp_pct,
        risk_reward,
        smart,
    }
}

fn smart_percentages(
    side: Side,
    settings: &Settings,
    closes: &[f64],
    regime: &RegimeAssessment,
) -> (f64, f64, bool) {
    let base_sl = settings.stop_loss_pct;
    let base_tp = settings.take_profit_pct;

    let atr = atr_pct(closes, 14).unwrap_or(base_sl / 1.5);
    let atr_sl = atr * 1.5;
    let atr_tp = atr * 3.0;

    // 60/40 blend of user settings and ATR.
    let mut sl_pct = base_sl * 0.6 + atr_sl * 0.4;
    let mut tp_pct = base_tp * 0.6 + atr_tp * 0.4;

    // Trend alignment: with-trend trades get the regime's full extension,
    // counter-trend trades get cut.
    let trend = trend_strength(closes);
    let aligned = matches!(
        (trend.direction, side),
        (TrendDirection::Up, Side::Buy) | (TrendDirection::Down, Side::Sell)
    );
    if aligned {
        tp_pct *= regime.tp_multiplier;
        sl_pct *= regime.sl_multiplier;
    } else {
        tp_pct *= 0.8;
    }

    // Trend strength nudges the target up to +/-10%.
    let strength_adj = ((trend.strength - 25.0) / 250.0).clamp(-0.1, 0.1);
    tp_pct *= 1.0 + strength_adj;

    // Volatility band: a hot tape needs a wider stop, a dead one does not.
    let vol = volatility(closes);
    if vol > 1.0 {
        sl_pct *= 1.15;
    } else if vol < 0.3 {
        sl_pct *= 0.9;
    }

    // Profile adjustment.
    match settings.profile {
        TradingProfile::Aggressive => {
            tp_pct *= 1.1;
            sl_pct *= 0.9;
        }
        TradingProfile::Conservative => {
            tp_pct *= 0.9;
            sl_pct *= 1.1;
        }
        TradingProfile::Moderate => {}
    }

    // The stop never strays past 0.5x-2x of the user's base stop.
    sl_pct = sl_pct.clamp(base_sl * 0.5, base_sl * 2.0);

    (sl_pct, tp_pct, true)
}

fn to_prices(entry: Decimal, side: Side, sl_pct: f64, tp_pct: f64) -> (Decimal, Decimal) {
    let sl_frac = Decimal::from_f64(sl_pct / 100.0).unwrap_or_default();
    let tp_frac = Decimal::from_f64(tp_pct / 100.0).unwrap_or_default();
    match side {
        Side::Buy => (
            entry * (Decimal::ONE - sl_frac),
            entry * (Decimal::ONE + tp_frac),
        ),
        Side::Sell => (
            entry * (Decimal::ONE + sl_frac),
            entry * (Decimal::ONE - tp_frac),
        ),
    }
}

/// Move the stop just past a support (long) or resistance (short) level when
/// that level sits between the raw stop and the entry.
fn snap_to_structure(entry: Decimal, raw_sl: Decimal, side: Side, closes: &[f64]) -> Decimal {
    let Some(sr) = support_resistance(closes) else {
        return raw_sl;
    };

    match side {
        Side::Buy => {
            let support = Decimal::from_f64(sr.support * (1.0 - SNAP_MARGIN)).unwrap_or_default();
            if support > raw_sl && support < entry {
                return support;
            }
        }
        Side::Sell => {
            let resistance =
                Decimal::from_f64(sr.resistance * (1.0 + SNAP_MARGIN)).unwrap_or_default();
            if resistance < raw_sl && resistance > entry {
                return resistance;
            }
        }
    }
    raw_sl
}

fn pct_distance(entry: Decimal, level: Decimal) -> f64 {
    if entry.is_zero() {
        return 0.0;
    }
    ((entry - level).abs() / entry * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}

// -----------------------------------------------------------------------------
// Fee-aware profitability gate
// -----------------------------------------------------------------------------

/// Verify the trade is worth its fees: net profit at TP must be positive and
/// at least 1.5x the round-trip taker fees. Returns the projected net profit.
pub fn profitability_check(
    entry: Decimal,
    take_profit: Decimal,
    quantity: Decimal,
    side: Side,
) -> Result<Decimal, String> {
    let entry_fee = taker_fee(entry, quantity);
    let exit_fee = taker_fee(take_profit, quantity);
    let total_fees = entry_fee + exit_fee;

    let gross = side.sign() * (take_profit - entry) * quantity;
    let net = gross - total_fees;

    if net <= Decimal::ZERO {
        return Err(format!("unprofitable at TP: net {net}"));
    }
    if net < total_fees * MIN_PROFIT_FEE_MULT {
        return Err(format!(
            "profit {net} below {MIN_PROFIT_FEE_MULT}x fees {total_fees}"
        ));
    }
    Ok(net)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::regime::{Regime, RegimeStrategy};
    use rust_decimal_macros::dec;

    fn trending_up() -> RegimeAssessment {
        RegimeAssessment {
            regime: Regime::TrendingUp,
            tp_multiplier: 1.5,
            sl_multiplier: 0.8,
            strategy: RegimeStrategy::Trade,
            strength: 40.0,
        }
    }

    fn fixed_settings() -> Settings {
        Settings {
            use_smart_sltp: false,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
            ..Settings::default()
        }
    }

    #[test]
    fn fixed_path_applies_regime_multipliers() {
        let plan = build_plan(dec!(100), Side::Buy, &fixed_settings(), &[], &trending_up());
        assert!(!plan.smart);
        // TP 4% x 1.5 = 6%, SL 2% x 0.8 = 1.6%.
        assert_eq!(plan.take_profit, dec!(106.0));
        assert_eq!(plan.stop_loss, dec!(98.4));
        assert!((plan.risk_reward - 3.75).abs() < 1e-9);
    }

    #[test]
    fn fixed_path_short_mirrors() {
        let plan = build_plan(dec!(100), Side::Sell, &fixed_settings(), &[], &trending_up());
        assert_eq!(plan.take_profit, dec!(94.0));
        assert_eq!(plan.stop_loss, dec!(101.6));
    }

    #[test]
    fn smart_path_needs_history() {
        let mut settings = fixed_settings();
        settings.use_smart_sltp = true;
        let closes = vec![100.0; 10];
        let plan = build_plan(dec!(100), Side::Buy, &settings, &closes, &trending_up());
        assert!(!plan.smart);
    }

    #[test]
    fn smart_stop_respects_clamp() {
        let mut settings = fixed_settings();
        settings.use_smart_sltp = true;
        // Violently volatile series: huge ATR would blow the stop out
        // without the 2x clamp.
        let closes: Vec<f64> = (0..60)
            .map(|x| if x % 2 == 0 { 100.0 } else { 110.0 })
            .collect();
        let plan = build_plan(dec!(100), Side::Buy, &settings, &closes, &trending_up());
        assert!(plan.smart);
        assert!(plan.stop_loss_pct <= 2.0 * settings.stop_loss_pct + 1e-9);
        assert!(plan.stop_loss_pct >= 0.5 * settings.stop_loss_pct - 1e-9);
    }

    #[test]
    fn smart_long_keeps_levels_ordered() {
        let mut settings = fixed_settings();
        settings.use_smart_sltp = true;
        let closes: Vec<f64> = (0..60).map(|x| 100.0 + x as f64 * 0.2).collect();
        let entry = dec!(111.8);
        let plan = build_plan(entry, Side::Buy, &settings, &closes, &trending_up());
        assert!(plan.smart);
        assert!(plan.stop_loss < entry);
        assert!(plan.take_profit > entry);
        assert!(plan.risk_reward > 0.0);
    }

    #[test]
    fn snap_moves_stop_behind_support() {
        // Support (20% quantile of the last 20 closes) sits just below entry;
        // the raw stop is far beneath it.
        let closes: Vec<f64> = (0..30).map(|x| 99.0 + (x % 5) as f64 * 0.5).collect();
        let entry = dec!(101);
        let raw_sl = dec!(95);
        let snapped = snap_to_structure(entry, raw_sl, Side::Buy, &closes);
        assert!(snapped > raw_sl);
        assert!(snapped < entry);
    }

    #[test]
    fn profitability_gate_accepts_wide_tp() {
        // 0.01 BTC at 50000: fees ~0.35 total; +4% TP nets ~19.6.
        let net = profitability_check(dec!(50000), dec!(52000), dec!(0.01), Side::Buy).unwrap();
        assert!(net > dec!(19));
    }

    #[test]
    fn profitability_gate_rejects_thin_tp() {
        // +0.05% TP cannot cover 1.5x fees.
        let err = profitability_check(dec!(50000), dec!(50025), dec!(0.01), Side::Buy).unwrap_err();
        assert!(err.contains("fees") || err.contains("unprofitable"));
    }

    #[test]
    fn profitability_gate_rejects_inverted_tp() {
        let err = profitability_check(dec!(50000), dec!(49000), dec!(0.01), Side::Buy).unwrap_err();
        assert!(err.contains("unprofitable"));
    }

    #[test]
    fn profitability_gate_short_side() {
        let net = profitability_check(dec!(50000), dec!(48000), dec!(0.01), Side::Sell).unwrap();
        assert!(net > dec!(19));
    }
}
