// =============================================================================
// Dynamic position sizing — streak ladder, Kelly, drawdown governor
// =============================================================================
//
// The multiplier starts at 1.0 and is adjusted by the loss/win streak, the
// day's PnL, and confluence strength, clamped to [0.25, 2.0]. A half-Kelly
// factor scales it further once enough history exists, and the drawdown
// governor can force size down or pause entries entirely.
// =============================================================================

use serde::Serialize;

/// Final multiplier clamp.
const MULT_MIN: f64 = 0.25;
const MULT_MAX: f64 = 2.0;
/// Trades required before Kelly sizing kicks in.
const KELLY_MIN_TRADES: u32 = 10;
/// Half-Kelly output clamp.
const KELLY_MIN: f64 = 0.25;
const KELLY_MAX: f64 = 1.0;
/// Fraction of the drawdown limit where size reduction begins.
const REDUCE_AT_FRACTION: f64 = 0.7;

/// Inputs gathered from the day's stats and the current tick.
#[derive(Debug, Clone, Default)]
pub struct SizingInputs {
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    /// Wins / closed trades today, in [0, 1].
    pub win_rate: f64,
    /// Day PnL in account currency.
    pub daily_pnl: f64,
    /// Confluence strength of the current tick, 0-100.
    pub confluence_strength: f64,
    /// Current drawdown from the day's equity peak, percent.
    pub drawdown_pct: f64,
    /// User's drawdown limit, percent.
    pub max_drawdown_pct: f64,
    /// Closed-trade sample size backing win_rate / averages.
    pub closed_trades: u32,
    /// Average winning trade, account currency.
    pub avg_win: f64,
    /// Average losing trade (positive number), account currency.
    pub avg_loss: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizingDecision {
    /// Final multiplier applied to the base position size.
    pub multiplier: f64,
    /// Half-Kelly factor that was applied (1.0 when history is thin).
    pub kelly_factor: f64,
    pub should_reduce: bool,
    pub should_pause: bool,
}

/// Compute the sizing multiplier for this tick.
pub fn size_multiplier(inputs: &SizingInputs) -> SizingDecision {
    let mut mult: f64 = 1.0;

    // Loss ladder.
    mult *= match inputs.consecutive_losses {
        0 => 1.0,
        1 => 0.75,
        2 => 0.5,
        _ => 0.25,
    };

    // Hot streak with a real edge.
    if inputs.consecutive_wins >= 3 && inputs.win_rate >= 0.7 {
        mult *= 1.25;
    }

    // Day PnL.
    if inputs.daily_pnl < -50.0 {
        mult *= 0.5;
    } else if inputs.daily_pnl > 100.0 {
        mult *= 1.1;
    }

    // Confluence strength.
    if inputs.confluence_strength >= 80.0 {
        mult *= 1.2;
    } else if inputs.confluence_strength < 60.0 {
        mult *= 0.8;
    }

    mult = mult.clamp(MULT_MIN, MULT_MAX);

    // Half-Kelly once the sample is meaningful.
    let kelly_factor = half_kelly(inputs);
    mult = (mult * kelly_factor).clamp(MULT_MIN, MULT_MAX);

    // Drawdown governor.
    let (should_reduce, should_pause) = drawdown_state(inputs);
    if should_pause {
        mult = 0.0;
    } else if should_reduce {
        mult = (mult * 0.5).max(MULT_MIN);
    }

    SizingDecision {
        multiplier: mult,
        kelly_factor,
        should_reduce,
        should_pause,
    }
}

/// Half-Kelly fraction scaled to a multiplier, clamped to [0.25, 1.0].
/// Neutral 1.0 until `KELLY_MIN_TRADES` closed trades exist.
fn half_kelly(inputs: &SizingInputs) -> f64 {
    if inputs.closed_trades < KELLY_MIN_TRADES || inputs.avg_loss <= 0.0 {
        return 1.0;
    }
    let r = inputs.avg_win / inputs.avg_loss;
    if r <= 0.0 {
        return KELLY_MIN;
    }
    let w = inputs.win_rate.clamp(0.0, 1.0);
    let kelly = w - (1.0 - w) / r;
    // Half-Kelly, mapped so a full-Kelly of 0.5 is neutral size.
    let half = kelly / 2.0;
    (half * 4.0).clamp(KELLY_MIN, KELLY_MAX)
}

fn drawdown_state(inputs: &SizingInputs) -> (bool, bool) {
    if inputs.max_drawdown_pct <= 0.0 {
        return (false, false);
    }
    if inputs.drawdown_pct >= inputs.max_drawdown_pct {
        (true, true)
    } else if inputs.drawdown_pct >= inputs.max_drawdown_pct * REDUCE_AT_FRACTION {
        (true, false)
    } else {
        (false, false)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SizingInputs {
        SizingInputs {
            confluence_strength: 70.0,
            max_drawdown_pct: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn neutral_inputs_give_unit_multiplier() {
        let d = size_multiplier(&base());
        assert!((d.multiplier - 1.0).abs() < f64::EPSILON);
        assert!(!d.should_reduce);
        assert!(!d.should_pause);
    }

    #[test]
    fn loss_ladder() {
        let mut inputs = base();
        inputs.consecutive_losses = 1;
        assert!((size_multiplier(&inputs).multiplier - 0.75).abs() < f64::EPSILON);
        inputs.consecutive_losses = 2;
        assert!((size_multiplier(&inputs).multiplier - 0.5).abs() < f64::EPSILON);
        inputs.consecutive_losses = 5;
        assert!((size_multiplier(&inputs).multiplier - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn win_streak_boost_requires_win_rate() {
        let mut inputs = base();
        inputs.consecutive_wins = 3;
        inputs.win_rate = 0.75;
        assert!((size_multiplier(&inputs).multiplier - 1.25).abs() < f64::EPSILON);

        inputs.win_rate = 0.5;
        assert!((size_multiplier(&inputs).multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn daily_pnl_adjustments() {
        let mut inputs = base();
        inputs.daily_pnl = -60.0;
        assert!((size_multiplier(&inputs).multiplier - 0.5).abs() < f64::EPSILON);
        inputs.daily_pnl = 150.0;
        assert!((size_multiplier(&inputs).multiplier - 1.1).abs() < 1e-9);
    }

    #[test]
    fn confluence_adjustments() {
        let mut inputs = base();
        inputs.confluence_strength = 85.0;
        assert!((size_multiplier(&inputs).multiplier - 1.2).abs() < 1e-9);
        inputs.confluence_strength = 40.0;
        assert!((size_multiplier(&inputs).multiplier - 0.8).abs() < 1e-9);
    }

    #[test]
    fn multiplier_is_clamped() {
        let mut inputs = base();
        inputs.consecutive_losses = 4;
        inputs.daily_pnl = -200.0;
        inputs.confluence_strength = 10.0;
        // 0.25 * 0.5 * 0.8 would be 0.1; clamp holds at 0.25.
        assert!((size_multiplier(&inputs).multiplier - MULT_MIN).abs() < f64::EPSILON);
    }

    #[test]
    fn kelly_neutral_until_history() {
        let mut inputs = base();
        inputs.closed_trades = 5;
        inputs.avg_win = 10.0;
        inputs.avg_loss = 10.0;
        inputs.win_rate = 0.9;
        assert!((size_multiplier(&inputs).kelly_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn kelly_scales_down_a_losing_edge() {
        let mut inputs = base();
        inputs.closed_trades = 30;
        inputs.avg_win = 10.0;
        inputs.avg_loss = 10.0;
        inputs.win_rate = 0.4; // kelly = 0.4 - 0.6 = -0.2 -> clamped minimum
        let d = size_multiplier(&inputs);
        assert!((d.kelly_factor - KELLY_MIN).abs() < f64::EPSILON);
        assert!(d.multiplier <= 0.25 + 1e-9);
    }

    #[test]
    fn drawdown_reduce_then_pause() {
        let mut inputs = base();
        inputs.drawdown_pct = 7.5; // 75% of the 10% limit
        let d = size_multiplier(&inputs);
        assert!(d.should_reduce);
        assert!(!d.should_pause);
        assert!((d.multiplier - 0.5).abs() < f64::EPSILON);

        inputs.drawdown_pct = 11.0;
        let d = size_multiplier(&inputs);
        assert!(d.should_pause);
        assert!(d.multiplier.abs() < f64::EPSILON);
    }
}
