// =============================================================================
// Per-user Settings — hot-reloadable, serde-defaulted
// =============================================================================
//
// Every field carries a serde default so that settings files written by an
// older build still deserialise. `normalized()` clamps user input to the
// engine's hard caps (bag size, position percentage, concurrent positions).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::TradingProfile;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_bot_name() -> String {
    "meridian".to_string()
}

fn default_trading_bag() -> Vec<String> {
    vec!["BTC-PERP".to_string(), "ETH-PERP".to_string()]
}

fn default_max_leverage() -> u32 {
    5
}

fn default_position_size_pct() -> f64 {
    2.0
}

fn default_stop_loss_pct() -> f64 {
    2.0
}

fn default_take_profit_pct() -> f64 {
    4.0
}

fn default_max_simultaneous_positions() -> u32 {
    2
}

fn default_trailing_activation_pct() -> f64 {
    1.0
}

fn default_trailing_distance_pct() -> f64 {
    0.5
}

fn default_max_drawdown_pct() -> f64 {
    10.0
}

fn default_daily_loss_limit_pct() -> f64 {
    5.0
}

/// Hard cap on the number of symbols a user may watch.
pub const MAX_BAG_SIZE: usize = 5;
/// Hard cap on position size as a percentage of equity.
pub const MAX_POSITION_SIZE_PCT: f64 = 10.0;
/// Hard cap on simultaneous open positions.
pub const MAX_SIMULTANEOUS_POSITIONS: u32 = 5;

// =============================================================================
// Settings
// =============================================================================

/// Per-user engine settings. Created on first write, overwritten atomically,
/// loaded at engine start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Aggressiveness profile: drives cadence, confluence minimums, budgets.
    #[serde(default)]
    pub profile: TradingProfile,

    /// Scale leverage down with volatility instead of always using the max.
    #[serde(default = "default_true")]
    pub dynamic_leverage: bool,

    /// Requested leverage cap. The venue tier table may cap it lower.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,

    /// Override for the profile's minimum aligned-signal count. Zero means
    /// "use the profile default".
    #[serde(default)]
    pub min_confirmations: u32,

    /// Free-form context passed to the sentiment prompt.
    #[serde(default)]
    pub user_prompt: String,

    /// Symbols this user trades, `<COIN>-PERP` form, at most [`MAX_BAG_SIZE`].
    #[serde(default = "default_trading_bag")]
    pub trading_bag: Vec<String>,

    /// Position size as a percentage of account equity.
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: f64,

    /// Base stop-loss distance, percent of entry.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Base take-profit distance, percent of entry.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,

    #[serde(default = "default_max_simultaneous_positions")]
    pub max_simultaneous_positions: u32,

    #[serde(default = "default_true")]
    pub enable_trailing_stop: bool,

    /// Profit percentage at which the trailing stop activates.
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_stop_activation: f64,

    /// Trailing distance behind the best price, percent.
    #[serde(default = "default_trailing_distance_pct")]
    pub trailing_stop_distance: f64,

    /// Blend ATR/structure into SL/TP placement instead of fixed percentages.
    #[serde(default = "default_true")]
    pub use_smart_sltp: bool,

    #[serde(default)]
    pub enable_session_filter: bool,

    /// Drawdown percentage that forces the sizing governor to pause.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Daily loss (percent of equity) that trips the kill switch.
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,

    // --- Feature toggles -----------------------------------------------------

    /// Permit entries against the regime recommendation.
    #[serde(default)]
    pub allow_counter_trend: bool,

    /// Consult the sentiment gate before committing a trade.
    #[serde(default)]
    pub enable_sentiment: bool,

    /// Take 50% off at half the take-profit distance.
    #[serde(default = "default_true")]
    pub enable_partial_profit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            profile: TradingProfile::default(),
            dynamic_leverage: true,
            max_leverage: default_max_leverage(),
            min_confirmations: 0,
            user_prompt: String::new(),
            trading_bag: default_trading_bag(),
            position_size_pct: default_position_size_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            max_simultaneous_positions: default_max_simultaneous_positions(),
            enable_trailing_stop: true,
            trailing_stop_activation: default_trailing_activation_pct(),
            trailing_stop_distance: default_trailing_distance_pct(),
            use_smart_sltp: true,
            enable_session_filter: false,
            max_drawdown_pct: default_max_drawdown_pct(),
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            allow_counter_trend: false,
            enable_sentiment: false,
            enable_partial_profit: true,
        }
    }
}

impl Settings {
    /// Clamp user input to the engine's hard caps and drop malformed symbols.
    /// Returns the normalized copy; the original is untouched.
    pub fn normalized(&self) -> Self {
        let mut s = self.clone();

        s.trading_bag.retain(|sym| sym.ends_with("-PERP"));
        s.trading_bag.truncate(MAX_BAG_SIZE);

        s.position_size_pct = s.position_size_pct.clamp(0.1, MAX_POSITION_SIZE_PCT);
        s.max_simultaneous_positions = s
            .max_simultaneous_positions
            .clamp(1, MAX_SIMULTANEOUS_POSITIONS);

        s.stop_loss_pct = s.stop_loss_pct.max(0.1);
        s.take_profit_pct = s.take_profit_pct.max(0.2);
        s.trailing_stop_distance = s.trailing_stop_distance.max(0.05);

        s
    }

    /// Effective minimum confirmations: user override or profile default.
    pub fn effective_min_confirmations(&self) -> usize {
        if self.min_confirmations > 0 {
            self.min_confirmations as usize
        } else {
            self.profile.min_confirmations()
        }
    }
}
