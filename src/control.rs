// =============================================================================
// Control Plane — arm/disarm, kill switch, daily stats, cooldowns
// =============================================================================
//
// State machine:
//
//   Unarmed -> Armed(mode) -> Running -> Paused(until) -> Running -> ...
//
// `KillSwitchActive` is absorbing: every trading gate fails until an explicit
// reset with the confirmation phrase. A daily-loss breach trips the kill
// switch automatically.
//
// Daily statistics reset when the UTC calendar date changes.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::types::{EngineMode, TradingProfile};

/// Confirmation phrase required to arm live trading.
pub const ARM_PHRASE: &str = "I UNDERSTAND THE RISKS";
/// Confirmation phrase required to reset the kill switch.
pub const RESET_PHRASE: &str = "RESET KILL SWITCH";
/// Cooldown between trades on the same symbol.
pub const ASSET_COOLDOWN_MS: i64 = 5 * 60 * 1_000;

/// Per-profile trading limits.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeLimits {
    pub max_trades_per_day: u32,
    pub pause_after_losses: u32,
    pub pause_duration_ms: i64,
}

/// Limits for a profile.
pub fn limits_for(profile: TradingProfile) -> ModeLimits {
    match profile {
        TradingProfile::Aggressive => ModeLimits {
            max_trades_per_day: 15,
            pause_after_losses: 4,
            pause_duration_ms: 30 * 60 * 1_000,
        },
        TradingProfile::Moderate => ModeLimits {
            max_trades_per_day: 8,
            pause_after_losses: 3,
            pause_duration_ms: 60 * 60 * 1_000,
        },
        TradingProfile::Conservative => ModeLimits {
            max_trades_per_day: 4,
            pause_after_losses: 2,
            pause_duration_ms: 2 * 60 * 60 * 1_000,
        },
    }
}

/// Control-plane rejection, returned to the HTTP caller with a stable code.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("confirmation phrase mismatch")]
    BadPhrase,
    #[error("live trading is not enabled in this environment")]
    LiveTradingDisabled,
    #[error("configured venue network does not match requested mode")]
    NetworkMismatch,
    #[error("no agent credentials registered for this wallet")]
    MissingCredentials,
    #[error("kill switch is active: {0}")]
    KillSwitchActive(String),
}

impl ControlError {
    /// Machine-readable error code for the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadPhrase => "bad_phrase",
            Self::LiveTradingDisabled => "live_trading_disabled",
            Self::NetworkMismatch => "network_mismatch",
            Self::MissingCredentials => "missing_credentials",
            Self::KillSwitchActive(_) => "kill_switch_active",
        }
    }
}

/// Environment facts the arm transition validates against.
#[derive(Debug, Clone)]
pub struct ArmContext {
    pub live_trading_enabled: bool,
    /// Network the venue endpoints are configured for.
    pub configured_network: EngineMode,
    pub has_agent_credentials: bool,
}

/// Serialisable control state snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ControlState {
    pub armed: bool,
    pub armed_at: Option<i64>,
    pub armed_by: Option<String>,
    pub mode: EngineMode,
    pub running: bool,
    pub kill_switch_active: bool,
    pub kill_reason: Option<String>,
    pub active_user_wallet: Option<String>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            armed: false,
            armed_at: None,
            armed_by: None,
            mode: EngineMode::Paper,
            running: false,
            kill_switch_active: false,
            kill_reason: None,
            active_user_wallet: None,
        }
    }
}

/// Daily trading statistics; reset at the UTC day boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradingStats {
    pub trades_today: u32,
    pub wins_today: u32,
    pub losses_today: u32,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub pause_until_ts: i64,
    pub daily_pnl: Decimal,
    pub last_trade_ts: i64,
    /// Worst equity drawdown seen today, percent.
    pub max_daily_drawdown: f64,
    pub current_date: String,
}

/// What a recorded close triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseEffect {
    None,
    /// Consecutive-loss pause scheduled until the contained timestamp.
    Paused(i64),
    /// Daily-loss limit breached; the kill switch has been tripped.
    Killed(String),
}

pub struct ControlPlane {
    clock: SharedClock,
    state: RwLock<ControlState>,
    stats: RwLock<TradingStats>,
    /// Last trade timestamp per symbol, for the per-asset cooldown.
    cooldowns: RwLock<HashMap<String, i64>>,
}

impl ControlPlane {
    pub fn new(clock: SharedClock) -> Self {
        let today = clock.utc_date();
        let stats = TradingStats {
            current_date: today,
            ..Default::default()
        };
        Self {
            clock,
            state: RwLock::new(ControlState::default()),
            stats: RwLock::new(stats),
            cooldowns: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Arm for live trading. Every precondition must hold.
    pub fn arm(
        &self,
        phrase: &str,
        mode: EngineMode,
        armed_by: &str,
        ctx: &ArmContext,
    ) -> Result<(), ControlError> {
        {
            let state = self.state.read();
            if state.kill_switch_active {
                return Err(ControlError::KillSwitchActive(
                    state.kill_reason.clone().unwrap_or_default(),
                ));
            }
        }
        if phrase != ARM_PHRASE {
            return Err(ControlError::BadPhrase);
        }
        if !ctx.live_trading_enabled {
            return Err(ControlError::LiveTradingDisabled);
        }
        if ctx.configured_network != mode {
            return Err(ControlError::NetworkMismatch);
        }
        if !ctx.has_agent_credentials {
            return Err(ControlError::MissingCredentials);
        }

        let mut state = self.state.write();
        state.armed = true;
        state.armed_at = Some(self.clock.now_ms());
        state.armed_by = Some(armed_by.to_string());
        state.mode = mode;
        warn!(mode = %mode, armed_by, "LIVE TRADING ARMED");
        Ok(())
    }

    /// Disarm unconditionally and fall back to paper mode.
    pub fn disarm(&self) {
        let mut state = self.state.write();
        state.armed = false;
        state.armed_at = None;
        state.armed_by = None;
        state.mode = EngineMode::Paper;
        info!("disarmed, back to paper mode");
    }

    /// Trip the kill switch. Forces a disarm; the caller is responsible for
    /// the best-effort close-all / cancel-all sweep.
    pub fn kill(&self, reason: &str) {
        let mut state = self.state.write();
        state.kill_switch_active = true;
        state.kill_reason = Some(reason.to_string());
        state.armed = false;
        state.armed_at = None;
        state.armed_by = None;
        state.mode = EngineMode::Paper;
        warn!(reason, "KILL SWITCH ACTIVATED");
    }

    /// Clear the kill switch with the exact confirmation phrase.
    pub fn reset_kill(&self, phrase: &str) -> Result<(), ControlError> {
        if phrase != RESET_PHRASE {
            return Err(ControlError::BadPhrase);
        }
        let mut state = self.state.write();
        state.kill_switch_active = false;
        state.kill_reason = None;
        info!("kill switch reset");
        Ok(())
    }

    /// Mark the engine running for `wallet`.
    pub fn start(&self, wallet: &str) {
        let mut state = self.state.write();
        state.running = true;
        state.active_user_wallet = Some(wallet.to_lowercase());
        info!(wallet, "engine started");
    }

    pub fn stop(&self) {
        let mut state = self.state.write();
        state.running = false;
        info!("engine stopped");
    }

    // -------------------------------------------------------------------------
    // Gates
    // -------------------------------------------------------------------------

    /// Pre-trade gate. `Ok(())` when a new entry may be attempted; the error
    /// string is the skip reason.
    pub fn can_open_trade(
        &self,
        profile: TradingProfile,
        symbol: &str,
    ) -> Result<(), String> {
        self.maybe_reset_daily();
        let now = self.clock.now_ms();

        let state = self.state.read();
        if state.kill_switch_active {
            return Err(format!(
                "kill switch active: {}",
                state.kill_reason.clone().unwrap_or_default()
            ));
        }
        if !state.running {
            return Err("engine not running".into());
        }
        // Paper mode trades without arming; any live mode must be armed.
        if state.mode != EngineMode::Paper && !state.armed {
            return Err("not armed".into());
        }
        drop(state);

        let stats = self.stats.read();
        if stats.pause_until_ts > now {
            return Err(format!(
                "paused for {}s after consecutive losses",
                (stats.pause_until_ts - now) / 1_000
            ));
        }
        let limits = limits_for(profile);
        if stats.trades_today >= limits.max_trades_per_day {
            return Err(format!(
                "daily trade cap reached ({})",
                limits.max_trades_per_day
            ));
        }
        drop(stats);

        if let Some(&last) = self.cooldowns.read().get(symbol) {
            let remaining = ASSET_COOLDOWN_MS - (now - last);
            if remaining > 0 {
                return Err(format!(
                    "cooldown on {symbol}: {}s remaining",
                    remaining / 1_000
                ));
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record a new entry for daily counters and the per-asset cooldown.
    pub fn record_trade_open(&self, symbol: &str) {
        self.maybe_reset_daily();
        let now = self.clock.now_ms();
        {
            let mut stats = self.stats.write();
            stats.trades_today += 1;
            stats.last_trade_ts = now;
        }
        self.cooldowns.write().insert(symbol.to_string(), now);
    }

    /// Record a closed trade. Updates streaks, schedules the
    /// consecutive-loss pause, and trips the kill switch on a daily-loss
    /// breach measured against `equity`.
    pub fn record_trade_close(
        &self,
        net_pnl: Decimal,
        equity: Decimal,
        profile: TradingProfile,
        daily_loss_limit_pct: f64,
    ) -> CloseEffect {
        self.maybe_reset_daily();
        let now = self.clock.now_ms();
        let limits = limits_for(profile);

        let mut effect = CloseEffect::None;
        {
            let mut stats = self.stats.write();
            stats.daily_pnl += net_pnl;

            if net_pnl >= Decimal::ZERO {
                stats.wins_today += 1;
                stats.consecutive_wins += 1;
                stats.consecutive_losses = 0;
            } else {
                stats.losses_today += 1;
                stats.consecutive_losses += 1;
                stats.consecutive_wins = 0;

                if stats.consecutive_losses >= limits.pause_after_losses {
                    stats.pause_until_ts = now + limits.pause_duration_ms;
                    effect = CloseEffect::Paused(stats.pause_until_ts);
                }
            }

            // Drawdown bookkeeping against the day's equity base.
            if equity > Decimal::ZERO && stats.daily_pnl < Decimal::ZERO {
                let dd = (-stats.daily_pnl / equity * Decimal::ONE_HUNDRED)
                    .to_f64()
                    .unwrap_or(0.0);
                if dd > stats.max_daily_drawdown {
                    stats.max_daily_drawdown = dd;
                }
            }
        }

        // Daily-loss breach outranks the pause.
        let loss_pct = self.daily_loss_pct(equity);
        if loss_pct >= daily_loss_limit_pct && daily_loss_limit_pct > 0.0 {
            let reason = format!(
                "Daily loss limit breached: {loss_pct:.2}% lost (limit {daily_loss_limit_pct:.2}%)"
            );
            self.kill(&reason);
            effect = CloseEffect::Killed(reason);
        }

        if let CloseEffect::Paused(until) = effect {
            warn!(until, "consecutive-loss pause scheduled");
        }
        effect
    }

    /// Today's loss as a percentage of `equity` (0 when in profit).
    pub fn daily_loss_pct(&self, equity: Decimal) -> f64 {
        if equity <= Decimal::ZERO {
            return 0.0;
        }
        let pnl = self.stats.read().daily_pnl;
        if pnl >= Decimal::ZERO {
            return 0.0;
        }
        (-pnl / equity * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn state(&self) -> ControlState {
        self.state.read().clone()
    }

    pub fn stats(&self) -> TradingStats {
        self.maybe_reset_daily();
        self.stats.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn is_killed(&self) -> bool {
        self.state.read().kill_switch_active
    }

    // -------------------------------------------------------------------------
    // Daily reset
    // -------------------------------------------------------------------------

    /// Reset daily counters when the UTC date has rolled over. Double-checked
    /// under the write lock so concurrent callers reset exactly once.
    fn maybe_reset_daily(&self) {
        let today = self.clock.utc_date();
        {
            let stats = self.stats.read();
            if stats.current_date == today {
                return;
            }
        }
        let mut stats = self.stats.write();
        if stats.current_date != today {
            info!(
                old = %stats.current_date,
                new = %today,
                "UTC date rolled, resetting daily trading stats"
            );
            *stats = TradingStats {
                current_date: today,
                ..Default::default()
            };
        }
    }
}
