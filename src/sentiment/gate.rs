// =============================================================================
// Sentiment Gate — the single authority on whether the LLM may be called
// =============================================================================
//
// Denials are checked in a fixed order; the daily limit is a hard block that
// `force` can never bypass. Every other check is bypassable by `force` but
// still logged. Accounting only reflects calls that actually happened:
// callers invoke `record_call` after the LLM request succeeds.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::types::TradingProfile;

/// Call-history ring length.
const HISTORY_LEN: usize = 100;

/// Per-profile gate configuration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateConfig {
    pub max_calls_per_day: u32,
    pub min_score: f64,
    pub min_cooldown_ms: i64,
    pub require_pattern: bool,
    /// Volatility band (percent) inside which a call is worthwhile.
    pub min_volatility: f64,
    pub max_volatility: f64,
}

/// Gate configuration for a profile.
pub fn gate_config(profile: TradingProfile) -> GateConfig {
    match profile {
        TradingProfile::Aggressive => GateConfig {
            max_calls_per_day: 20,
            min_score: 55.0,
            min_cooldown_ms: 5 * 60 * 1_000,
            require_pattern: false,
            min_volatility: 0.15,
            max_volatility: 5.0,
        },
        TradingProfile::Moderate => GateConfig {
            max_calls_per_day: 10,
            min_score: 65.0,
            min_cooldown_ms: 10 * 60 * 1_000,
            require_pattern: true,
            min_volatility: 0.2,
            max_volatility: 4.0,
        },
        TradingProfile::Conservative => GateConfig {
            max_calls_per_day: 5,
            min_score: 75.0,
            min_cooldown_ms: 30 * 60 * 1_000,
            require_pattern: true,
            min_volatility: 0.3,
            max_volatility: 3.0,
        },
    }
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct GateVerdict {
    pub allowed: bool,
    /// Stable denial code: daily_limit, cooldown, low_score, no_pattern,
    /// low_volatility, high_volatility.
    pub code: &'static str,
    /// Human-readable reason.
    pub reason: String,
    /// Milliseconds until the cooldown clears (cooldown denials only).
    pub remaining_ms: i64,
}

impl GateVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            code: "",
            reason: String::new(),
            remaining_ms: 0,
        }
    }

    fn deny(code: &'static str, reason: String, remaining_ms: i64) -> Self {
        Self {
            allowed: false,
            code,
            reason,
            remaining_ms,
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub symbol: String,
    pub score: f64,
    pub reason: String,
    pub call_type: String,
    pub timestamp: i64,
}

/// Serialisable usage snapshot for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct GateUsage {
    pub calls_today: u32,
    pub last_reset_date: String,
    pub last_call_ts: i64,
    pub consecutive_skips: u32,
    pub last_skip_reason: Option<String>,
    pub history: Vec<CallRecord>,
}

#[derive(Debug, Default)]
struct GateState {
    calls_today: u32,
    last_reset_date: String,
    last_call_ts: i64,
    history: VecDeque<CallRecord>,
    consecutive_skips: u32,
    last_skip_reason: Option<String>,
}

pub struct SentimentGate {
    clock: SharedClock,
    state: RwLock<GateState>,
}

impl SentimentGate {
    pub fn new(clock: SharedClock) -> Self {
        let today = clock.utc_date();
        Self {
            clock,
            state: RwLock::new(GateState {
                last_reset_date: today,
                ..Default::default()
            }),
        }
    }

    /// Evaluate whether an LLM call is permitted right now.
    ///
    /// `pattern` is the detected setup driving the call, if any. `force`
    /// bypasses every check except the daily limit.
    pub fn evaluate(
        &self,
        profile: TradingProfile,
        score: f64,
        pattern: Option<&str>,
        volatility: f64,
        force: bool,
    ) -> GateVerdict {
        self.maybe_reset_daily();
        let config = gate_config(profile);
        let now = self.clock.now_ms();

        let verdict = {
            let state = self.state.read();

            // 1. Daily limit: hard block, force never bypasses it.
            if state.calls_today >= config.max_calls_per_day {
                GateVerdict::deny(
                    "daily_limit",
                    format!(
                        "Daily call limit reached ({}/{})",
                        state.calls_today, config.max_calls_per_day
                    ),
                    0,
                )
            } else if force {
                debug!(score, volatility, "gate checks bypassed by force");
                GateVerdict::allow()
            } else if state.last_call_ts > 0
                && now - state.last_call_ts < config.min_cooldown_ms
            {
                // 2. Cooldown.
                let remaining = config.min_cooldown_ms - (now - state.last_call_ts);
                GateVerdict::deny(
                    "cooldown",
                    format!("Cooldown active ({}s remaining)", remaining / 1_000),
                    remaining,
                )
            } else if score < config.min_score {
                // 3. Opportunity score.
                GateVerdict::deny(
                    "low_score",
                    format!("Score too low ({score:.0} < {:.0})", config.min_score),
                    0,
                )
            } else if config.require_pattern && pattern.is_none() {
                // 4. Pattern requirement.
                GateVerdict::deny("no_pattern", "No qualifying pattern detected".into(), 0)
            } else if volatility < config.min_volatility {
                // 5. Volatility floor.
                GateVerdict::deny(
                    "low_volatility",
                    format!(
                        "Volatility {volatility:.2}% below floor {:.2}%",
                        config.min_volatility
                    ),
                    0,
                )
            } else if volatility > config.max_volatility {
                // 6. Volatility ceiling.
                GateVerdict::deny(
                    "high_volatility",
                    format!(
                        "Volatility {volatility:.2}% above ceiling {:.2}%",
                        config.max_volatility
                    ),
                    0,
                )
            } else {
                GateVerdict::allow()
            }
        };

        if !verdict.allowed {
            let mut state = self.state.write();
            state.consecutive_skips += 1;
            state.last_skip_reason = Some(verdict.code.to_string());
            info!(
                code = verdict.code,
                reason = %verdict.reason,
                skips = state.consecutive_skips,
                "sentiment call denied"
            );
        }
        verdict
    }

    /// Record a call that actually reached the LLM. Must be invoked only
    /// after the request succeeded.
    pub fn record_call(&self, symbol: &str, score: f64, reason: &str, call_type: &str) {
        self.maybe_reset_daily();
        let now = self.clock.now_ms();
        let mut state = self.state.write();
        state.calls_today += 1;
        state.last_call_ts = now;
        state.consecutive_skips = 0;
        state.last_skip_reason = None;
        if state.history.len() == HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(CallRecord {
            symbol: symbol.to_string(),
            score,
            reason: reason.to_string(),
            call_type: call_type.to_string(),
            timestamp: now,
        });
        info!(symbol, score, calls_today = state.calls_today, "sentiment call recorded");
    }

    pub fn usage(&self) -> GateUsage {
        self.maybe_reset_daily();
        let state = self.state.read();
        GateUsage {
            calls_today: state.calls_today,
            last_reset_date: state.last_reset_date.clone(),
            last_call_ts: state.last_call_ts,
            consecutive_skips: state.consecutive_skips,
            last_skip_reason: state.last_skip_reason.clone(),
            history: state.history.iter().cloned().collect(),
        }
    }

    fn maybe_reset_daily(&self) {
        let today = self.clock.utc_date();
        {
            let state = self.state.read();
            if state.last_reset_date == today {
                return;
            }
        }
        let mut state = self.state.write();
        if state.last_reset_date != today {
            info!(old = %state.last_reset_date, new = %today, "sentiment gate daily reset");
            state.calls_today = 0;
            state.last_reset_date = today;
        }
    }
}
