// =============================================================================
// Central Application State — Meridian Trading Engine
// =============================================================================
//
// The single owner of every cross-task map: stores, market caches, control
// plane, order tracking, trailing state, audit rings. Subsystems receive Arc
// references; nothing in the engine is process-global.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::control::{ControlPlane, ControlState, TradingStats};
use crate::market_data::{MarketCache, MarketFanout};
use crate::monitor::TrailingState;
use crate::orders::OrderManager;
use crate::sentiment::{GateUsage, SentimentClient, SentimentGate};
use crate::settings::Settings;
use crate::store::{AgentStore, SettingsStore, TradeStore};
use crate::types::{AgentCredential, EngineMode, TradeStatus};
use crate::venue::VenueBridge;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// One recorded analysis decision, allowed or denied.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub symbol: String,
    /// Gate or pipeline stage that settled the decision.
    pub stage: String,
    pub allowed: bool,
    pub reason: String,
    /// Confluence strength when one was computed.
    pub strength: Option<f64>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// A recorded error event for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

/// Central application state shared across all tasks via `Arc<AppState>`.
pub struct AppState {
    pub clock: SharedClock,

    // ── Persistence ─────────────────────────────────────────────────────
    pub settings_store: Arc<dyn SettingsStore>,
    pub trade_store: Arc<dyn TradeStore>,
    pub agent_store: Arc<dyn AgentStore>,

    // ── Market data ─────────────────────────────────────────────────────
    pub market: Arc<MarketCache>,
    pub fanout: MarketFanout,

    // ── Venue ───────────────────────────────────────────────────────────
    pub bridge: VenueBridge,
    pub orders: Arc<OrderManager>,

    // ── Safety ──────────────────────────────────────────────────────────
    pub control: Arc<ControlPlane>,

    // ── Sentiment ───────────────────────────────────────────────────────
    pub sentiment_gate: Arc<SentimentGate>,
    pub sentiment_client: Option<Arc<SentimentClient>>,

    // ── Network facts (validated on arm) ────────────────────────────────
    pub configured_network: EngineMode,
    pub live_trading_enabled: bool,

    // ── Per-trade trailing state, keyed by trade id ─────────────────────
    pub trailing: RwLock<HashMap<String, TrailingState>>,

    // ── Cached account equity for sizing and loss limits ────────────────
    pub equity: RwLock<Decimal>,

    // ── Audit rings ─────────────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionRecord>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    // ── Audit rings ─────────────────────────────────────────────────────

    pub fn push_decision(
        &self,
        symbol: &str,
        stage: &str,
        allowed: bool,
        reason: impl Into<String>,
        strength: Option<f64>,
    ) {
        let record = DecisionRecord {
            symbol: symbol.to_string(),
            stage: stage.to_string(),
            allowed,
            reason: reason.into(),
            strength,
            at: Utc::now().to_rfc3339(),
        };
        let mut decisions = self.recent_decisions.write();
        decisions.push(record);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
    }

    pub fn push_error(&self, message: impl Into<String>, code: Option<String>) {
        let record = ErrorRecord {
            message: message.into(),
            code,
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // ── Active-user helpers ─────────────────────────────────────────────

    /// Settings for the active user, normalized; engine defaults when the
    /// user has never saved any.
    pub fn active_settings(&self) -> Settings {
        let wallet = self.control.state().active_user_wallet;
        wallet
            .and_then(|w| self.settings_store.get(&w))
            .unwrap_or_default()
            .normalized()
    }

    /// Agent credentials for the active user, if registered.
    pub fn active_agent(&self) -> Option<AgentCredential> {
        let wallet = self.control.state().active_user_wallet?;
        self.agent_store.get(&wallet)
    }

    /// Symbols of all locally open trades.
    pub fn open_trade_symbols(&self) -> Vec<String> {
        self.trade_store
            .open_trades()
            .iter()
            .map(|t| t.symbol.clone())
            .collect()
    }

    // ── Status snapshot ─────────────────────────────────────────────────

    pub fn snapshot(&self) -> StatusSnapshot {
        let open_trades = self.trade_store.open_trades();
        StatusSnapshot {
            control: self.control.state(),
            stats: self.control.stats(),
            gate_usage: self.sentiment_gate.usage(),
            equity: *self.equity.read(),
            open_trades: open_trades.len(),
            open_symbols: open_trades.iter().map(|t| t.symbol.clone()).collect(),
            tracked_symbols: self.market.tracked_symbols(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            server_time: Utc::now().timestamp_millis(),
        }
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        DebugSnapshot {
            recent_decisions: self.recent_decisions.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
            trailing: self.trailing.read().clone(),
        }
    }

    /// Aggregate performance figures over the trade history.
    pub fn performance(&self, wallet: Option<&str>) -> PerformanceSnapshot {
        let trades = self.trade_store.load(0, 10_000);
        let wallet_lower = wallet.map(str::to_lowercase);
        let closed: Vec<_> = trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .filter(|t| match (&wallet_lower, &t.user_wallet) {
                (Some(w), Some(tw)) => tw.to_lowercase() == *w,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();

        let total = closed.len();
        let wins = closed
            .iter()
            .filter(|t| t.net_pnl.unwrap_or_default() > Decimal::ZERO)
            .count();
        let net_pnl: Decimal = closed.iter().filter_map(|t| t.net_pnl).sum();
        let fees: Decimal = closed.iter().map(|t| t.entry_fee + t.exit_fee).sum();
        let volume: Decimal = closed.iter().map(|t| t.entry_price * t.quantity).sum();

        PerformanceSnapshot {
            total_trades: total,
            wins,
            losses: total - wins,
            win_rate: if total > 0 {
                wins as f64 / total as f64
            } else {
                0.0
            },
            net_pnl,
            total_fees: fees,
            volume,
        }
    }
}

/// Engine status payload for `GET /trading/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub control: ControlState,
    pub stats: TradingStats,
    pub gate_usage: GateUsage,
    pub equity: Decimal,
    pub open_trades: usize,
    pub open_symbols: Vec<String>,
    pub tracked_symbols: Vec<String>,
    pub uptime_secs: u64,
    pub server_time: i64,
}

/// Diagnostic payload for `GET /trading/debug`.
#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub recent_decisions: Vec<DecisionRecord>,
    pub recent_errors: Vec<ErrorRecord>,
    pub trailing: HashMap<String, TrailingState>,
}

/// Aggregates for `GET /trading/performance`.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub net_pnl: Decimal,
    pub total_fees: Decimal,
    pub volume: Decimal,
}
