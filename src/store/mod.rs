// =============================================================================
// Persistence contracts — settings, trades, agent credentials
// =============================================================================
//
// The engine owns no storage backend; it talks to these three traits. The
// bundled implementation persists JSON artifacts under `data/` with atomic
// writes. A relational store satisfying the same contract can be swapped in.
// =============================================================================

mod json;

pub use json::{JsonAgentStore, JsonSettingsStore, JsonTradeStore};

use anyhow::Result;

use crate::settings::Settings;
use crate::types::{AgentCredential, TradeRecord};

/// Per-user settings, keyed by lowercase wallet address.
pub trait SettingsStore: Send + Sync {
    fn get(&self, wallet: &str) -> Option<Settings>;

    /// Overwrite the user's settings. Atomic per record; concurrent writers
    /// for the same wallet serialize last-writer-wins.
    fn put(&self, wallet: &str, settings: Settings) -> Result<()>;
}

/// Append-mostly trade log. Open trades must survive a restart so the
/// position monitor can reconcile them against the venue.
pub trait TradeStore: Send + Sync {
    /// Load trades with `timestamp >= since_ts`, newest first, up to `limit`.
    fn load(&self, since_ts: i64, limit: usize) -> Vec<TradeRecord>;

    /// Insert or replace by trade id.
    fn upsert(&self, trade: &TradeRecord) -> Result<()>;

    /// All trades still marked open (any user).
    fn open_trades(&self) -> Vec<TradeRecord>;
}

/// Agent signing credentials, keyed by lowercase master wallet.
pub trait AgentStore: Send + Sync {
    fn get(&self, wallet: &str) -> Option<AgentCredential>;
    fn put(&self, credential: AgentCredential) -> Result<()>;
}
