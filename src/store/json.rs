// =============================================================================
// JSON file stores — atomic tmp + rename persistence under data/
// =============================================================================
//
// Three artifacts:
//   bot-settings.json  map walletLower -> Settings
//   trades.json        array of TradeRecord
//   agents.json        map walletLower -> AgentCredential
//
// Every mutation rewrites the whole artifact through a `.tmp` sibling and a
// rename, so a crash mid-write never corrupts the file. An internal mutex
// serializes writers (last-writer-wins per key).
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::settings::Settings;
use crate::types::{AgentCredential, TradeRecord, TradeStatus};

use super::{AgentStore, SettingsStore, TradeStore};

/// Write `value` as pretty JSON to `path` via tmp + rename.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(value).context("failed to serialise artifact")?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;

    Ok(())
}

/// Load an artifact, returning the default when the file is absent or
/// unreadable (a warning is logged for the latter).
fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "artifact unreadable, starting empty");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

// =============================================================================
// Settings store
// =============================================================================

pub struct JsonSettingsStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Settings>>,
}

impl JsonSettingsStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join("bot-settings.json");
        let entries: HashMap<String, Settings> = load_or_default(&path);
        info!(path = %path.display(), users = entries.len(), "settings store opened");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, wallet: &str) -> Option<Settings> {
        self.entries.lock().get(&wallet.to_lowercase()).cloned()
    }

    fn put(&self, wallet: &str, settings: Settings) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(wallet.to_lowercase(), settings);
        write_atomic(&self.path, &*entries)
    }
}

// =============================================================================
// Trade store
// =============================================================================

pub struct JsonTradeStore {
    path: PathBuf,
    trades: Mutex<Vec<TradeRecord>>,
}

impl JsonTradeStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join("trades.json");
        let trades: Vec<TradeRecord> = load_or_default(&path);
        info!(path = %path.display(), trades = trades.len(), "trade store opened");
        Self {
            path,
            trades: Mutex::new(trades),
        }
    }
}

impl TradeStore for JsonTradeStore {
    fn load(&self, since_ts: i64, limit: usize) -> Vec<TradeRecord> {
        let trades = self.trades.lock();
        let mut out: Vec<TradeRecord> = trades
            .iter()
            .filter(|t| t.timestamp >= since_ts)
            .cloned()
            .collect();
        out.sort_by_key(|t| std::cmp::Reverse(t.timestamp));
        out.truncate(limit);
        out
    }

    fn upsert(&self, trade: &TradeRecord) -> Result<()> {
        let mut trades = self.trades.lock();
        match trades.iter_mut().find(|t| t.id == trade.id) {
            Some(existing) => *existing = trade.clone(),
            None => trades.push(trade.clone()),
        }
        write_atomic(&self.path, &*trades)
    }

    fn open_trades(&self) -> Vec<TradeRecord> {
        self.trades
            .lock()
            .iter()
            .filter(|t| t.status == TradeStatus::Open)
            .cloned()
            .collect()
    }
}

// =============================================================================
// Agent store
// =============================================================================

pub struct JsonAgentStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, AgentCredential>>,
}

impl JsonAgentStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join("agents.json");
        let entries: HashMap<String, AgentCredential> = load_or_default(&path);
        info!(path = %path.display(), agents = entries.len(), "agent store opened");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }
}

impl AgentStore for JsonAgentStore {
    fn get(&self, wallet: &str) -> Option<AgentCredential> {
        self.entries.lock().get(&wallet.to_lowercase()).cloned()
    }

    fn put(&self, credential: AgentCredential) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(credential.user_wallet.to_lowercase(), credential);
        write_atomic(&self.path, &*entries)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("meridian-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn trade(id: &str, ts: i64, status: TradeStatus) -> TradeRecord {
        TradeRecord {
            id: id.into(),
            user_wallet: Some("0xABC".into()),
            symbol: "BTC-PERP".into(),
            side: Side::Buy,
            entry_price: dec!(50000),
            quantity: dec!(0.001),
            leverage: 5,
            stop_loss: dec!(49000),
            take_profit: dec!(52000),
            entry_fee: dec!(0.0175),
            exit_fee: Decimal::ZERO,
            exit_price: None,
            exit_time: None,
            status,
            gross_pnl: None,
            net_pnl: None,
            confidence: 60.0,
            reasoning: String::new(),
            timestamp: ts,
        }
    }

    use rust_decimal::Decimal;

    #[test]
    fn settings_store_round_trip() {
        let dir = temp_dir("settings");
        let store = JsonSettingsStore::open(&dir);
        assert!(store.get("0xAbC").is_none());

        let mut s = Settings::default();
        s.bot_name = "custom".into();
        store.put("0xAbC", s).unwrap();

        // Case-insensitive key, and survives a reopen.
        let reopened = JsonSettingsStore::open(&dir);
        assert_eq!(reopened.get("0xabc").unwrap().bot_name, "custom");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn trade_store_upsert_and_filter() {
        let dir = temp_dir("trades");
        let store = JsonTradeStore::open(&dir);

        store.upsert(&trade("a", 100, TradeStatus::Open)).unwrap();
        store.upsert(&trade("b", 200, TradeStatus::Closed)).unwrap();
        store.upsert(&trade("c", 300, TradeStatus::Open)).unwrap();

        let recent = store.load(150, 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "c"); // newest first

        assert_eq!(store.open_trades().len(), 2);

        // Upsert replaces by id.
        let mut updated = trade("a", 100, TradeStatus::Open);
        updated.close(dec!(50500), dec!(0.01), 400);
        store.upsert(&updated).unwrap();
        assert_eq!(store.open_trades().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_trades_survive_reopen() {
        let dir = temp_dir("recover");
        {
            let store = JsonTradeStore::open(&dir);
            store.upsert(&trade("x", 1, TradeStatus::Open)).unwrap();
        }
        let store = JsonTradeStore::open(&dir);
        assert_eq!(store.open_trades().len(), 1);
        assert_eq!(store.open_trades()[0].id, "x");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn agent_store_round_trip() {
        let dir = temp_dir("agents");
        let store = JsonAgentStore::open(&dir);
        store
            .put(AgentCredential {
                user_wallet: "0xMaster".into(),
                agent_address: "0xagent".into(),
                agent_key: "key".into(),
                agent_name: "meridian-agent".into(),
                approved_at: 1,
            })
            .unwrap();
        assert_eq!(store.get("0xmaster").unwrap().agent_name, "meridian-agent");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_artifact_starts_empty() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("trades.json"), "{not json").unwrap();
        let store = JsonTradeStore::open(&dir);
        assert!(store.load(0, 10).is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
