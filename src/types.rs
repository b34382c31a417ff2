// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side as sent to the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened with this side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1 for buy/long, -1 for sell/short. Used in PnL maths.
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Which environment a live session is armed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Paper,
    Testnet,
    Mainnet,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Testnet => write!(f, "testnet"),
            Self::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Aggressiveness profile selected per user. Drives loop cadence, confluence
/// minimums, and sentiment-gate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingProfile {
    Aggressive,
    Moderate,
    Conservative,
}

impl Default for TradingProfile {
    fn default() -> Self {
        Self::Moderate
    }
}

impl TradingProfile {
    /// Analysis loop cadence in seconds.
    pub fn loop_interval_secs(self) -> u64 {
        match self {
            Self::Aggressive => 8,
            Self::Moderate => 30,
            Self::Conservative => 120,
        }
    }

    /// Minimum aligned signal count for a tick to qualify.
    pub fn min_confirmations(self) -> usize {
        match self {
            Self::Aggressive => 3,
            Self::Moderate => 4,
            Self::Conservative => 5,
        }
    }

    /// Minimum weighted confluence strength for a tick to qualify.
    pub fn min_strength(self) -> f64 {
        match self {
            Self::Aggressive => 50.0,
            Self::Moderate => 60.0,
            Self::Conservative => 70.0,
        }
    }
}

impl std::fmt::Display for TradingProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aggressive => write!(f, "aggressive"),
            Self::Moderate => write!(f, "moderate"),
            Self::Conservative => write!(f, "conservative"),
        }
    }
}

/// Trade record lifecycle state. Transitions: Open -> Closed, Open -> Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Authoritative trade record. Accounting fields (prices, fees, PnL) are
/// decimal so that totals never drift from float rounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    #[serde(default)]
    pub user_wallet: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_fee: Decimal,
    #[serde(default)]
    pub exit_fee: Decimal,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub exit_time: Option<i64>,
    pub status: TradeStatus,
    #[serde(default)]
    pub gross_pnl: Option<Decimal>,
    #[serde(default)]
    pub net_pnl: Option<Decimal>,
    /// Confluence strength at entry, 0-100.
    pub confidence: f64,
    pub reasoning: String,
    /// Entry timestamp, epoch milliseconds.
    pub timestamp: i64,
}

impl TradeRecord {
    /// Mark the trade closed at `exit_price`, settling fees and PnL.
    ///
    /// Once closed: `net_pnl = gross_pnl - entry_fee - exit_fee`.
    pub fn close(&mut self, exit_price: Decimal, exit_fee: Decimal, exit_time: i64) {
        let gross = self.side.sign() * (exit_price - self.entry_price) * self.quantity;
        self.exit_price = Some(exit_price);
        self.exit_fee = exit_fee;
        self.exit_time = Some(exit_time);
        self.gross_pnl = Some(gross);
        self.net_pnl = Some(gross - self.entry_fee - exit_fee);
        self.status = TradeStatus::Closed;
    }

    /// Unrealised PnL at `mark` for an open trade, before fees.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        self.side.sign() * (mark - self.entry_price) * self.quantity
    }
}

/// Subordinate signing key approved by a user's master wallet. The engine
/// only ever signs with the agent key, never the master key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCredential {
    pub user_wallet: String,
    pub agent_address: String,
    pub agent_key: String,
    pub agent_name: String,
    /// Epoch ms when the master wallet approved this agent.
    pub approved_at: i64,
}

// ---------------------------------------------------------------------------
// Symbol helpers
// ---------------------------------------------------------------------------

/// Extract the coin from a `<COIN>-PERP` symbol. The coin form is what the
/// venue bridge speaks; the `-PERP` form is used everywhere else.
pub fn coin_of(symbol: &str) -> &str {
    symbol.strip_suffix("-PERP").unwrap_or(symbol)
}

/// Build the `<COIN>-PERP` symbol for a coin.
pub fn perp_symbol(coin: &str) -> String {
    format!("{}-PERP", coin.to_uppercase())
}
