// =============================================================================
// Venue Bridge — request/response facade over the info client and signer
// =============================================================================
//
// Everything the rest of the engine knows about the venue goes through this
// struct: balances, positions, books, orders, triggers, cancels. All prices
// leaving through the bridge are bucket-rounded and all sizes rounded up to
// the coin's size decimals.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::market_data::{OrderBook, OrderBookLevel};
use crate::types::{AgentCredential, Side};

use super::error::{VenueError, VenueResult};
use super::info::{parse_decimal, InfoClient};
use super::rounding::{round_price, round_size};
use super::signer::Signer;

/// Positions smaller than this are treated as flat.
const FLAT_EPSILON: Decimal = dec!(0.00001);

/// Account balance snapshot.
#[derive(Debug, Clone)]
pub struct Balance {
    pub account_value: Decimal,
    pub withdrawable: Decimal,
    pub margin_used: Decimal,
}

/// One open position as reported by the venue. `size` is signed: positive
/// long, negative short.
#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub coin: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub position_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
}

/// One resting order as reported by the venue.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub coin: String,
    pub oid: u64,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub is_trigger: bool,
}

/// Acknowledgement of a placed order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub oid: u64,
    pub avg_price: Option<Decimal>,
}

/// The bridge. Cheap to clone; safe to call from every analysis loop
/// concurrently (the signer serializes per agent key internally).
#[derive(Clone)]
pub struct VenueBridge {
    info: InfoClient,
    signer: Arc<dyn Signer>,
}

impl VenueBridge {
    pub fn new(info: InfoClient, signer: Arc<dyn Signer>) -> Self {
        Self { info, signer }
    }

    pub fn info(&self) -> &InfoClient {
        &self.info
    }

    /// Read operations retry transient failures with 1 s exponential backoff,
    /// up to 3 attempts inside a 30 s budget. Mutating operations never
    /// re-send: a timed-out order may still have reached the venue, and the
    /// next reconciliation cycle will pick it up.
    async fn run_read(
        &self,
        agent: Option<&AgentCredential>,
        argv: Vec<String>,
    ) -> VenueResult<Value> {
        let started = tokio::time::Instant::now();
        for attempt in 0..3u32 {
            if started.elapsed() >= std::time::Duration::from_secs(30) {
                return Err(VenueError::Timeout);
            }
            match self.signer.run(agent, &argv).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < 2 => {
                    let delay = std::time::Duration::from_secs(1) * 2u32.pow(attempt);
                    warn!(
                        subcommand = argv.first().map(String::as_str).unwrap_or(""),
                        attempt = attempt + 1,
                        error = %e,
                        "read operation failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(VenueError::Timeout)
    }

    // -------------------------------------------------------------------------
    // Account
    // -------------------------------------------------------------------------

    pub async fn get_balance(&self, agent: Option<&AgentCredential>) -> VenueResult<Balance> {
        let data = self.run_read(agent, args(&["balance"])).await?;
        Ok(Balance {
            account_value: parse_decimal(&data["accountValue"]).unwrap_or_default(),
            withdrawable: parse_decimal(&data["withdrawable"]).unwrap_or_default(),
            margin_used: parse_decimal(&data["marginUsed"]).unwrap_or_default(),
        })
    }

    /// Open positions, with dust (|size| < 1e-5) filtered out as flat.
    pub async fn get_positions(
        &self,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<Vec<VenuePosition>> {
        let data = self.run_read(agent, args(&["positions"])).await?;
        let arr = data
            .as_array()
            .ok_or_else(|| VenueError::InvalidResponse("positions is not an array".into()))?;

        let mut positions = Vec::with_capacity(arr.len());
        for entry in arr {
            let Some(coin) = entry["coin"].as_str() else {
                continue;
            };
            let size = parse_decimal(&entry["szi"])
                .or_else(|| parse_decimal(&entry["size"]))
                .unwrap_or_default();
            if size.abs() < FLAT_EPSILON {
                continue;
            }
            positions.push(VenuePosition {
                coin: coin.to_string(),
                size,
                entry_price: parse_decimal(&entry["entryPx"]).unwrap_or_default(),
                position_value: parse_decimal(&entry["positionValue"]).unwrap_or_default(),
                unrealized_pnl: parse_decimal(&entry["unrealizedPnl"]).unwrap_or_default(),
                leverage: entry["leverage"].as_u64().unwrap_or(1) as u32,
            });
        }
        Ok(positions)
    }

    pub async fn has_open_position(
        &self,
        coin: &str,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<bool> {
        let positions = self.get_positions(agent).await?;
        Ok(positions.iter().any(|p| p.coin == coin))
    }

    // -------------------------------------------------------------------------
    // Order book
    // -------------------------------------------------------------------------

    pub async fn get_order_book(
        &self,
        coin: &str,
        depth: usize,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<OrderBook> {
        let data = self
            .run_read(agent, args(&["orderbook", coin, &depth.to_string()]))
            .await?;

        let bids = parse_levels(&data["bids"])?;
        let asks = parse_levels(&data["asks"])?;
        let timestamp = data["time"].as_i64().unwrap_or(0);

        let book = OrderBook::from_levels(
            &crate::types::perp_symbol(coin),
            bids,
            asks,
            timestamp,
        );
        debug!(
            coin,
            mid = %book.mid_price,
            imbalance = book.imbalance,
            "order book fetched"
        );
        Ok(book)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Immediate market order.
    pub async fn execute_market_order(
        &self,
        coin: &str,
        side: Side,
        size: Decimal,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<OrderAck> {
        let sz = round_size(coin, size);
        let data = self
            .signer
            .run(
                agent,
                &args(&["order", coin, &side.to_string(), &sz.to_string(), "market"]),
            )
            .await?;
        let ack = parse_ack(&data)?;
        info!(coin, %side, size = %sz, oid = ack.oid, "market order placed");
        Ok(ack)
    }

    /// Limit order at `price` padded by `slippage_pct` so it crosses:
    /// buys pay up, sells reach down.
    pub async fn execute_limit_order(
        &self,
        coin: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        slippage_pct: Decimal,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<OrderAck> {
        let sp = slippage_pct / dec!(100);
        let raw = match side {
            Side::Buy => price * (Decimal::ONE + sp),
            Side::Sell => price * (Decimal::ONE - sp),
        };
        let px = round_price(raw);
        let sz = round_size(coin, size);

        let data = self
            .signer
            .run(
                agent,
                &args(&[
                    "order",
                    coin,
                    &side.to_string(),
                    &sz.to_string(),
                    "limit",
                    &px.to_string(),
                ]),
            )
            .await?;
        let ack = parse_ack(&data)?;
        info!(coin, %side, size = %sz, price = %px, oid = ack.oid, "limit order placed");
        Ok(ack)
    }

    /// Reduce-only stop-loss trigger. `close_side` is the side that closes
    /// the position.
    pub async fn place_stop_loss(
        &self,
        coin: &str,
        close_side: Side,
        size: Decimal,
        trigger_price: Decimal,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<OrderAck> {
        self.place_trigger(coin, close_side, size, "sl", trigger_price, agent)
            .await
    }

    /// Reduce-only take-profit trigger.
    pub async fn place_take_profit(
        &self,
        coin: &str,
        close_side: Side,
        size: Decimal,
        trigger_price: Decimal,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<OrderAck> {
        self.place_trigger(coin, close_side, size, "tp", trigger_price, agent)
            .await
    }

    async fn place_trigger(
        &self,
        coin: &str,
        close_side: Side,
        size: Decimal,
        kind: &str,
        trigger_price: Decimal,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<OrderAck> {
        let px = round_price(trigger_price);
        let sz = round_size(coin, size);
        let data = self
            .signer
            .run(
                agent,
                &args(&[
                    "trigger",
                    coin,
                    &close_side.to_string(),
                    &sz.to_string(),
                    kind,
                    &px.to_string(),
                ]),
            )
            .await?;
        let ack = parse_ack(&data)?;
        info!(coin, kind, side = %close_side, trigger = %px, oid = ack.oid, "trigger order placed");
        Ok(ack)
    }

    pub async fn cancel_order(
        &self,
        coin: &str,
        oid: u64,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<()> {
        self.signer
            .run(agent, &args(&["cancel", coin, &oid.to_string()]))
            .await?;
        debug!(coin, oid, "order cancelled");
        Ok(())
    }

    pub async fn cancel_all_orders(
        &self,
        coin: Option<&str>,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<()> {
        let argv = match coin {
            Some(c) => args(&["cancel_all", c]),
            None => args(&["cancel_all"]),
        };
        self.signer.run(agent, &argv).await?;
        debug!(coin = coin.unwrap_or("*"), "open orders cancelled");
        Ok(())
    }

    pub async fn get_open_orders(
        &self,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<Vec<OpenOrder>> {
        let data = self.run_read(agent, args(&["open_orders"])).await?;
        let arr = data
            .as_array()
            .ok_or_else(|| VenueError::InvalidResponse("open_orders is not an array".into()))?;

        Ok(arr
            .iter()
            .filter_map(|entry| {
                Some(OpenOrder {
                    coin: entry["coin"].as_str()?.to_string(),
                    oid: entry["oid"].as_u64()?,
                    side: if entry["side"].as_str()? == "buy" {
                        Side::Buy
                    } else {
                        Side::Sell
                    },
                    size: parse_decimal(&entry["sz"])?,
                    price: parse_decimal(&entry["limitPx"]).unwrap_or_default(),
                    is_trigger: entry["isTrigger"].as_bool().unwrap_or(false),
                })
            })
            .collect())
    }

    /// Close the current position in `coin` with an opposite market order.
    /// Returns `Ok(None)` when there is nothing to close.
    pub async fn close_position(
        &self,
        coin: &str,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<Option<OrderAck>> {
        let positions = self.get_positions(agent).await?;
        let Some(position) = positions.iter().find(|p| p.coin == coin) else {
            debug!(coin, "close requested with no open position");
            return Ok(None);
        };

        let close_side = if position.size > Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        };
        let ack = self
            .execute_market_order(coin, close_side, position.size.abs(), agent)
            .await?;
        info!(coin, size = %position.size, "position closed at market");
        Ok(Some(ack))
    }

    /// Best-effort flatten of everything; used by the kill switch.
    pub async fn close_all(&self, agent: Option<&AgentCredential>) -> VenueResult<()> {
        self.signer.run(agent, &args(&["close_all"])).await?;
        warn!("close_all issued");
        Ok(())
    }
}

impl std::fmt::Debug for VenueBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueBridge")
            .field("info", &self.info)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Parsing helpers
// -----------------------------------------------------------------------------

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_levels(value: &Value) -> VenueResult<Vec<OrderBookLevel>> {
    let arr = value
        .as_array()
        .ok_or_else(|| VenueError::InvalidResponse("book side is not an array".into()))?;

    Ok(arr
        .iter()
        .filter_map(|entry| {
            Some(OrderBookLevel {
                price: parse_decimal(&entry["px"])?,
                size: parse_decimal(&entry["sz"])?,
                num_orders: entry["n"].as_u64().map(|n| n as u32),
            })
        })
        .collect())
}

fn parse_ack(data: &Value) -> VenueResult<OrderAck> {
    let oid = data["oid"]
        .as_u64()
        .ok_or_else(|| VenueError::InvalidResponse("order ack missing oid".into()))?;
    Ok(OrderAck {
        oid,
        avg_price: parse_decimal(&data["avgPx"]),
    })
}
