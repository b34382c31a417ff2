// =============================================================================
// Market Stream — single WebSocket connection feeding cache and fanout
// =============================================================================
//
// One connection per engine instance. On (re)connect the full subscription
// set is re-sent. Reconnect backoff starts at 1 s and doubles to a 30 s cap;
// after 5 consecutive failures the stream gives up and surfaces
// `Disconnected` to every subscriber.
//
// Decoder errors are dropped at debug level; nothing a malformed message can
// do kills the connection loop.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::types::{perp_symbol, Side};
use crate::venue::info::parse_decimal;

use super::{Funding, LiquidationSide, LiquidationTick, MarketCache, MarketEvent, MarketFanout, OrderBook, OrderBookLevel, TradeTick};

/// Reconnect backoff base.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Reconnect backoff cap.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Consecutive failures before the stream gives up.
const MAX_FAILURES: u32 = 5;

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    /// Coins (venue form, no `-PERP` suffix) in the subscription set.
    pub coins: Vec<String>,
    /// Consume the liquidation channel when the venue offers one.
    pub enable_liquidations: bool,
}

/// Run the market stream until the stop signal fires or reconnection is
/// exhausted. Intended to be spawned once at engine startup.
pub async fn run_market_stream(
    config: StreamConfig,
    cache: Arc<MarketCache>,
    fanout: MarketFanout,
    mut stop: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        if *stop.borrow() {
            info!("market stream stopping on signal");
            return;
        }

        match run_connection(&config, &cache, &fanout, &mut stop).await {
            ConnectionEnd::Stopped => {
                info!("market stream stopped");
                return;
            }
            ConnectionEnd::Lost(reason) => {
                failures += 1;
                if failures >= MAX_FAILURES {
                    error!(failures, reason = %reason, "market stream giving up");
                    fanout.publish(MarketEvent::Disconnected);
                    return;
                }
                let delay = backoff_delay(failures);
                warn!(
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "market stream lost, reconnecting"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => {}
                }
            }
            ConnectionEnd::Healthy => {
                // A connection that served traffic resets the failure streak.
                failures = 0;
            }
        }
    }
}

/// Backoff for the Nth consecutive failure: 1 s doubling, capped at 30 s.
fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(10);
    std::cmp::min(BACKOFF_BASE * 2u32.pow(exp), BACKOFF_CAP)
}

enum ConnectionEnd {
    /// Stop signal observed.
    Stopped,
    /// Connection failed before serving any message.
    Lost(String),
    /// Connection served messages before ending; caller resets the streak
    /// and reconnects immediately.
    Healthy,
}

async fn run_connection(
    config: &StreamConfig,
    cache: &Arc<MarketCache>,
    fanout: &MarketFanout,
    stop: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (ws, _resp) = match connect_async(&config.ws_url).await {
        Ok(pair) => pair,
        Err(e) => return ConnectionEnd::Lost(format!("connect: {e}")),
    };
    info!(url = %config.ws_url, coins = config.coins.len(), "market stream connected");

    let (mut write, mut read) = ws.split();

    // Re-send the full subscription set on every connect.
    for coin in &config.coins {
        for sub_type in ["l2Book", "trades", "activeAssetCtx"] {
            let msg = json!({
                "method": "subscribe",
                "subscription": { "type": sub_type, "coin": coin }
            });
            if let Err(e) = write.send(Message::Text(msg.to_string())).await {
                return ConnectionEnd::Lost(format!("subscribe: {e}"));
            }
        }
    }
    if config.enable_liquidations {
        let msg = json!({ "method": "subscribe", "subscription": { "type": "liquidations" } });
        if let Err(e) = write.send(Message::Text(msg.to_string())).await {
            return ConnectionEnd::Lost(format!("subscribe: {e}"));
        }
    }

    let mut served = false;
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    return ConnectionEnd::Stopped;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    served = true;
                    handle_message(&text, cache, fanout);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    return if served {
                        ConnectionEnd::Healthy
                    } else {
                        ConnectionEnd::Lost("closed before first message".into())
                    };
                }
                Some(Err(e)) => {
                    return if served {
                        ConnectionEnd::Healthy
                    } else {
                        ConnectionEnd::Lost(format!("read: {e}"))
                    };
                }
            }
        }
    }
}

/// Dispatch one wire message. Unknown shapes are dropped silently; decode
/// failures are logged at debug and dropped.
fn handle_message(text: &str, cache: &MarketCache, fanout: &MarketFanout) {
    let Ok(root) = serde_json::from_str::<Value>(text) else {
        debug!("undecodable stream message dropped");
        return;
    };

    match root["channel"].as_str() {
        Some("l2Book") => {
            if let Some(book) = parse_l2_book(&root["data"]) {
                cache.apply_book(book.clone());
                fanout.publish(MarketEvent::OrderBook(book));
            } else {
                debug!("l2Book message dropped");
            }
        }
        Some("trades") => {
            for tick in parse_trades(&root["data"]) {
                cache.apply_trade(tick.clone());
                fanout.publish(MarketEvent::Trade(tick));
            }
        }
        Some("activeAssetCtx") => {
            if let Some(funding) = parse_asset_ctx(&root["data"]) {
                cache.apply_funding(funding.clone());
                fanout.publish(MarketEvent::Funding(funding));
            } else {
                debug!("activeAssetCtx message dropped");
            }
        }
        Some("liquidations") => {
            for tick in parse_liquidations(&root["data"]) {
                cache.apply_liquidation(tick.clone());
                fanout.publish(MarketEvent::Liquidation(tick));
            }
        }
        // Subscription acks, heartbeats, anything unknown: silently dropped.
        _ => {}
    }
}

// -----------------------------------------------------------------------------
// Channel parsers
// -----------------------------------------------------------------------------

/// `{ "coin": "BTC", "time": ..., "levels": [[bids...], [asks...]] }`
fn parse_l2_book(data: &Value) -> Option<OrderBook> {
    let coin = data["coin"].as_str()?;
    let time = data["time"].as_i64().unwrap_or(0);
    let levels = data["levels"].as_array()?;
    if levels.len() < 2 {
        return None;
    }

    let parse_side = |side: &Value| -> Vec<OrderBookLevel> {
        side.as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|lvl| {
                        Some(OrderBookLevel {
                            price: parse_decimal(&lvl["px"])?,
                            size: parse_decimal(&lvl["sz"])?,
                            num_orders: lvl["n"].as_u64().map(|n| n as u32),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    Some(OrderBook::from_levels(
        &perp_symbol(coin),
        parse_side(&levels[0]),
        parse_side(&levels[1]),
        time,
    ))
}

/// `[{ "coin": "BTC", "side": "B", "px": "...", "sz": "...", "time": ... }]`
fn parse_trades(data: &Value) -> Vec<TradeTick> {
    data.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    let side = match t["side"].as_str()? {
                        "B" | "b" | "buy" => Side::Buy,
                        "A" | "a" | "sell" => Side::Sell,
                        _ => return None,
                    };
                    Some(TradeTick {
                        symbol: perp_symbol(t["coin"].as_str()?),
                        side,
                        price: parse_decimal(&t["px"])?,
                        size: parse_decimal(&t["sz"])?,
                        timestamp: t["time"].as_i64().unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `{ "coin": "BTC", "ctx": { "funding": "...", "premium": "...", "openInterest": "..." } }`
fn parse_asset_ctx(data: &Value) -> Option<Funding> {
    let coin = data["coin"].as_str()?;
    let ctx = &data["ctx"];
    Some(Funding {
        symbol: perp_symbol(coin),
        funding_rate: parse_decimal(&ctx["funding"])?,
        predicted_rate: parse_decimal(&ctx["premium"]).unwrap_or(Decimal::ZERO),
        open_interest: parse_decimal(&ctx["openInterest"]).unwrap_or(Decimal::ZERO),
        timestamp: data["time"].as_i64().unwrap_or(0),
    })
}

/// `[{ "coin": "BTC", "side": "long", "px": "...", "sz": "...", "time": ... }]`
fn parse_liquidations(data: &Value) -> Vec<LiquidationTick> {
    data.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|l| {
                    let side = match l["side"].as_str()? {
                        "long" => LiquidationSide::Long,
                        "short" => LiquidationSide::Short,
                        _ => return None,
                    };
                    Some(LiquidationTick {
                        symbol: perp_symbol(l["coin"].as_str()?),
                        side,
                        price: parse_decimal(&l["px"])?,
                        size: parse_decimal(&l["sz"])?,
                        timestamp: l["time"].as_i64().unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::EventKind;
    use rust_decimal_macros::dec;

    #[test]
    fn backoff_doubles_to_cap() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn l2_book_message_updates_cache_and_fanout() {
        let cache = MarketCache::new();
        let fanout = MarketFanout::new();
        let sub = fanout.subscribe(EventKind::OrderBook);

        let msg = json!({
            "channel": "l2Book",
            "data": {
                "coin": "BTC",
                "time": 1700000000000_i64,
                "levels": [
                    [ { "px": "49999", "sz": "1.5", "n": 3 } ],
                    [ { "px": "50001", "sz": "1.2" } ]
                ]
            }
        });
        handle_message(&msg.to_string(), &cache, &fanout);

        let book = cache.order_book("BTC-PERP").unwrap();
        assert_eq!(book.mid_price, dec!(50000));
        assert!(matches!(sub.try_recv(), Some(MarketEvent::OrderBook(_))));
    }

    #[test]
    fn trades_message_feeds_ring() {
        let cache = MarketCache::new();
        let fanout = MarketFanout::new();

        let msg = json!({
            "channel": "trades",
            "data": [
                { "coin": "ETH", "side": "B", "px": "3000.5", "sz": "0.2", "time": 5 },
                { "coin": "ETH", "side": "A", "px": "3000.4", "sz": "0.1", "time": 6 }
            ]
        });
        handle_message(&msg.to_string(), &cache, &fanout);

        let trades = cache.recent_trades("ETH-PERP");
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[1].price, dec!(3000.4));
    }

    #[test]
    fn asset_ctx_message_carries_premium_opaquely() {
        let cache = MarketCache::new();
        let fanout = MarketFanout::new();

        let msg = json!({
            "channel": "activeAssetCtx",
            "data": {
                "coin": "SOL",
                "time": 9,
                "ctx": { "funding": "0.0000125", "premium": "0.0003", "openInterest": "1234.5" }
            }
        });
        handle_message(&msg.to_string(), &cache, &fanout);

        let funding = cache.funding("SOL-PERP").unwrap();
        assert_eq!(funding.funding_rate, dec!(0.0000125));
        assert_eq!(funding.predicted_rate, dec!(0.0003));
    }

    #[test]
    fn unknown_and_malformed_messages_are_dropped() {
        let cache = MarketCache::new();
        let fanout = MarketFanout::new();
        let sub = fanout.subscribe(EventKind::Trade);

        handle_message("not json at all", &cache, &fanout);
        handle_message(r#"{ "channel": "somethingElse", "data": {} }"#, &cache, &fanout);
        handle_message(r#"{ "channel": "trades", "data": [ { "coin": "X" } ] }"#, &cache, &fanout);

        assert!(sub.try_recv().is_none());
        assert!(cache.recent_trades("X-PERP").is_empty());
    }

    #[test]
    fn liquidations_parse_both_sides() {
        let ticks = parse_liquidations(&json!([
            { "coin": "BTC", "side": "long", "px": "49000", "sz": "0.5", "time": 1 },
            { "coin": "BTC", "side": "short", "px": "51000", "sz": "0.2", "time": 2 },
            { "coin": "BTC", "side": "weird", "px": "1", "sz": "1", "time": 3 }
        ]));
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].side, LiquidationSide::Long);
        assert_eq!(ticks[1].side, LiquidationSide::Short);
    }
}
