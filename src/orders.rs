// =============================================================================
// Order Manager — de-duplicated SL/TP placement with rate-limited updates
// =============================================================================
//
// Guarantees at most one active stop-loss and one active take-profit order
// per symbol. Placement always cancels whatever the venue still holds for
// the coin first, so a retried tick can never stack protective orders.
// Trailing updates are rate-limited to one per 30 s unless forced.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::strategy::sltp::profitability_check;
use crate::types::{AgentCredential, Side};
use crate::venue::rounding::{round_price, TAKER_FEE_RATE};
use crate::venue::{VenueBridge, VenueError, VenueResult};

/// Minimum interval between stop-loss updates for one coin.
const SL_UPDATE_INTERVAL_MS: i64 = 30_000;
/// Settle delay between cancel-all and the SL leg.
const POST_CANCEL_DELAY: Duration = Duration::from_millis(500);
/// Settle delay between the SL and TP legs.
const BETWEEN_LEGS_DELAY: Duration = Duration::from_millis(300);

/// Tracked protective orders for one symbol.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackedOrders {
    pub sl_order_id: Option<u64>,
    pub tp_order_id: Option<u64>,
    /// Epoch ms of the last SL placement or update.
    pub last_updated: i64,
}

/// Result of a paired SL/TP placement.
#[derive(Debug, Clone)]
pub struct SlTpPlacement {
    pub sl_order_id: Option<u64>,
    pub tp_order_id: Option<u64>,
    /// TP after fee-aware adjustment (equals the request when it was
    /// already profitable).
    pub take_profit: Decimal,
}

pub struct OrderManager {
    bridge: VenueBridge,
    clock: SharedClock,
    tracked: RwLock<HashMap<String, TrackedOrders>>,
}

impl OrderManager {
    pub fn new(bridge: VenueBridge, clock: SharedClock) -> Self {
        Self {
            bridge,
            clock,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Tracked orders for `coin`, if any.
    pub fn tracked(&self, coin: &str) -> Option<TrackedOrders> {
        self.tracked.read().get(coin).cloned()
    }

    // -------------------------------------------------------------------------
    // Paired SL/TP placement
    // -------------------------------------------------------------------------

    /// Place the protective pair for an open position.
    ///
    /// `position_side` is the side the position was opened with; both legs
    /// are reduce-only orders on the opposite side. Succeeds when at least
    /// one leg lands; a total failure surfaces the SL error.
    pub async fn place_sl_tp_orders(
        &self,
        coin: &str,
        position_side: Side,
        quantity: Decimal,
        entry: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        agent: Option<&AgentCredential>,
    ) -> VenueResult<SlTpPlacement> {
        let close_side = position_side.opposite();

        // Fee-aware TP validation: push an unprofitable target out to the
        // smallest profitable level.
        let take_profit = match profitability_check(entry, take_profit, quantity, position_side) {
            Ok(_) => take_profit,
            Err(reason) => {
                let adjusted = min_profitable_tp(entry, position_side);
                warn!(
                    coin,
                    requested = %take_profit,
                    adjusted = %adjusted,
                    reason,
                    "take-profit adjusted to minimum profitable level"
                );
                adjusted
            }
        };

        // De-duplication: wipe whatever the venue still holds for this coin.
        if let Err(e) = self.bridge.cancel_all_orders(Some(coin), agent).await {
            // The coin may simply have no resting orders.
            debug!(coin, error = %e, "pre-placement cancel-all failed");
        }
        tokio::time::sleep(POST_CANCEL_DELAY).await;

        let sl_result = self
            .bridge
            .place_stop_loss(coin, close_side, quantity, stop_loss, agent)
            .await;
        tokio::time::sleep(BETWEEN_LEGS_DELAY).await;

        let tp_result = self
            .bridge
            .place_take_profit(coin, close_side, quantity, take_profit, agent)
            .await;

        let sl_order_id = match &sl_result {
            Ok(ack) => Some(ack.oid),
            Err(e) => {
                warn!(coin, error = %e, "stop-loss leg failed");
                None
            }
        };
        let tp_order_id = match &tp_result {
            Ok(ack) => Some(ack.oid),
            Err(e) => {
                warn!(coin, error = %e, "take-profit leg failed");
                None
            }
        };

        if sl_order_id.is_none() && tp_order_id.is_none() {
            return Err(sl_result.err().unwrap_or(VenueError::InvalidResponse(
                "both protective legs failed".into(),
            )));
        }

        let now = self.clock.now_ms();
        self.tracked.write().insert(
            coin.to_string(),
            TrackedOrders {
                sl_order_id,
                tp_order_id,
                last_updated: now,
            },
        );

        info!(
            coin,
            sl_oid = sl_order_id.unwrap_or(0),
            tp_oid = tp_order_id.unwrap_or(0),
            sl = %stop_loss,
            tp = %take_profit,
            "protective orders placed"
        );

        Ok(SlTpPlacement {
            sl_order_id,
            tp_order_id,
            take_profit,
        })
    }

    // -------------------------------------------------------------------------
    // Trailing stop-loss update
    // -------------------------------------------------------------------------

    /// Replace the tracked stop-loss with `new_stop`. Rejected inside the
    /// 30 s window unless `force`. A cancel failure of the old stop is
    /// ignored: either the next update lands or the old stop executes.
    pub async fn update_stop_loss(
        &self,
        coin: &str,
        position_side: Side,
        quantity: Decimal,
        new_stop: Decimal,
        agent: Option<&AgentCredential>,
        force: bool,
    ) -> VenueResult<u64> {
        let now = self.clock.now_ms();
        let previous = self.tracked.read().get(coin).cloned().unwrap_or_default();

        if !force && now - previous.last_updated < SL_UPDATE_INTERVAL_MS {
            return Err(VenueError::RateLimited);
        }

        if let Some(old_oid) = previous.sl_order_id {
            if let Err(e) = self.bridge.cancel_order(coin, old_oid, agent).await {
                // The old stop may already have executed.
                debug!(coin, old_oid, error = %e, "stale stop-loss cancel failed");
            }
        }

        let ack = self
            .bridge
            .place_stop_loss(coin, position_side.opposite(), quantity, new_stop, agent)
            .await?;

        let mut tracked = self.tracked.write();
        let entry = tracked.entry(coin.to_string()).or_default();
        entry.sl_order_id = Some(ack.oid);
        entry.last_updated = now;

        info!(coin, oid = ack.oid, stop = %new_stop, "stop-loss updated");
        Ok(ack.oid)
    }

    /// Forget tracked orders for `coin`. Called when the position monitor
    /// observes the venue-side position closed.
    pub fn clear_tracked(&self, coin: &str) {
        if self.tracked.write().remove(coin).is_some() {
            debug!(coin, "tracked orders cleared");
        }
    }
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager")
            .field("tracked", &self.tracked.read().len())
            .finish()
    }
}

/// Smallest TP that clears the 1.5x-fees profitability gate, bucket-rounded
/// away from entry. Solves gross = 2.5 * fees exactly, then pads 1%.
pub fn min_profitable_tp(entry: Decimal, position_side: Side) -> Decimal {
    let k = dec!(2.5) * TAKER_FEE_RATE;
    let raw = match position_side {
        Side::Buy => entry * (Decimal::ONE + k) / (Decimal::ONE - k),
        Side::Sell => entry * (Decimal::ONE - k) / (Decimal::ONE + k),
    };
    let padded = match position_side {
        Side::Buy => raw * dec!(1.01),
        Side::Sell => raw * dec!(0.99),
    };
    round_price(padded)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::venue::signer::mock::MockSigner;
    use crate::venue::InfoClient;
    use serde_json::json;

    fn manager(signer: Arc<MockSigner>, clock: Arc<ManualClock>) -> OrderManager {
        let bridge = VenueBridge::new(InfoClient::new("http://localhost:0/info"), signer);
        OrderManager::new(bridge, clock)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn placement_cancels_then_places_both_legs() {
        let signer = Arc::new(MockSigner::new());
        signer.script("trigger", Ok(json!({ "oid": 100 })));
        signer.script("trigger", Ok(json!({ "oid": 101 })));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mgr = manager(signer.clone(), clock);

        let placement = mgr
            .place_sl_tp_orders(
                "BTC",
                Side::Buy,
                dec!(0.001),
                dec!(50000),
                dec!(49000),
                dec!(52000),
                None,
            )
            .await
            .unwrap();

        assert_eq!(placement.sl_order_id, Some(100));
        assert_eq!(placement.tp_order_id, Some(101));
        assert_eq!(placement.take_profit, dec!(52000));

        // cancel_all first, then SL, then TP.
        let calls = signer.calls.lock().clone();
        assert_eq!(calls[0][0], "cancel_all");
        assert_eq!(calls[1][..5], ["trigger", "BTC", "sell", "0.001", "sl"]);
        assert_eq!(calls[2][..5], ["trigger", "BTC", "sell", "0.001", "tp"]);

        let tracked = mgr.tracked("BTC").unwrap();
        assert_eq!(tracked.sl_order_id, Some(100));
        assert_eq!(tracked.tp_order_id, Some(101));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unprofitable_tp_is_adjusted_out() {
        let signer = Arc::new(MockSigner::new());
        signer.script("trigger", Ok(json!({ "oid": 1 })));
        signer.script("trigger", Ok(json!({ "oid": 2 })));
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(signer.clone(), clock);

        // TP only 5 bps above entry: inside the fee floor.
        let placement = mgr
            .place_sl_tp_orders(
                "BTC",
                Side::Buy,
                dec!(0.01),
                dec!(50000),
                dec!(49000),
                dec!(50025),
                None,
            )
            .await
            .unwrap();

        assert!(placement.take_profit > dec!(50025));
        // The adjusted target itself clears the gate.
        assert!(profitability_check(dec!(50000), placement.take_profit, dec!(0.01), Side::Buy)
            .is_ok());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn one_leg_surviving_is_success() {
        let signer = Arc::new(MockSigner::new());
        signer.script(
            "trigger",
            Err(VenueError::Venue {
                code: 5,
                msg: "rejected".into(),
            }),
        );
        signer.script("trigger", Ok(json!({ "oid": 7 })));
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(signer, clock);

        let placement = mgr
            .place_sl_tp_orders(
                "ETH",
                Side::Sell,
                dec!(0.5),
                dec!(3000),
                dec!(3100),
                dec!(2800),
                None,
            )
            .await
            .unwrap();

        assert_eq!(placement.sl_order_id, None);
        assert_eq!(placement.tp_order_id, Some(7));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn both_legs_failing_is_an_error() {
        let signer = Arc::new(MockSigner::new());
        for _ in 0..2 {
            signer.script(
                "trigger",
                Err(VenueError::Venue {
                    code: 5,
                    msg: "rejected".into(),
                }),
            );
        }
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(signer, clock);

        let result = mgr
            .place_sl_tp_orders(
                "ETH",
                Side::Buy,
                dec!(0.5),
                dec!(3000),
                dec!(2900),
                dec!(3200),
                None,
            )
            .await;
        assert!(result.is_err());
        assert!(mgr.tracked("ETH").is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn sl_update_rate_limited_within_30s() {
        let signer = Arc::new(MockSigner::new());
        signer.script("trigger", Ok(json!({ "oid": 10 })));
        signer.script("trigger", Ok(json!({ "oid": 11 })));
        signer.script("trigger", Ok(json!({ "oid": 12 })));
        signer.script("trigger", Ok(json!({ "oid": 13 })));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mgr = manager(signer.clone(), clock.clone());

        mgr.place_sl_tp_orders(
            "BTC",
            Side::Buy,
            dec!(0.001),
            dec!(50000),
            dec!(49000),
            dec!(52000),
            None,
        )
        .await
        .unwrap();

        // 10 s later: inside the window, rejected.
        clock.advance(10_000);
        let err = mgr
            .update_stop_loss("BTC", Side::Buy, dec!(0.001), dec!(49500), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::RateLimited));

        // Forced update bypasses the window.
        let oid = mgr
            .update_stop_loss("BTC", Side::Buy, dec!(0.001), dec!(49500), None, true)
            .await
            .unwrap();
        assert_eq!(oid, 12);

        // After the window: allowed.
        clock.advance(31_000);
        let oid = mgr
            .update_stop_loss("BTC", Side::Buy, dec!(0.001), dec!(49600), None, false)
            .await
            .unwrap();
        assert_eq!(oid, 13);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn sl_update_ignores_cancel_failure() {
        let signer = Arc::new(MockSigner::new());
        signer.script("trigger", Ok(json!({ "oid": 20 })));
        signer.script("trigger", Ok(json!({ "oid": 21 })));
        signer.script(
            "cancel",
            Err(VenueError::Venue {
                code: 1,
                msg: "already filled".into(),
            }),
        );
        signer.script("trigger", Ok(json!({ "oid": 22 })));
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(signer.clone(), clock.clone());

        mgr.place_sl_tp_orders(
            "SOL",
            Side::Buy,
            dec!(1),
            dec!(150),
            dec!(147),
            dec!(156),
            None,
        )
        .await
        .unwrap();

        clock.advance(40_000);
        let oid = mgr
            .update_stop_loss("SOL", Side::Buy, dec!(1), dec!(148), None, false)
            .await
            .unwrap();
        assert_eq!(oid, 22);
        assert_eq!(mgr.tracked("SOL").unwrap().sl_order_id, Some(22));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn clear_tracked_forgets_state() {
        let signer = Arc::new(MockSigner::new());
        signer.script("trigger", Ok(json!({ "oid": 1 })));
        signer.script("trigger", Ok(json!({ "oid": 2 })));
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(signer, clock);

        mgr.place_sl_tp_orders(
            "BTC",
            Side::Buy,
            dec!(0.001),
            dec!(50000),
            dec!(49000),
            dec!(52000),
            None,
        )
        .await
        .unwrap();
        assert!(mgr.tracked("BTC").is_some());

        mgr.clear_tracked("BTC");
        assert!(mgr.tracked("BTC").is_none());
    }

    #[test]
    fn min_profitable_tp_clears_gate_both_sides() {
        let tp = min_profitable_tp(dec!(50000), Side::Buy);
        assert!(tp > dec!(50000));
        assert!(profitability_check(dec!(50000), tp, dec!(0.01), Side::Buy).is_ok());

        let tp = min_profitable_tp(dec!(50000), Side::Sell);
        assert!(tp < dec!(50000));
        assert!(profitability_check(dec!(50000), tp, dec!(0.01), Side::Sell).is_ok());
    }
}
