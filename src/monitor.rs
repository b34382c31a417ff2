// =============================================================================
// Position Lifecycle Monitor — reconciliation + in-flight trade management
// =============================================================================
//
// A 10 s cycle with two phases, reconciliation first so freshly synced
// trades are tracked before management runs:
//
//   1. Reconcile against the venue. Venue positions without a local trade
//      are adopted (synced trade + protective orders); local open trades the
//      venue no longer reports are closed at the cached mid with fees and
//      daily counters settled.
//
//   2. Manage every open trade while the venue still holds it: breakeven
//      move at +1%, trailing activation and ratchet, 50% partial profit at
//      half the target, and a status line roughly once a minute.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::strategy::regime::classify;
use crate::strategy::sltp::build_plan;
use crate::types::{coin_of, AgentCredential, Side, TradeRecord, TradeStatus};
use crate::venue::rounding::taker_fee;
use crate::venue::VenuePosition;

/// Monitor cycle interval.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
/// Profit percentage that triggers the breakeven move.
const BREAKEVEN_TRIGGER_PCT: f64 = 1.0;
/// Half the position is taken off at this fraction of the TP distance.
const PARTIAL_AT_TP_FRACTION: f64 = 0.5;
/// Remaining notional must stay above this for a partial to make sense.
const MIN_PARTIAL_NOTIONAL: Decimal = dec!(20);
/// Slippage padding for the partial-profit limit order, percent.
const PARTIAL_SLIPPAGE_PCT: Decimal = dec!(0.5);
/// Status log interval per trade.
const STATUS_LOG_INTERVAL_MS: i64 = 60_000;

/// Per-trade trailing-stop state. Owned by the monitor; created when a trade
/// is committed or synced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingState {
    pub entry_price: Decimal,
    pub current_stop: Decimal,
    pub highest_seen: Decimal,
    pub lowest_seen: Decimal,
    pub trailing_activated: bool,
    pub partial_taken: bool,
    #[serde(skip)]
    last_status_log_ms: i64,
}

impl TrailingState {
    pub fn new(entry_price: Decimal, initial_stop: Decimal) -> Self {
        Self {
            entry_price,
            current_stop: initial_stop,
            highest_seen: entry_price,
            lowest_seen: entry_price,
            trailing_activated: false,
            partial_taken: false,
            last_status_log_ms: 0,
        }
    }
}

/// Run the monitor until the stop signal fires. Spawned once at startup.
pub async fn run_position_monitor(state: Arc<AppState>, mut stop: watch::Receiver<bool>) {
    info!(interval_s = MONITOR_INTERVAL.as_secs(), "position monitor started");
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => {
                if *stop.borrow() {
                    info!("position monitor stopping");
                    return;
                }
            }
        }

        if !state.control.is_running() {
            continue;
        }

        if let Err(e) = run_cycle(&state).await {
            warn!(error = %e, "monitor cycle failed");
            state.push_error(format!("monitor: {e}"), None);
        }
    }
}

/// One full reconciliation + management cycle. Public so scenario tests can
/// drive it directly.
pub async fn run_cycle(state: &AppState) -> Result<()> {
    let agent = state.active_agent();
    let positions = state.bridge.get_positions(agent.as_ref()).await?;

    reconcile(state, &positions, agent.as_ref()).await;
    manage_open_trades(state, &positions, agent.as_ref()).await;
    Ok(())
}

// -----------------------------------------------------------------------------
// Phase 1 — reconciliation
// -----------------------------------------------------------------------------

async fn reconcile(state: &AppState, positions: &[VenuePosition], agent: Option<&AgentCredential>) {
    let open_trades = state.trade_store.open_trades();

    // Venue position with no local trade: adopt it.
    for position in positions {
        let symbol = crate::types::perp_symbol(&position.coin);
        if open_trades.iter().any(|t| t.symbol == symbol) {
            continue;
        }
        if let Err(e) = adopt_position(state, position, &symbol, agent).await {
            warn!(symbol = %symbol, error = %e, "failed to adopt venue position");
            state.push_error(format!("adopt {symbol}: {e}"), None);
        }
    }

    // Local open trade the venue no longer reports: close it out.
    for trade in &open_trades {
        let coin = coin_of(&trade.symbol).to_string();
        if positions.iter().any(|p| p.coin == coin) {
            continue;
        }
        close_local_trade(state, trade.clone(), &coin);
    }
}

/// Synthesize a local record for a venue position opened outside this
/// engine (or lost to a restart), and re-arm its protective orders.
async fn adopt_position(
    state: &AppState,
    position: &VenuePosition,
    symbol: &str,
    agent: Option<&AgentCredential>,
) -> Result<()> {
    let side = if position.size > Decimal::ZERO {
        Side::Buy
    } else {
        Side::Sell
    };
    let quantity = position.size.abs();
    let entry = position.entry_price;

    let settings = state.active_settings();
    let closes = state.market.closes(symbol);
    let regime = classify(&closes);
    let plan = build_plan(entry, side, &settings, &closes, &regime);

    let trade = TradeRecord {
        id: Uuid::new_v4().to_string(),
        user_wallet: state.control.state().active_user_wallet,
        symbol: symbol.to_string(),
        side,
        entry_price: entry,
        quantity,
        leverage: position.leverage,
        stop_loss: plan.stop_loss,
        take_profit: plan.take_profit,
        entry_fee: taker_fee(entry, quantity),
        exit_fee: Decimal::ZERO,
        exit_price: None,
        exit_time: None,
        status: TradeStatus::Open,
        gross_pnl: None,
        net_pnl: None,
        confidence: 0.0,
        reasoning: "synced from venue reconciliation".to_string(),
        timestamp: state.clock.now_ms(),
    };

    let placement = state
        .orders
        .place_sl_tp_orders(
            &position.coin,
            side,
            quantity,
            entry,
            plan.stop_loss,
            plan.take_profit,
            agent,
        )
        .await;
    if let Err(e) = &placement {
        warn!(symbol, error = %e, "protective orders for synced trade failed");
    }

    state.trade_store.upsert(&trade)?;
    state
        .trailing
        .write()
        .insert(trade.id.clone(), TrailingState::new(entry, plan.stop_loss));

    info!(
        symbol,
        side = %side,
        entry = %entry,
        qty = %quantity,
        sl = %plan.stop_loss,
        tp = %plan.take_profit,
        "venue position adopted as synced trade"
    );
    Ok(())
}

/// The venue no longer reports this position: settle the local record at the
/// cached mid and update daily counters.
fn close_local_trade(state: &AppState, mut trade: TradeRecord, coin: &str) {
    let exit_price = state
        .market
        .latest_mid(&trade.symbol)
        .unwrap_or(trade.entry_price);
    let exit_fee = taker_fee(exit_price, trade.quantity);
    let now = state.clock.now_ms();

    trade.close(exit_price, exit_fee, now);
    let net = trade.net_pnl.unwrap_or_default();

    if let Err(e) = state.trade_store.upsert(&trade) {
        warn!(trade_id = %trade.id, error = %e, "failed to persist closed trade");
    }

    let settings = state.active_settings();
    let equity = *state.equity.read();
    let effect =
        state
            .control
            .record_trade_close(net, equity, settings.profile, settings.daily_loss_limit_pct);

    state.orders.clear_tracked(coin);
    state.trailing.write().remove(&trade.id);

    // A daily-loss kill gets the best-effort venue sweep.
    if let crate::control::CloseEffect::Killed(_) = &effect {
        let bridge = state.bridge.clone();
        let agent = state.active_agent();
        tokio::spawn(async move {
            if let Err(e) = bridge.cancel_all_orders(None, agent.as_ref()).await {
                warn!(error = %e, "kill sweep: cancel-all failed");
            }
            if let Err(e) = bridge.close_all(agent.as_ref()).await {
                warn!(error = %e, "kill sweep: close-all failed");
            }
        });
    }

    info!(
        trade_id = %trade.id,
        symbol = %trade.symbol,
        exit = %exit_price,
        net_pnl = %net,
        effect = ?effect,
        "venue-side close reconciled"
    );
}

// -----------------------------------------------------------------------------
// Phase 2 — in-flight management
// -----------------------------------------------------------------------------

async fn manage_open_trades(
    state: &AppState,
    positions: &[VenuePosition],
    agent: Option<&AgentCredential>,
) {
    let settings = state.active_settings();
    let open_trades = state.trade_store.open_trades();

    for trade in open_trades {
        let coin = coin_of(&trade.symbol).to_string();
        if !positions.iter().any(|p| p.coin == coin) {
            // Closed this cycle by reconciliation.
            continue;
        }
        let Some(mark) = state.market.latest_mid(&trade.symbol) else {
            continue;
        };
        if let Err(e) = manage_trade(state, &settings, &trade, &coin, mark, agent).await {
            debug!(symbol = %trade.symbol, error = %e, "trade management step failed");
        }
    }
}

async fn manage_trade(
    state: &AppState,
    settings: &crate::settings::Settings,
    trade: &TradeRecord,
    coin: &str,
    mark: Decimal,
    agent: Option<&AgentCredential>,
) -> Result<()> {
    let now = state.clock.now_ms();
    let is_long = trade.side == Side::Buy;

    // Current percentage PnL vs entry, direction-adjusted.
    let pnl_pct = ((mark - trade.entry_price) / trade.entry_price * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
        * if is_long { 1.0 } else { -1.0 };

    // Snapshot and update extremes.
    let mut trail = {
        let mut map = state.trailing.write();
        let entry = map
            .entry(trade.id.clone())
            .or_insert_with(|| TrailingState::new(trade.entry_price, trade.stop_loss));
        if mark > entry.highest_seen {
            entry.highest_seen = mark;
        }
        if mark < entry.lowest_seen {
            entry.lowest_seen = mark;
        }
        entry.clone()
    };

    // ── 1. Breakeven move at +1% ───────────────────────────────────────
    let stop_worse_than_entry = if is_long {
        trail.current_stop < trade.entry_price
    } else {
        trail.current_stop > trade.entry_price
    };
    if pnl_pct >= BREAKEVEN_TRIGGER_PCT && stop_worse_than_entry {
        match state
            .orders
            .update_stop_loss(coin, trade.side, trade.quantity, trade.entry_price, agent, false)
            .await
        {
            Ok(_) => {
                trail.current_stop = trade.entry_price;
                info!(symbol = %trade.symbol, stop = %trade.entry_price, "stop moved to breakeven");
            }
            Err(e) => debug!(symbol = %trade.symbol, error = %e, "breakeven update deferred"),
        }
    }

    // ── 2. Trailing activation ─────────────────────────────────────────
    if settings.enable_trailing_stop
        && !trail.trailing_activated
        && pnl_pct >= settings.trailing_stop_activation
    {
        trail.trailing_activated = true;
        info!(symbol = %trade.symbol, pnl_pct, "trailing stop activated");
    }

    // ── 3. Trailing ratchet ────────────────────────────────────────────
    if trail.trailing_activated {
        let distance = Decimal::from_f64(settings.trailing_stop_distance / 100.0)
            .unwrap_or_default();
        let target = if is_long {
            trail.highest_seen * (Decimal::ONE - distance)
        } else {
            trail.lowest_seen * (Decimal::ONE + distance)
        };
        let improves = if is_long {
            target > trail.current_stop
        } else {
            target < trail.current_stop
        };
        if improves {
            match state
                .orders
                .update_stop_loss(coin, trade.side, trade.quantity, target, agent, false)
                .await
            {
                Ok(_) => {
                    trail.current_stop = target;
                    info!(symbol = %trade.symbol, stop = %target, "trailing stop ratcheted");
                }
                Err(e) => debug!(symbol = %trade.symbol, error = %e, "trailing update deferred"),
            }
        }
    }

    // ── 4. Partial profit at half the target ───────────────────────────
    if settings.enable_partial_profit && !trail.partial_taken {
        let tp_pct = ((trade.take_profit - trade.entry_price).abs() / trade.entry_price
            * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);
        let remaining_notional = mark * trade.quantity / Decimal::TWO;
        if tp_pct > 0.0
            && pnl_pct >= tp_pct * PARTIAL_AT_TP_FRACTION
            && remaining_notional >= MIN_PARTIAL_NOTIONAL
        {
            let half = trade.quantity / Decimal::TWO;
            match state
                .bridge
                .execute_limit_order(coin, trade.side.opposite(), half, mark, PARTIAL_SLIPPAGE_PCT, agent)
                .await
            {
                Ok(ack) => {
                    trail.partial_taken = true;
                    let mut reduced = trade.clone();
                    reduced.quantity = trade.quantity - half;
                    if let Err(e) = state.trade_store.upsert(&reduced) {
                        warn!(trade_id = %trade.id, error = %e, "failed to persist partial");
                    }
                    info!(
                        symbol = %trade.symbol,
                        oid = ack.oid,
                        closed = %half,
                        remaining = %reduced.quantity,
                        "partial profit taken"
                    );
                }
                Err(e) => warn!(symbol = %trade.symbol, error = %e, "partial profit order failed"),
            }
        }
    }

    // ── 5. Status line, once a minute per trade ────────────────────────
    if now - trail.last_status_log_ms >= STATUS_LOG_INTERVAL_MS {
        trail.last_status_log_ms = now;
        info!(
            symbol = %trade.symbol,
            side = %trade.side,
            entry = %trade.entry_price,
            mark = %mark,
            pnl_pct = format!("{pnl_pct:.2}"),
            stop = %trail.current_stop,
            trailing = trail.trailing_activated,
            partial = trail.partial_taken,
            "open position status"
        );
    }

    state.trailing.write().insert(trade.id.clone(), trail);
    Ok(())
}
