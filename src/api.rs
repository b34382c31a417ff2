// =============================================================================
// HTTP control surface — thin axum router over the engine
// =============================================================================
//
// Control-plane verbs and read-only status/history queries. No auth, CORS,
// or rate-limit layer lives here; this surface is intended to sit behind the
// application gateway that owns those concerns.
//
// Failures carry `{ "error": <code>, "message": <human readable> }`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::control::ArmContext;
use crate::settings::Settings;
use crate::types::{coin_of, AgentCredential, EngineMode, TradeStatus};

/// Build the `/trading/*` router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/trading/arm", post(arm))
        .route("/trading/disarm", post(disarm))
        .route("/trading/kill", post(kill))
        .route("/trading/reset-kill", post(reset_kill))
        .route("/trading/start", post(start))
        .route("/trading/stop", post(stop))
        .route("/trading/register-agent", post(register_agent))
        .route("/trading/settings", post(put_settings).get(get_settings))
        .route("/trading/status", get(status))
        .route("/trading/bot-status", get(bot_status))
        .route("/trading/debug", get(debug_info))
        .route("/trading/sentiment-usage", get(sentiment_usage))
        .route("/trading/trade-history", get(trade_history))
        .route("/trading/stats", get(stats))
        .route("/trading/performance", get(performance))
        .route("/trading/leaderboard", get(leaderboard))
        .route("/trading/close-all", post(close_all))
        .route("/trading/cancel-all-orders", post(cancel_all_orders))
        .route("/trading/open-orders", get(open_orders))
        .route("/trading/positions", get(positions))
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": code, "message": message.into() })),
    )
        .into_response()
}

// -----------------------------------------------------------------------------
// Control plane
// -----------------------------------------------------------------------------

#[derive(Deserialize)]
struct ArmRequest {
    confirmation: String,
    mode: EngineMode,
    #[serde(default)]
    wallet: Option<String>,
}

async fn arm(State(state): State<Arc<AppState>>, Json(req): Json<ArmRequest>) -> Response {
    let armed_by = req
        .wallet
        .or_else(|| state.control.state().active_user_wallet)
        .unwrap_or_else(|| "api".to_string());

    let ctx = ArmContext {
        live_trading_enabled: state.live_trading_enabled,
        configured_network: state.configured_network,
        has_agent_credentials: state.active_agent().is_some()
            || state.agent_store.get(&armed_by).is_some(),
    };

    match state.control.arm(&req.confirmation, req.mode, &armed_by, &ctx) {
        Ok(()) => Json(json!({ "armed": true, "mode": req.mode })).into_response(),
        Err(e) => {
            let status = match e.code() {
                "kill_switch_active" => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            };
            error_response(status, e.code(), e.to_string())
        }
    }
}

async fn disarm(State(state): State<Arc<AppState>>) -> Response {
    state.control.disarm();
    Json(json!({ "armed": false })).into_response()
}

#[derive(Deserialize)]
struct KillRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn kill(State(state): State<Arc<AppState>>, Json(req): Json<KillRequest>) -> Response {
    let reason = req.reason.unwrap_or_else(|| "manual kill".to_string());
    state.control.kill(&reason);

    // Best-effort sweep: flatten and clear resting orders.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let agent = sweep_state.active_agent();
        if let Err(e) = sweep_state.bridge.cancel_all_orders(None, agent.as_ref()).await {
            warn!(error = %e, "kill sweep: cancel-all failed");
        }
        if let Err(e) = sweep_state.bridge.close_all(agent.as_ref()).await {
            warn!(error = %e, "kill sweep: close-all failed");
        }
    });

    Json(json!({ "killed": true, "reason": reason })).into_response()
}

#[derive(Deserialize)]
struct ResetKillRequest {
    confirmation: String,
}

async fn reset_kill(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetKillRequest>,
) -> Response {
    match state.control.reset_kill(&req.confirmation) {
        Ok(()) => Json(json!({ "killed": false })).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
    }
}

#[derive(Deserialize)]
struct StartRequest {
    wallet: String,
}

async fn start(State(state): State<Arc<AppState>>, Json(req): Json<StartRequest>) -> Response {
    if state.control.is_killed() {
        return error_response(
            StatusCode::FORBIDDEN,
            "kill_switch_active",
            "reset the kill switch before starting",
        );
    }
    state.control.start(&req.wallet);
    Json(json!({ "running": true, "wallet": req.wallet.to_lowercase() })).into_response()
}

async fn stop(State(state): State<Arc<AppState>>) -> Response {
    state.control.stop();
    Json(json!({ "running": false })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAgentRequest {
    master_address: String,
    agent_address: String,
    agent_private_key: String,
    agent_name: String,
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterAgentRequest>,
) -> Response {
    if req.agent_private_key.is_empty() || req.agent_address.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_agent",
            "agent address and key are required",
        );
    }
    let credential = AgentCredential {
        user_wallet: req.master_address.clone(),
        agent_address: req.agent_address,
        agent_key: req.agent_private_key,
        agent_name: req.agent_name,
        approved_at: state.clock.now_ms(),
    };
    match state.agent_store.put(credential) {
        Ok(()) => {
            info!(wallet = %req.master_address, "agent credentials registered");
            Json(json!({ "registered": true })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

// -----------------------------------------------------------------------------
// Settings
// -----------------------------------------------------------------------------

#[derive(Deserialize)]
struct SettingsRequest {
    wallet: String,
    #[serde(flatten)]
    settings: Settings,
}

async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SettingsRequest>,
) -> Response {
    let normalized = req.settings.normalized();
    match state.settings_store.put(&req.wallet, normalized.clone()) {
        Ok(()) => Json(json!({ "saved": true, "settings": normalized })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

#[derive(Deserialize)]
struct WalletQuery {
    wallet: String,
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WalletQuery>,
) -> Response {
    let settings = state
        .settings_store
        .get(&query.wallet)
        .unwrap_or_default();
    Json(json!({ "settings": settings })).into_response()
}

// -----------------------------------------------------------------------------
// Status / history
// -----------------------------------------------------------------------------

async fn status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.snapshot()).into_response()
}

async fn bot_status(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.snapshot();
    Json(json!({
        "running": snapshot.control.running,
        "armed": snapshot.control.armed,
        "mode": snapshot.control.mode,
        "killSwitchActive": snapshot.control.kill_switch_active,
        "openTrades": snapshot.open_trades,
        "tradesToday": snapshot.stats.trades_today,
        "dailyPnl": snapshot.stats.daily_pnl,
    }))
    .into_response()
}

async fn debug_info(State(state): State<Arc<AppState>>) -> Response {
    Json(state.debug_snapshot()).into_response()
}

async fn sentiment_usage(State(state): State<Arc<AppState>>) -> Response {
    Json(state.sentiment_gate.usage()).into_response()
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    wallet: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn trade_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(100).min(1_000);
    let wallet = query.wallet.map(|w| w.to_lowercase());
    let trades: Vec<_> = state
        .trade_store
        .load(0, 10_000)
        .into_iter()
        .filter(|t| match (&wallet, &t.user_wallet) {
            (Some(w), Some(tw)) => tw.to_lowercase() == *w,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .take(limit)
        .collect();
    Json(json!({ "trades": trades })).into_response()
}

async fn stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.control.stats()).into_response()
}

#[derive(Deserialize)]
struct PerformanceQuery {
    #[serde(default)]
    wallet: Option<String>,
}

async fn performance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PerformanceQuery>,
) -> Response {
    Json(state.performance(query.wallet.as_deref())).into_response()
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(rename = "sortBy", default)]
    sort_by_camel: Option<String>,
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let sort_by = query
        .sort_by_camel
        .or(query.sort_by)
        .unwrap_or_else(|| "pnl".to_string());
    let trades = state.trade_store.load(0, 100_000);
    let rows = build_leaderboard(&trades, &sort_by);
    Json(json!({ "sortBy": sort_by, "rows": rows })).into_response()
}

/// Aggregate closed trades per wallet and sort by the requested column.
fn build_leaderboard(trades: &[crate::types::TradeRecord], sort_by: &str) -> Vec<Value> {
    #[derive(Default)]
    struct Row {
        pnl: Decimal,
        volume: Decimal,
        fees: Decimal,
        trades: u64,
        wins: u64,
    }

    let mut rows: HashMap<String, Row> = HashMap::new();
    for trade in trades.iter().filter(|t| t.status == TradeStatus::Closed) {
        let wallet = trade
            .user_wallet
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
            .to_lowercase();
        let row = rows.entry(wallet).or_default();
        row.pnl += trade.net_pnl.unwrap_or_default();
        row.volume += trade.entry_price * trade.quantity;
        row.fees += trade.entry_fee + trade.exit_fee;
        row.trades += 1;
        if trade.net_pnl.unwrap_or_default() > Decimal::ZERO {
            row.wins += 1;
        }
    }

    let mut out: Vec<(String, Row)> = rows.into_iter().collect();
    let key = |row: &Row| -> f64 {
        match sort_by {
            "volume" => row.volume.to_f64().unwrap_or(0.0),
            "fees" => row.fees.to_f64().unwrap_or(0.0),
            "trades" => row.trades as f64,
            "winrate" => {
                if row.trades > 0 {
                    row.wins as f64 / row.trades as f64
                } else {
                    0.0
                }
            }
            _ => row.pnl.to_f64().unwrap_or(0.0),
        }
    };
    out.sort_by(|a, b| {
        key(&b.1)
            .partial_cmp(&key(&a.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    out.into_iter()
        .map(|(wallet, row)| {
            json!({
                "wallet": wallet,
                "pnl": row.pnl,
                "volume": row.volume,
                "fees": row.fees,
                "trades": row.trades,
                "winRate": if row.trades > 0 { row.wins as f64 / row.trades as f64 } else { 0.0 },
            })
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Venue passthrough
// -----------------------------------------------------------------------------

async fn close_all(State(state): State<Arc<AppState>>) -> Response {
    let agent = state.active_agent();
    match state.bridge.close_all(agent.as_ref()).await {
        Ok(()) => Json(json!({ "closed": true })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, "venue_error", e.to_string()),
    }
}

#[derive(Deserialize)]
struct CancelAllRequest {
    #[serde(default)]
    coin: Option<String>,
}

async fn cancel_all_orders(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelAllRequest>,
) -> Response {
    let agent = state.active_agent();
    let coin = req.coin.as_deref().map(coin_of);
    match state.bridge.cancel_all_orders(coin, agent.as_ref()).await {
        Ok(()) => Json(json!({ "cancelled": true })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, "venue_error", e.to_string()),
    }
}

async fn open_orders(State(state): State<Arc<AppState>>) -> Response {
    let agent = state.active_agent();
    match state.bridge.get_open_orders(agent.as_ref()).await {
        Ok(orders) => {
            let rows: Vec<Value> = orders
                .iter()
                .map(|o| {
                    json!({
                        "coin": o.coin,
                        "oid": o.oid,
                        "side": o.side,
                        "size": o.size,
                        "price": o.price,
                        "isTrigger": o.is_trigger,
                    })
                })
                .collect();
            Json(json!({ "orders": rows })).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_GATEWAY, "venue_error", e.to_string()),
    }
}

async fn positions(State(state): State<Arc<AppState>>) -> Response {
    let agent = state.active_agent();
    match state.bridge.get_positions(agent.as_ref()).await {
        Ok(positions) => {
            let rows: Vec<Value> = positions
                .iter()
                .map(|p| {
                    json!({
                        "coin": p.coin,
                        "size": p.size,
                        "entryPrice": p.entry_price,
                        "positionValue": p.position_value,
                        "unrealizedPnl": p.unrealized_pnl,
                        "leverage": p.leverage,
                    })
                })
                .collect();
            Json(json!({ "positions": rows })).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_GATEWAY, "venue_error", e.to_string()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, TradeRecord};
    use rust_decimal_macros::dec;

    fn closed_trade(wallet: &str, net: Decimal) -> TradeRecord {
        let mut t = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_wallet: Some(wallet.to_string()),
            symbol: "BTC-PERP".into(),
            side: Side::Buy,
            entry_price: dec!(50000),
            quantity: dec!(0.001),
            leverage: 5,
            stop_loss: dec!(49000),
            take_profit: dec!(52000),
            entry_fee: dec!(0.01),
            exit_fee: Decimal::ZERO,
            exit_price: None,
            exit_time: None,
            status: TradeStatus::Open,
            gross_pnl: None,
            net_pnl: None,
            confidence: 50.0,
            reasoning: String::new(),
            timestamp: 1,
        };
        // Force the exact net for aggregation checks.
        t.close(dec!(50000), Decimal::ZERO, 2);
        t.net_pnl = Some(net);
        t
    }

    #[test]
    fn leaderboard_sorts_by_requested_key() {
        let trades = vec![
            closed_trade("0xAAA", dec!(10)),
            closed_trade("0xAAA", dec!(-2)),
            closed_trade("0xBBB", dec!(50)),
        ];

        let by_pnl = build_leaderboard(&trades, "pnl");
        assert_eq!(by_pnl[0]["wallet"], "0xbbb");
        assert_eq!(by_pnl[1]["wallet"], "0xaaa");

        let by_trades = build_leaderboard(&trades, "trades");
        assert_eq!(by_trades[0]["wallet"], "0xaaa");

        let by_winrate = build_leaderboard(&trades, "winrate");
        assert_eq!(by_winrate[0]["wallet"], "0xbbb");
    }

    #[test]
    fn leaderboard_ignores_open_trades() {
        let mut open = closed_trade("0xAAA", dec!(1));
        open.status = TradeStatus::Open;
        let rows = build_leaderboard(&[open], "pnl");
        assert!(rows.is_empty());
    }
}
