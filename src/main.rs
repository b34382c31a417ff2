// =============================================================================
// Meridian Perps — Main Entry Point
// =============================================================================
//
// The engine always boots disarmed in paper mode regardless of what was
// persisted. Arming live trading requires the confirmation phrase, the
// LIVE_TRADING_ENABLED environment flag, a matching venue network, and
// registered agent credentials.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod clock;
mod control;
mod indicators;
mod market_data;
mod monitor;
mod orders;
mod sentiment;
mod settings;
mod store;
mod strategy;
mod types;
mod venue;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::clock::{SharedClock, SystemClock};
use crate::control::ControlPlane;
use crate::market_data::{MarketCache, MarketFanout, StreamConfig};
use crate::orders::OrderManager;
use crate::sentiment::{SentimentClient, SentimentGate};
use crate::store::{JsonAgentStore, JsonSettingsStore, JsonTradeStore, TradeStore};
use crate::types::{coin_of, EngineMode};
use crate::venue::{InfoClient, SubprocessSigner, VenueBridge};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Meridian Perps Engine — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let info_url = env_or("MERIDIAN_INFO_URL", "https://api.hyperliquid.xyz/info");
    let ws_url = env_or("MERIDIAN_WS_URL", "wss://api.hyperliquid.xyz/ws");
    let signer_program = env_or("MERIDIAN_SIGNER", "meridian-signer");
    let data_dir = env_or("MERIDIAN_DATA_DIR", "data");
    let bind_addr = env_or("MERIDIAN_BIND_ADDR", "0.0.0.0:3001");

    let configured_network = match env_or("MERIDIAN_NETWORK", "testnet").as_str() {
        "mainnet" => EngineMode::Mainnet,
        _ => EngineMode::Testnet,
    };
    let live_trading_enabled = env_or("LIVE_TRADING_ENABLED", "false") == "true";

    // ── 2. Stores & clock ────────────────────────────────────────────────
    let clock: SharedClock = Arc::new(SystemClock);
    let settings_store = Arc::new(JsonSettingsStore::open(&data_dir));
    let trade_store: Arc<JsonTradeStore> = Arc::new(JsonTradeStore::open(&data_dir));
    let agent_store = Arc::new(JsonAgentStore::open(&data_dir));

    let recovered_open = trade_store.open_trades().len();
    if recovered_open > 0 {
        info!(
            count = recovered_open,
            "open trades recovered, reconciliation will sync them with the venue"
        );
    }

    // ── 3. Venue & market data ───────────────────────────────────────────
    let bridge = VenueBridge::new(
        InfoClient::new(&info_url),
        Arc::new(SubprocessSigner::new(&signer_program)),
    );
    let market = Arc::new(MarketCache::new());
    let fanout = MarketFanout::new();

    // ── 4. Safety & sentiment ────────────────────────────────────────────
    let control = Arc::new(ControlPlane::new(clock.clone()));
    let sentiment_gate = Arc::new(SentimentGate::new(clock.clone()));
    let sentiment_client = match std::env::var("SENTIMENT_API_KEY") {
        Ok(key) if !key.is_empty() => {
            let url = env_or("SENTIMENT_API_URL", "https://api.x.ai/v1/chat/completions");
            let model = env_or("SENTIMENT_MODEL", "grok-3-mini");
            info!(model = %model, "sentiment advisory enabled");
            Some(Arc::new(SentimentClient::new(url, key, model)))
        }
        _ => {
            info!("sentiment advisory disabled (no api key)");
            None
        }
    };

    // ── 5. Shared engine state ───────────────────────────────────────────
    let orders = Arc::new(OrderManager::new(bridge.clone(), clock.clone()));
    let state = Arc::new(AppState {
        clock,
        settings_store,
        trade_store,
        agent_store,
        market: market.clone(),
        fanout: fanout.clone(),
        bridge,
        orders,
        control,
        sentiment_gate,
        sentiment_client,
        configured_network,
        live_trading_enabled,
        trailing: RwLock::new(HashMap::new()),
        equity: RwLock::new(Decimal::ZERO),
        recent_decisions: RwLock::new(Vec::new()),
        recent_errors: RwLock::new(Vec::new()),
        start_time: std::time::Instant::now(),
    });

    info!(
        network = %configured_network,
        live_trading_enabled,
        "engine booted in SAFE mode (paper, disarmed, stopped)"
    );

    // ── 6. Stop signal shared by every loop ──────────────────────────────
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    // ── 7. Market stream ─────────────────────────────────────────────────
    let mut coins: Vec<String> = state
        .active_settings()
        .trading_bag
        .iter()
        .map(|s| coin_of(s).to_string())
        .collect();
    if let Ok(extra) = std::env::var("MERIDIAN_SYMBOLS") {
        coins.extend(extra.split(',').map(|s| s.trim().to_uppercase()));
    }
    coins.sort();
    coins.dedup();
    if coins.is_empty() {
        coins = vec!["BTC".into(), "ETH".into()];
    }
    info!(coins = ?coins, "market stream subscription set");

    let stream_config = StreamConfig {
        ws_url,
        coins,
        enable_liquidations: env_or("MERIDIAN_LIQUIDATIONS", "true") == "true",
    };
    {
        let cache = market.clone();
        let fanout = fanout.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move {
            market_data::run_market_stream(stream_config, cache, fanout, stop).await;
        });
    }

    // Liquidation prints and stream health, observed through the fanout.
    {
        let state = state.clone();
        let liquidations = fanout.subscribe(market_data::EventKind::Liquidation);
        tokio::spawn(async move {
            loop {
                match liquidations.recv().await {
                    market_data::MarketEvent::Liquidation(tick) => {
                        info!(
                            symbol = %tick.symbol,
                            side = ?tick.side,
                            price = %tick.price,
                            size = %tick.size,
                            "liquidation print"
                        );
                    }
                    market_data::MarketEvent::Disconnected => {
                        state.push_error("market stream disconnected".to_string(), None);
                        error!("market stream disconnected — no further market data");
                        return;
                    }
                    _ => {}
                }
            }
        });
    }

    // ── 8. Analysis loop & position monitor ──────────────────────────────
    {
        let state = state.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move {
            strategy::run_analysis_loop(state, stop).await;
        });
    }
    {
        let state = state.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move {
            monitor::run_position_monitor(state, stop).await;
        });
    }

    // ── 9. HTTP control surface ──────────────────────────────────────────
    {
        let app = api::router(state.clone());
        let bind = bind_addr.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&bind).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind, error = %e, "failed to bind API server");
                    return;
                }
            };
            info!(addr = %bind, "API server listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "API server failed");
            }
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 10. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    state.control.stop();
    let _ = stop_tx.send(true);
    // Let loops observe the signal and finish in-flight venue requests.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    info!("Meridian Perps Engine shut down complete.");
    Ok(())
}
