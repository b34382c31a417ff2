// =============================================================================
// Analysis Engine — the per-tick decision pipeline
// =============================================================================
//
// One tick per loop interval (profile-dependent): refresh market snapshots,
// pick the hottest symbol from the user's bag, run the confluence scorer,
// then walk the gate chain (regime, correlation, sizing governor, optional
// sentiment advisory, fee profitability) before committing an entry with its
// protective orders. Every skip is recorded with its stage and reason.
// =============================================================================

use std::sync::Arc;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::indicators::levels::{momentum, trend_strength, TrendDirection};
use crate::indicators::stats::volatility;
use crate::monitor::TrailingState;
use crate::types::{coin_of, EngineMode, TradeRecord, TradeStatus};
use crate::venue::rounding::{clamp_leverage, round_price, round_size, taker_fee};

use super::confluence;
use super::correlation;
use super::regime::{classify, RegimeStrategy};
use super::session::{session_advice_ms, SessionAdvice};
use super::sizing::{size_multiplier, SizingInputs};
use super::sltp::{build_plan, profitability_check};

/// Slippage padding on the entry limit order, percent.
const ENTRY_SLIPPAGE_PCT: Decimal = dec!(0.5);
/// Minimum close samples before a symbol is scoreable.
const MIN_CLOSES: usize = 30;
/// Volatility above which dynamic leverage halves, percent.
const DYNAMIC_LEVERAGE_VOL_PCT: f64 = 1.5;

/// Outcome of one analysis tick.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// No entry this tick; stage and reason recorded.
    Skipped { stage: String, reason: String },
    /// An entry was committed.
    Traded(TradeRecord),
}

impl AnalysisOutcome {
    fn skip(state: &AppState, symbol: &str, stage: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        state.push_decision(symbol, stage, false, reason.clone(), None);
        debug!(symbol, stage, reason = %reason, "tick skipped");
        Self::Skipped {
            stage: stage.to_string(),
            reason,
        }
    }
}

/// Run the analysis loop until the stop signal fires. The cadence follows
/// the active user's profile and is re-read every iteration.
pub async fn run_analysis_loop(state: Arc<AppState>, mut stop: watch::Receiver<bool>) {
    info!("analysis loop started");
    loop {
        let interval = state.active_settings().profile.loop_interval_secs();
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = stop.changed() => {
                if *stop.borrow() {
                    info!("analysis loop stopping");
                    return;
                }
            }
        }

        if !state.control.is_running() {
            continue;
        }

        match analyze_tick(&state).await {
            AnalysisOutcome::Traded(trade) => {
                info!(symbol = %trade.symbol, side = %trade.side, "tick committed a trade");
            }
            AnalysisOutcome::Skipped { .. } => {}
        }
    }
}

/// One full pipeline pass. Public so scenario tests drive it directly.
pub async fn analyze_tick(state: &AppState) -> AnalysisOutcome {
    let settings = state.active_settings();
    let profile = settings.profile;
    let now = state.clock.now_ms();

    // ── 1. Global preconditions ─────────────────────────────────────────
    if settings.enable_session_filter && session_advice_ms(now) == SessionAdvice::Avoid {
        return AnalysisOutcome::skip(state, "*", "session", "session recommendation: avoid");
    }

    let open_symbols = state.open_trade_symbols();
    if open_symbols.len() >= settings.max_simultaneous_positions as usize {
        return AnalysisOutcome::skip(
            state,
            "*",
            "positions",
            format!("max simultaneous positions ({})", open_symbols.len()),
        );
    }

    // ── 2. Market snapshot for the bag ──────────────────────────────────
    for symbol in &settings.trading_bag {
        if let Some(mid) = state.market.latest_mid(symbol) {
            state.market.record_price(symbol, mid, now);
        }
    }
    refresh_volumes(state, &settings.trading_bag).await;

    // ── 3. Heat selection ───────────────────────────────────────────────
    let Some(symbol) = select_hottest(state, &settings.trading_bag) else {
        return AnalysisOutcome::skip(state, "*", "data", "no symbol with enough history");
    };
    let coin = coin_of(&symbol).to_string();

    // Gate chain parts owned by the control plane (kill, armed, pause,
    // daily cap, per-asset cooldown).
    if let Err(reason) = state.control.can_open_trade(profile, &symbol) {
        return AnalysisOutcome::skip(state, &symbol, "control", reason);
    }
    if open_symbols.iter().any(|s| s == &symbol) {
        return AnalysisOutcome::skip(state, &symbol, "positions", "position already open");
    }

    // ── 4. Order book snapshot ──────────────────────────────────────────
    let agent = state.active_agent();
    let paper = state.control.state().mode == EngineMode::Paper;
    let book = if paper {
        state.market.order_book(&symbol)
    } else {
        match state.bridge.get_order_book(&coin, 10, agent.as_ref()).await {
            Ok(book) => Some(book),
            Err(e) => {
                state.push_error(format!("order book {symbol}: {e}"), None);
                return AnalysisOutcome::skip(state, &symbol, "venue", format!("order book: {e}"));
            }
        }
    };
    let Some(book) = book else {
        return AnalysisOutcome::skip(state, &symbol, "data", "no order book");
    };
    let entry_ref = if book.mid_price > Decimal::ZERO {
        book.mid_price
    } else {
        match state.market.latest_mid(&symbol) {
            Some(mid) => mid,
            None => return AnalysisOutcome::skip(state, &symbol, "data", "no price"),
        }
    };

    // ── 5. Confluence ───────────────────────────────────────────────────
    let closes = state.market.closes(&symbol);
    let report = confluence::evaluate(&closes, Some(&book));
    let min_confirmations = settings.effective_min_confirmations();
    if !report.qualifies(min_confirmations, profile.min_strength()) {
        return AnalysisOutcome::skip(
            state,
            &symbol,
            "confluence",
            format!(
                "aligned {}/{} strength {:.0}/{:.0} direction {:?}",
                report.aligned_count,
                min_confirmations,
                report.total_strength,
                profile.min_strength(),
                report.direction
            ),
        );
    }
    let direction = report.direction.expect("qualified report has a direction");
    let side = direction.side();

    // ── 6. Regime gate ──────────────────────────────────────────────────
    let regime = classify(&closes);
    if regime.strategy == RegimeStrategy::Avoid
        && profile != crate::types::TradingProfile::Aggressive
        && !settings.allow_counter_trend
    {
        return AnalysisOutcome::skip(
            state,
            &symbol,
            "regime",
            format!("regime: {} (strategy avoid)", regime.regime),
        );
    }

    // ── 7. Correlation gate ─────────────────────────────────────────────
    if let Err(reason) = correlation::check(&open_symbols, &symbol) {
        return AnalysisOutcome::skip(state, &symbol, "correlation", reason);
    }

    // ── 8. Dynamic sizing ───────────────────────────────────────────────
    refresh_equity(state, agent.as_ref()).await;
    let equity = *state.equity.read();
    if equity <= Decimal::ZERO {
        return AnalysisOutcome::skip(state, &symbol, "sizing", "no account equity");
    }

    let stats = state.control.stats();
    let perf = state.performance(None);
    let avg_win = if perf.wins > 0 {
        trade_average(state, true)
    } else {
        0.0
    };
    let avg_loss = if perf.losses > 0 {
        trade_average(state, false)
    } else {
        0.0
    };

    let sizing = size_multiplier(&SizingInputs {
        consecutive_losses: stats.consecutive_losses,
        consecutive_wins: stats.consecutive_wins,
        win_rate: perf.win_rate,
        daily_pnl: stats.daily_pnl.to_f64().unwrap_or(0.0),
        confluence_strength: report.total_strength,
        drawdown_pct: stats.max_daily_drawdown,
        max_drawdown_pct: settings.max_drawdown_pct,
        closed_trades: perf.total_trades as u32,
        avg_win,
        avg_loss,
    });
    if sizing.should_pause {
        return AnalysisOutcome::skip(state, &symbol, "sizing", "drawdown governor: pause");
    }

    // ── 9. Optional sentiment advisory ──────────────────────────────────
    let vol = volatility(&closes);
    if settings.enable_sentiment {
        if let Some(client) = &state.sentiment_client {
            let pattern = report.signals.first().map(|s| s.name);
            let verdict = state.sentiment_gate.evaluate(
                profile,
                report.total_strength,
                pattern,
                vol,
                false,
            );
            if verdict.allowed {
                let change = state.market.change_24h(&symbol, now).unwrap_or(0.0);
                if let Some(advisory) =
                    client.analyze(&symbol, change, &settings.user_prompt).await
                {
                    state.sentiment_gate.record_call(
                        &symbol,
                        report.total_strength,
                        pattern.unwrap_or("confluence"),
                        "sentiment",
                    );
                    if advisory.should_avoid {
                        return AnalysisOutcome::skip(
                            state,
                            &symbol,
                            "sentiment",
                            format!("advisory: avoid ({})", advisory.sentiment),
                        );
                    }
                    if advisory.should_boost {
                        // Advisory only; sizing is never altered here.
                        info!(symbol = %symbol, "sentiment advisory: boost (logged only)");
                    }
                }
            }
        }
    }

    // ── 10. SL/TP plan ──────────────────────────────────────────────────
    let plan = build_plan(entry_ref, side, &settings, &closes, &regime);

    // ── 11. Quantity + profitability gate ───────────────────────────────
    let leverage = effective_leverage(&coin, &settings, vol);
    let margin = equity * Decimal::from_f64(settings.position_size_pct / 100.0).unwrap_or_default();
    let notional = margin
        * Decimal::from(leverage)
        * Decimal::from_f64(sizing.multiplier).unwrap_or(Decimal::ONE);
    if entry_ref.is_zero() || notional.is_zero() {
        return AnalysisOutcome::skip(state, &symbol, "sizing", "zero notional");
    }
    let quantity = round_size(&coin, notional / entry_ref);

    if let Err(reason) = profitability_check(entry_ref, plan.take_profit, quantity, side) {
        return AnalysisOutcome::skip(state, &symbol, "profitability", reason);
    }

    // ── 12. Commit ──────────────────────────────────────────────────────
    let entry_price = if paper {
        round_price(entry_ref)
    } else {
        match state
            .bridge
            .execute_limit_order(&coin, side, quantity, entry_ref, ENTRY_SLIPPAGE_PCT, agent.as_ref())
            .await
        {
            Ok(ack) => ack.avg_price.unwrap_or_else(|| round_price(entry_ref)),
            Err(e) => {
                state.push_error(format!("entry {symbol}: {e}"), None);
                return AnalysisOutcome::skip(state, &symbol, "venue", format!("entry: {e}"));
            }
        }
    };

    if !paper {
        if let Err(e) = state
            .orders
            .place_sl_tp_orders(
                &coin,
                side,
                quantity,
                entry_price,
                plan.stop_loss,
                plan.take_profit,
                agent.as_ref(),
            )
            .await
        {
            warn!(symbol = %symbol, error = %e, "protective orders failed after entry");
            state.push_error(format!("sl/tp {symbol}: {e}"), None);
        }
    }

    let trade = TradeRecord {
        id: Uuid::new_v4().to_string(),
        user_wallet: state.control.state().active_user_wallet,
        symbol: symbol.clone(),
        side,
        entry_price,
        quantity,
        leverage,
        stop_loss: plan.stop_loss,
        take_profit: plan.take_profit,
        entry_fee: taker_fee(entry_price, quantity),
        exit_fee: Decimal::ZERO,
        exit_price: None,
        exit_time: None,
        status: TradeStatus::Open,
        gross_pnl: None,
        net_pnl: None,
        confidence: report.total_strength,
        reasoning: format!(
            "{} aligned={} strength={:.0} regime={} rr={:.2}",
            direction_label(side),
            report.aligned_count,
            report.total_strength,
            regime.regime,
            plan.risk_reward
        ),
        timestamp: now,
    };

    if let Err(e) = state.trade_store.upsert(&trade) {
        warn!(symbol = %symbol, error = %e, "failed to persist trade");
    }
    state.control.record_trade_open(&symbol);
    state
        .trailing
        .write()
        .insert(trade.id.clone(), TrailingState::new(entry_price, plan.stop_loss));
    state.push_decision(
        &symbol,
        "commit",
        true,
        trade.reasoning.clone(),
        Some(report.total_strength),
    );

    info!(
        symbol = %symbol,
        side = %side,
        entry = %entry_price,
        qty = %quantity,
        sl = %plan.stop_loss,
        tp = %plan.take_profit,
        leverage,
        strength = report.total_strength,
        paper,
        "trade committed"
    );

    AnalysisOutcome::Traded(trade)
}

fn direction_label(side: crate::types::Side) -> &'static str {
    match side {
        crate::types::Side::Buy => "long",
        crate::types::Side::Sell => "short",
    }
}

/// Heat score: volatility*20 + |momentum5|*15 + trending bonus 10 +
/// log10(volume/1e6)*5. Ties break alphabetically.
pub fn heat_score(closes: &[f64], volume_24h: f64) -> f64 {
    let vol = volatility(closes);
    let mom = momentum(closes, 5).abs();
    let trend = trend_strength(closes);
    let trending_bonus = if trend.direction != TrendDirection::Sideways {
        10.0
    } else {
        0.0
    };
    let volume_term = if volume_24h > 0.0 {
        (volume_24h / 1e6).log10() * 5.0
    } else {
        0.0
    };
    vol * 20.0 + mom * 15.0 + trending_bonus + volume_term
}

fn select_hottest(state: &AppState, bag: &[String]) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for symbol in bag {
        let closes = state.market.closes(symbol);
        if closes.len() < MIN_CLOSES {
            continue;
        }
        let volume = state.market.volume_24h(symbol).to_f64().unwrap_or(0.0);
        let score = heat_score(&closes, volume);
        let replace = match &best {
            None => true,
            Some((best_symbol, best_score)) => {
                score > *best_score || (score == *best_score && symbol < best_symbol)
            }
        };
        if replace {
            best = Some((symbol.clone(), score));
        }
    }
    best.map(|(symbol, _)| symbol)
}

fn effective_leverage(coin: &str, settings: &crate::settings::Settings, vol: f64) -> u32 {
    let mut leverage = clamp_leverage(coin, settings.max_leverage);
    if settings.dynamic_leverage && vol > DYNAMIC_LEVERAGE_VOL_PCT {
        leverage = (leverage / 2).max(1);
    }
    leverage
}

/// Opportunistic volume refresh from the asset-context endpoint; failures
/// are logged at debug and ignored.
async fn refresh_volumes(state: &AppState, bag: &[String]) {
    match state.bridge.info().meta_and_asset_ctxs().await {
        Ok(pairs) => {
            for (meta, ctx) in pairs {
                let symbol = crate::types::perp_symbol(&meta.name);
                if bag.contains(&symbol) {
                    state.market.set_volume_24h(&symbol, ctx.day_volume);
                }
            }
        }
        Err(e) => debug!(error = %e, "volume refresh skipped"),
    }
}

/// Opportunistic equity refresh; the cached value is kept on failure.
async fn refresh_equity(state: &AppState, agent: Option<&crate::types::AgentCredential>) {
    match state.bridge.get_balance(agent).await {
        Ok(balance) if balance.account_value > Decimal::ZERO => {
            *state.equity.write() = balance.account_value;
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, "equity refresh skipped"),
    }
}

/// Mean net PnL of winning (or losing) closed trades, absolute value.
fn trade_average(state: &AppState, wins: bool) -> f64 {
    let trades = state.trade_store.load(0, 1_000);
    let values: Vec<f64> = trades
        .iter()
        .filter(|t| t.status == TradeStatus::Closed)
        .filter_map(|t| t.net_pnl)
        .filter(|p| {
            if wins {
                *p > Decimal::ZERO
            } else {
                *p < Decimal::ZERO
            }
        })
        .filter_map(|p| p.abs().to_f64())
        .collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// =============================================================================
// Scenario Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::control::{ControlPlane, ARM_PHRASE};
    use crate::market_data::{MarketCache, MarketFanout, OrderBook, OrderBookLevel};
    use crate::orders::OrderManager;
    use crate::sentiment::SentimentGate;
    use crate::settings::Settings;
    use crate::store::{
        JsonAgentStore, JsonSettingsStore, JsonTradeStore, AgentStore, SettingsStore,
    };
    use crate::types::{AgentCredential, Side, TradingProfile};
    use crate::venue::signer::mock::MockSigner;
    use crate::venue::{InfoClient, VenueBridge};
    use serde_json::json;
    use std::path::PathBuf;

    // 2024-01-09T14:00:00Z — a Tuesday, inside active session hours.
    const TUESDAY_1400: i64 = 1_704_808_800_000;

    struct Harness {
        state: Arc<AppState>,
        signer: Arc<MockSigner>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn harness(tag: &str, settings: Settings, live: bool) -> Harness {
        let dir = std::env::temp_dir().join(format!("meridian-eng-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let clock = Arc::new(ManualClock::new(TUESDAY_1400));
        let shared_clock: crate::clock::SharedClock = clock;
        let signer = Arc::new(MockSigner::new());
        let bridge = VenueBridge::new(InfoClient::new("http://127.0.0.1:9/info"), signer.clone());
        let control = Arc::new(ControlPlane::new(shared_clock.clone()));

        let settings_store = Arc::new(JsonSettingsStore::open(&dir));
        settings_store.put("0xabc", settings).unwrap();
        let agent_store = Arc::new(JsonAgentStore::open(&dir));

        let configured_network = if live {
            crate::types::EngineMode::Testnet
        } else {
            crate::types::EngineMode::Paper
        };

        let state = Arc::new(AppState {
            clock: shared_clock.clone(),
            settings_store,
            trade_store: Arc::new(JsonTradeStore::open(&dir)),
            agent_store: agent_store.clone(),
            market: Arc::new(MarketCache::new()),
            fanout: MarketFanout::new(),
            bridge: bridge.clone(),
            orders: Arc::new(OrderManager::new(bridge, shared_clock.clone())),
            control: control.clone(),
            sentiment_gate: Arc::new(SentimentGate::new(shared_clock)),
            sentiment_client: None,
            configured_network,
            live_trading_enabled: live,
            trailing: parking_lot::RwLock::new(std::collections::HashMap::new()),
            equity: parking_lot::RwLock::new(dec!(1000)),
            recent_decisions: parking_lot::RwLock::new(Vec::new()),
            recent_errors: parking_lot::RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        });

        control.start("0xabc");
        if live {
            agent_store
                .put(AgentCredential {
                    user_wallet: "0xabc".into(),
                    agent_address: "0xagent".into(),
                    agent_key: "k".into(),
                    agent_name: "test".into(),
                    approved_at: 1,
                })
                .unwrap();
            control
                .arm(
                    ARM_PHRASE,
                    crate::types::EngineMode::Testnet,
                    "0xabc",
                    &crate::control::ArmContext {
                        live_trading_enabled: true,
                        configured_network: crate::types::EngineMode::Testnet,
                        has_agent_credentials: true,
                    },
                )
                .unwrap();
        }

        Harness { state, signer, dir }
    }

    fn bullish_settings() -> Settings {
        Settings {
            profile: TradingProfile::Aggressive,
            trading_bag: vec!["BTC-PERP".into()],
            position_size_pct: 2.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
            use_smart_sltp: false,
            enable_session_filter: false,
            enable_sentiment: false,
            dynamic_leverage: false,
            max_leverage: 5,
            ..Settings::default()
        }
    }

    /// 100 closes forming a clean uptrend ending near `last`.
    fn feed_uptrend(state: &AppState, symbol: &str, last: f64) {
        let start = last - 49.5;
        for i in 0..100 {
            let px = start + i as f64 * 0.5;
            state
                .market
                .record_price(symbol, Decimal::from_f64(px).unwrap(), TUESDAY_1400 + i);
        }
    }

    fn bid_heavy_book(symbol: &str, mid: Decimal) -> OrderBook {
        let spread = mid * dec!(0.0001);
        OrderBook::from_levels(
            symbol,
            vec![
                OrderBookLevel {
                    price: mid - spread,
                    size: dec!(65),
                    num_orders: None,
                },
                OrderBookLevel {
                    price: mid - spread * dec!(2),
                    size: dec!(65),
                    num_orders: None,
                },
            ],
            vec![
                OrderBookLevel {
                    price: mid + spread,
                    size: dec!(35),
                    num_orders: None,
                },
                OrderBookLevel {
                    price: mid + spread * dec!(2),
                    size: dec!(35),
                    num_orders: None,
                },
            ],
            1,
        )
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn confluence_pass_commits_long_with_protective_orders() {
        let h = harness("long", bullish_settings(), true);
        feed_uptrend(&h.state, "BTC-PERP", 50000.0);
        h.state
            .market
            .apply_book(bid_heavy_book("BTC-PERP", dec!(50000)));

        // Live path: book fetch, balance, entry order, cancel_all, SL, TP.
        h.signer.script(
            "orderbook",
            Ok(json!({
                "time": 1,
                "bids": [ { "px": "49997.5", "sz": "65" }, { "px": "49995", "sz": "65" } ],
                "asks": [ { "px": "50002.5", "sz": "35" }, { "px": "50005", "sz": "35" } ]
            })),
        );
        h.signer
            .script("balance", Ok(json!({ "accountValue": "1000" })));
        h.signer
            .script("order", Ok(json!({ "oid": 500, "avgPx": "50001" })));
        h.signer.script("trigger", Ok(json!({ "oid": 501 })));
        h.signer.script("trigger", Ok(json!({ "oid": 502 })));

        let outcome = analyze_tick(&h.state).await;
        let AnalysisOutcome::Traded(trade) = outcome else {
            panic!("expected a trade, got {outcome:?}");
        };

        assert_eq!(trade.side, Side::Buy);
        assert!(trade.confidence >= 50.0);
        assert_eq!(trade.entry_price, dec!(50001));

        // Regime is trending_up: TP 4% x1.5 = +6%, SL 2% x0.8 = -1.6% of the
        // reference mid (50000).
        assert_eq!(trade.take_profit, dec!(53000.0));
        assert_eq!(trade.stop_loss, dec!(49200.0));

        // Order IDs recorded by the order manager.
        let tracked = h.state.orders.tracked("BTC").unwrap();
        assert_eq!(tracked.sl_order_id, Some(501));
        assert_eq!(tracked.tp_order_id, Some(502));

        // Daily stats moved and the trade persisted open.
        assert_eq!(h.state.control.stats().trades_today, 1);
        assert_eq!(h.state.trade_store.open_trades().len(), 1);
        assert_eq!(h.state.trailing.read().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn flat_market_does_not_trade() {
        let h = harness("flat", bullish_settings(), false);
        for i in 0..100 {
            h.state
                .market
                .record_price("BTC-PERP", dec!(50000), TUESDAY_1400 + i);
        }
        h.state
            .market
            .apply_book(bid_heavy_book("BTC-PERP", dec!(50000)));

        let outcome = analyze_tick(&h.state).await;
        match outcome {
            AnalysisOutcome::Skipped { stage, .. } => assert_eq!(stage, "confluence"),
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(h.state.control.stats().trades_today, 0);
        assert!(h.state.trade_store.open_trades().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn volatile_regime_blocks_non_aggressive() {
        let mut settings = bullish_settings();
        settings.profile = TradingProfile::Moderate;
        settings.min_confirmations = 2;
        let h = harness("volatile", settings, false);

        // Uptrend that turns violently two-sided at the end: still plenty of
        // long signals, but the regime reads volatile.
        let mut prices: Vec<f64> = (0..90).map(|i| 50000.0 + i as f64 * 25.0).collect();
        for i in 0..10 {
            prices.push(52250.0 + if i % 2 == 0 { 1200.0 } else { -1200.0 });
        }
        for (i, px) in prices.iter().enumerate() {
            h.state.market.record_price(
                "BTC-PERP",
                Decimal::from_f64(*px).unwrap(),
                TUESDAY_1400 + i as i64,
            );
        }
        h.state
            .market
            .apply_book(bid_heavy_book("BTC-PERP", dec!(52250)));

        let outcome = analyze_tick(&h.state).await;
        match outcome {
            AnalysisOutcome::Skipped { stage, reason } => {
                // Either confluence fails to align in the chop, or the
                // regime gate rejects; the volatile case must never trade.
                assert!(stage == "regime" || stage == "confluence", "stage {stage}");
                if stage == "regime" {
                    assert!(reason.contains("volatile"));
                }
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cooldown_blocks_second_entry_on_same_symbol() {
        let h = harness("cooldown", bullish_settings(), false);
        feed_uptrend(&h.state, "BTC-PERP", 50000.0);
        h.state
            .market
            .apply_book(bid_heavy_book("BTC-PERP", dec!(50000)));

        let outcome = analyze_tick(&h.state).await;
        assert!(matches!(outcome, AnalysisOutcome::Traded(_)));

        // Close the local trade so the position gate does not mask the
        // cooldown.
        let mut trade = h.state.trade_store.open_trades().pop().unwrap();
        trade.close(dec!(50100), dec!(0.01), TUESDAY_1400 + 1);
        h.state.trade_store.upsert(&trade).unwrap();

        let outcome = analyze_tick(&h.state).await;
        match outcome {
            AnalysisOutcome::Skipped { stage, reason } => {
                assert_eq!(stage, "control");
                assert!(reason.contains("cooldown"));
            }
            other => panic!("expected cooldown skip, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn kill_switch_blocks_everything() {
        let h = harness("killed", bullish_settings(), false);
        feed_uptrend(&h.state, "BTC-PERP", 50000.0);
        h.state
            .market
            .apply_book(bid_heavy_book("BTC-PERP", dec!(50000)));
        h.state.control.kill("test kill");

        let outcome = analyze_tick(&h.state).await;
        match outcome {
            AnalysisOutcome::Skipped { stage, reason } => {
                assert_eq!(stage, "control");
                assert!(reason.contains("kill switch"));
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn paper_mode_trades_without_venue_calls() {
        let h = harness("paper", bullish_settings(), false);
        feed_uptrend(&h.state, "BTC-PERP", 50000.0);
        h.state
            .market
            .apply_book(bid_heavy_book("BTC-PERP", dec!(50000)));

        let outcome = analyze_tick(&h.state).await;
        let AnalysisOutcome::Traded(trade) = outcome else {
            panic!("expected paper trade, got {outcome:?}");
        };
        assert_eq!(trade.entry_price, dec!(50000));

        // No order or trigger ever reached the signer.
        assert_eq!(h.signer.call_count("order"), 0);
        assert_eq!(h.signer.call_count("trigger"), 0);
        assert_eq!(h.signer.call_count("orderbook"), 0);
    }

    #[test]
    fn heat_score_prefers_the_mover() {
        let quiet: Vec<f64> = (0..50).map(|i| 100.0 + (i % 2) as f64 * 0.01).collect();
        let mover: Vec<f64> = (0..50).map(|i| 100.0 + i as f64 * 0.8).collect();
        assert!(heat_score(&mover, 5e7) > heat_score(&quiet, 5e7));
        // Volume adds heat.
        assert!(heat_score(&mover, 5e8) > heat_score(&mover, 5e6));
    }
}
