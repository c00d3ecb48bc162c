use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BotContext, RunState};
use crate::errors::BotError;
use crate::execution::{lock_positions, ExitReason};
use crate::market_data::{ConnectionState, MarketUpdate};
use crate::models::SignalAction;

/// Fraction of the drawdown limit at which the risk monitor starts warning
const DRAWDOWN_WARN_RATIO: f64 = 0.75;

/// Ticks every `seconds`, first tick one period from now
fn every(seconds: u64) -> Interval {
    let period = Duration::from_secs(seconds.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Drain the feed queue into the caches
pub(super) async fn market_data_loop(
    ctx: Arc<BotContext>,
    mut updates: mpsc::Receiver<MarketUpdate>,
    shutdown: CancellationToken,
) {
    info!("📡 Market data consumer starting...");

    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => break,
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        match update {
            MarketUpdate::Candle(candle) => {
                ctx.candles.add_candle(candle);
            }
            MarketUpdate::Ticker(ticker) => ctx.tickers.update(ticker),
        }
        ctx.touch();
    }

    debug!("Market data consumer stopped");
}

/// Re-rank candidate pairs and publish the active set
pub(super) async fn scanner_loop(ctx: Arc<BotContext>, shutdown: CancellationToken) {
    info!("🔍 Scanner loop starting...");
    let mut ticker = every(ctx.config.scanner_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let held = lock_positions(&ctx.positions()).open_pairs();
        match ctx.scanner.rank(&ctx.tickers.all(), &held) {
            Some(active) => {
                if ctx.set_active_pairs(active.clone()) {
                    info!("🔍 [SCANNER] Active pairs: {}", active.join(", "));
                } else {
                    debug!("🔍 [SCANNER] Active pairs unchanged");
                }
            }
            None => debug!("🔍 [SCANNER] No tickers yet, keeping current pairs"),
        }
    }
}

pub(super) async fn strategy_loop(ctx: Arc<BotContext>, shutdown: CancellationToken) {
    info!("💹 Strategy loop starting...");
    let mut ticker = every(ctx.config.strategy_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if matches!(ctx.run_state(), RunState::Running | RunState::Paused) {
            run_strategy_cycle(&ctx).await;
        }
    }
}

/// Retry failed exits, then evaluate every active pair
pub(super) async fn run_strategy_cycle(ctx: &BotContext) {
    debug!("💹 [STRATEGY] Tick at {}", Utc::now().format("%H:%M:%S"));
    let prices = ctx.prices();

    let retried = ctx.executor.retry_pending_exits(&prices).await;
    if retried > 0 {
        info!("🔄 Closed {} positions on exit retry", retried);
    }

    let paused = ctx.run_state() == RunState::Paused;

    for pair in ctx.active_pairs() {
        let signal = match ctx.selector.evaluate(&pair, &ctx.candles) {
            Ok(Some(signal)) => signal,
            Ok(None) => continue,
            Err(BotError::InsufficientData { have, need, .. }) => {
                debug!("  {} → Collecting data... ({}/{} needed)", pair, have, need);
                continue;
            }
            Err(e) => {
                warn!("  {} → Failed to generate signal: {}", pair, e);
                ctx.record_error(format!("{}: {}", pair, e));
                continue;
            }
        };

        if !signal.is_actionable() {
            debug!("  {} score {:.3} → hold", pair, signal.score);
            continue;
        }
        if paused && signal.action == SignalAction::Entry {
            debug!("  {} entry ignored while paused", pair);
            continue;
        }

        let Some(&price) = prices.get(&pair) else {
            debug!("  {} has no current price", pair);
            continue;
        };

        match ctx.executor.execute(&signal, price, &ctx.overrides).await {
            Ok(decision) => info!(
                "  {} {:?} (score {:.3}) → {:?} - {}",
                pair, signal.action, signal.score, decision.action, decision.reason
            ),
            Err(e) => {
                error!("  ✗ {} execution failed: {}", pair, e);
                ctx.record_error(format!("{}: {}", pair, e));
            }
        }
    }
}

pub(super) async fn risk_monitor_loop(ctx: Arc<BotContext>, shutdown: CancellationToken) {
    info!("🛡️  Risk monitor starting...");
    let mut ticker = every(ctx.config.risk_check_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        run_risk_check(&ctx).await;
    }
}

/// Mark to market, act on stops and targets, pause or resume on halts
pub(super) async fn run_risk_check(ctx: &BotContext) {
    let prices = ctx.prices();
    let positions = ctx.positions();

    let (triggers, drawdown) = {
        let mut pm = lock_positions(&positions);
        let triggers = pm.mark_to_market(&prices);
        (triggers, pm.risk_state().drawdown())
    };

    for trigger in &triggers {
        if let Err(e) = ctx.executor.handle_trigger(trigger).await {
            error!("  ✗ Failed to close {} on {}: {}", trigger.pair, trigger.reason, e);
            ctx.record_error(format!("{} {}: {}", trigger.pair, trigger.reason, e));
        }
    }

    let halt = lock_positions(&positions).halt();
    let max_drawdown = ctx.config.risk_management.max_drawdown;
    if halt.is_none() && drawdown >= max_drawdown * DRAWDOWN_WARN_RATIO {
        warn!(
            "⚠️  Drawdown {:.1}% approaching limit {:.1}%",
            drawdown * 100.0,
            max_drawdown * 100.0
        );
    }

    match (halt, ctx.run_state()) {
        (Some(trip), RunState::Running) => {
            warn!("🛑 Trading paused: {}", trip);
            ctx.halt_paused.store(true, Ordering::SeqCst);
            ctx.set_run_state(RunState::Paused);

            if ctx.config.close_on_pause {
                let closed = ctx
                    .executor
                    .close_all(ExitReason::CircuitBreaker, &prices)
                    .await;
                info!("Closed {} positions on pause", closed);
            }
        }
        (None, RunState::Paused) if ctx.halt_paused.load(Ordering::SeqCst) => {
            info!("✅ Circuit breaker cleared, resuming trading");
            ctx.halt_paused.store(false, Ordering::SeqCst);
            ctx.set_run_state(RunState::Running);
        }
        _ => {}
    }
}

pub(super) async fn performance_loop(ctx: Arc<BotContext>, shutdown: CancellationToken) {
    let mut ticker = every(ctx.config.performance_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        log_performance_summary(&ctx);
    }
}

fn log_performance_summary(ctx: &BotContext) {
    let status = ctx.status();
    let initial = ctx.config.trading.initial_balance;

    info!("\n📊 Performance Summary:");
    info!("  State: {} ({} mode)", status.state, status.mode);
    info!(
        "  Equity: ${:.2} ({:+.2}%)",
        status.equity,
        (status.equity - initial) / initial * 100.0
    );
    info!(
        "  Trades: {} | Win rate: {}",
        status.total_trades,
        status
            .win_rate()
            .map_or("n/a".to_string(), |w| format!("{:.1}%", w * 100.0))
    );
    info!(
        "  P&L: ${:.2} total, ${:.2} today",
        status.total_pnl, status.daily_pnl
    );
    info!("  Open Positions: {}", status.open_positions);

    let positions = ctx.positions();
    let pm = lock_positions(&positions);
    for position in pm.open_positions() {
        info!(
            "    {} | Entry: ${:.4} | Current: ${:.4} | Stop: ${:.4} | P&L: ${:.2} ({:.2}%)",
            position.pair,
            position.entry_price,
            position.last_price,
            position.stop_loss,
            position.unrealized_pnl(),
            (position.last_price - position.entry_price) / position.entry_price * 100.0
        );
    }

    info!(
        "  Feed: {} updates, {} dropped, {:.1}ms avg latency",
        status.feed.received,
        status.feed.dropped(),
        status.feed.avg_latency_ms
    );
}

pub(super) async fn health_check_loop(ctx: Arc<BotContext>, shutdown: CancellationToken) {
    let mut ticker = every(ctx.config.health_check_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        run_health_check(&ctx);
    }
}

/// Day rollover, feed health and error-list trimming
fn run_health_check(ctx: &BotContext) {
    lock_positions(&ctx.positions()).roll_day(Utc::now().date_naive());

    let connection = *ctx.connection.borrow();
    match connection {
        ConnectionState::Connected => {}
        ConnectionState::Disconnected { fatal: true } => {
            error!("❌ Market feed is down for good");
        }
        other => warn!("⚠️  Market feed {}", other),
    }

    let silent = Utc::now() - ctx.last_update();
    let heartbeat = ctx.config.websocket.heartbeat_timeout;
    if silent.num_milliseconds() as f64 > heartbeat * 1000.0 {
        warn!(
            "⚠️  No market data for {}s",
            silent.num_seconds()
        );
    }

    let stats = ctx.feed_metrics.snapshot();
    debug!(
        "Feed health: {} received, {} oversize, {} queue full, {} errors, {} reconnects",
        stats.received,
        stats.dropped_oversize,
        stats.dropped_queue_full,
        stats.errors,
        stats.reconnects
    );
    if stats.reconnects > 0 {
        debug!(
            "Feed degrades: {} heartbeat timeouts, {} pong timeouts, {} connections lost",
            stats.heartbeat_timeouts, stats.pong_timeouts, stats.connections_lost
        );
    }

    let trimmed = ctx.errors().trim();
    if trimmed > 0 {
        info!("🧹 Trimmed {} old errors", trimmed);
    }
}

pub(super) async fn state_saver_loop(ctx: Arc<BotContext>, shutdown: CancellationToken) {
    let mut ticker = every(ctx.config.state_save_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A failed save is retried on the next tick
        if let Err(e) = ctx.save_state().await {
            warn!("⚠️  State save failed: {}", e);
            ctx.record_error(format!("state save: {}", e));
        }
    }
}
