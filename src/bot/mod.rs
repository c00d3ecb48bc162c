// Bot orchestration: shared context, lifecycle and the concurrent loops
mod loops;
pub mod scanner;
pub mod status;

pub use scanner::{is_tradable, WatchlistScanner};
pub use status::{
    BotStatus, ErrorLog, ErrorRecord, RunState, TradingMode, KEEP_ERRORS, MAX_ERRORS,
};

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::errors::{BotError, Result};
use crate::execution::{lock_positions, ExitReason, Executor, OrderGateway, PositionManager};
use crate::market_data::{
    CandleCache, ConnectionState, FeedMetrics, MarketFeed, MarketTransport, MarketUpdate,
    TickerCache,
};
use crate::persistence::{BotState, StateStore};
use crate::risk::{RiskManager, StopOverrides};
use crate::strategy::StrategySelector;

type FeedFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// State shared by every loop
pub(crate) struct BotContext {
    config: BotConfig,
    mode: TradingMode,
    run_state: RwLock<RunState>,
    halt_paused: AtomicBool,
    started_at: DateTime<Utc>,
    last_update: RwLock<DateTime<Utc>>,
    errors: Mutex<ErrorLog>,
    active_pairs: watch::Sender<Vec<String>>,
    candles: CandleCache,
    tickers: TickerCache,
    selector: StrategySelector,
    overrides: StopOverrides,
    executor: Executor,
    scanner: WatchlistScanner,
    store: StateStore,
    feed_metrics: Arc<FeedMetrics>,
    connection: watch::Receiver<ConnectionState>,
}

impl BotContext {
    fn run_state(&self) -> RunState {
        *self.run_state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_run_state(&self, next: RunState) {
        let mut state = self.run_state.write().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            info!("Bot state: {} → {}", *state, next);
            *state = next;
        }
    }

    fn errors(&self) -> MutexGuard<'_, ErrorLog> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_error(&self, message: impl Into<String>) {
        self.errors().push(message);
    }

    fn touch(&self) {
        *self.last_update.write().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    fn last_update(&self) -> DateTime<Utc> {
        *self.last_update.read().unwrap_or_else(|e| e.into_inner())
    }

    fn positions(&self) -> Arc<Mutex<PositionManager>> {
        self.executor.positions()
    }

    fn active_pairs(&self) -> Vec<String> {
        self.active_pairs.borrow().clone()
    }

    /// Replace the active set. Returns whether it changed.
    fn set_active_pairs(&self, pairs: Vec<String>) -> bool {
        if *self.active_pairs.borrow() == pairs {
            return false;
        }

        let previous = self.active_pairs.send_replace(pairs.clone());
        for pair in previous.iter().filter(|p| !pairs.contains(p)) {
            self.candles.clear_pair(pair);
        }
        true
    }

    /// Current price: a fresh ticker, else the latest primary-timeframe close
    fn price(&self, pair: &str) -> Option<f64> {
        let max_age = chrono::Duration::seconds(self.config.market_data.update_interval as i64);
        self.tickers
            .fresh_price(pair, max_age)
            .or_else(|| self.candles.latest_close(pair, self.selector.primary_timeframe()))
    }

    /// Prices for active pairs and every open position
    fn prices(&self) -> HashMap<String, f64> {
        let mut pairs: HashSet<String> = self.active_pairs().into_iter().collect();
        pairs.extend(lock_positions(&self.positions()).open_pairs());

        pairs
            .into_iter()
            .filter_map(|pair| self.price(&pair).map(|price| (pair, price)))
            .collect()
    }

    fn bot_state(&self) -> BotState {
        let portfolio = lock_positions(&self.positions()).snapshot();
        let errors = self.errors().entries().to_vec();
        BotState::new(self.run_state(), portfolio, errors)
    }

    async fn save_state(&self) -> Result<()> {
        let state = self.bot_state();
        self.store.save(&state).await
    }

    fn status(&self) -> BotStatus {
        let positions = self.positions();
        let pm = lock_positions(&positions);
        let risk = pm.risk_state();

        BotStatus {
            state: self.run_state(),
            mode: self.mode,
            start_time: self.started_at,
            last_update: self.last_update(),
            total_trades: risk.stats.total_trades(),
            winning_trades: risk.stats.wins,
            open_positions: risk.open_positions,
            total_pnl: pm.total_pnl(),
            daily_pnl: risk.daily_pnl,
            equity: pm.equity(),
            halt: pm.halt(),
            active_pairs: self.active_pairs(),
            connection: *self.connection.borrow(),
            feed: self.feed_metrics.snapshot(),
            errors: self.errors().entries().to_vec(),
        }
    }
}

/// The trading bot: owns the shared context and the loop tasks
pub struct TradingBot {
    ctx: Arc<BotContext>,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    feed: Option<FeedFuture>,
    updates: Option<mpsc::Receiver<MarketUpdate>>,
}

impl TradingBot {
    pub fn new<T>(
        config: BotConfig,
        mode: TradingMode,
        transport: T,
        gateway: Arc<dyn OrderGateway>,
    ) -> Self
    where
        T: MarketTransport + 'static,
    {
        let timeframes = config.trading.timeframes.clone();
        let selector = StrategySelector::from_config(&config.strategy, timeframes.clone());
        let overrides = StopOverrides::from(config.strategy.signals());

        let risk = RiskManager::new(config.trading.position_size, &config.risk_management);
        let positions = PositionManager::new(
            config.trading.initial_balance,
            risk.circuit_breakers().clone(),
            risk.trailing_stop_distance(),
        );
        let executor = Executor::new(Arc::new(Mutex::new(positions)), risk, gateway);

        let scanner = WatchlistScanner::from_config(&config.trading);
        let (pairs_tx, pairs_rx) = watch::channel(scanner.initial());

        let shutdown = CancellationToken::new();
        let (feed, handle) = MarketFeed::new(transport, &config.websocket, timeframes, pairs_rx);
        let feed = feed.with_watchlist(scanner.candidates());
        let feed: FeedFuture = Box::pin(feed.run(shutdown.clone()));

        let now = Utc::now();
        let ctx = Arc::new(BotContext {
            mode,
            run_state: RwLock::new(RunState::Initializing),
            halt_paused: AtomicBool::new(false),
            started_at: now,
            last_update: RwLock::new(now),
            errors: Mutex::new(ErrorLog::default()),
            active_pairs: pairs_tx,
            candles: CandleCache::new(config.market_data.cache_size),
            tickers: TickerCache::new(),
            selector,
            overrides,
            executor,
            scanner,
            store: StateStore::new(&config.state_file),
            feed_metrics: handle.metrics,
            connection: handle.state,
            config,
        });

        Self {
            ctx,
            shutdown,
            tasks: JoinSet::new(),
            feed: Some(feed),
            updates: Some(handle.updates),
        }
    }

    /// Load saved positions and risk state, then drop positions the
    /// exchange no longer holds. Returns how many were dropped.
    pub async fn restore(&self, saved: BotState) -> Result<usize> {
        info!(
            "📂 Restoring state saved at {} ({} open positions)",
            saved.saved_at,
            saved.portfolio.open_positions.len()
        );

        let positions = self.ctx.positions();
        {
            let mut pm = lock_positions(&positions);
            pm.restore(saved.portfolio);
            pm.roll_day(Utc::now().date_naive());
        }
        self.ctx.errors().extend(saved.errors);

        let dropped = match self.ctx.executor.gateway().live_positions().await {
            Ok(live) => lock_positions(&positions).reconcile(&live).len(),
            Err(e) => {
                warn!("⚠️  Could not reconcile restored positions: {}", e);
                self.ctx
                    .record_error(format!("position reconciliation failed: {}", e));
                0
            }
        };

        // Held pairs must keep receiving data
        let held = lock_positions(&positions).open_pairs();
        let active = self.ctx.scanner.pin_held(&held, self.ctx.active_pairs());
        self.ctx.set_active_pairs(active);

        Ok(dropped)
    }

    /// Spawn the feed and every loop
    pub fn start(&mut self) -> Result<()> {
        let (Some(feed), Some(updates)) = (self.feed.take(), self.updates.take()) else {
            return Err(BotError::Config("bot already started".into()));
        };

        let config = &self.ctx.config;
        info!("🚀 Trading bot starting ({} mode)", self.ctx.mode);
        info!("\n📊 Configuration:");
        info!("  Strategy: {}", config.strategy.name());
        info!("  Initial balance: ${:.2}", config.trading.initial_balance);
        info!("  Position size: {:.1}%", config.trading.position_size * 100.0);
        info!(
            "  Max open positions: {}",
            config.risk_management.max_open_positions
        );
        info!(
            "  Max daily loss: {:.1}%",
            config.risk_management.max_daily_loss * 100.0
        );
        info!(
            "  Max drawdown: {:.1}%",
            config.risk_management.max_drawdown * 100.0
        );
        info!("  Pairs: {}", self.ctx.active_pairs().join(", "));

        {
            let ctx = self.ctx.clone();
            let shutdown = self.shutdown.clone();
            self.tasks.spawn(async move {
                if let Err(e) = feed.await {
                    error!("❌ Market feed stopped: {}", e);
                    ctx.record_error(format!("market feed: {}", e));
                    ctx.set_run_state(RunState::Error);
                    shutdown.cancel();
                }
            });
        }

        self.tasks.spawn(loops::market_data_loop(
            self.ctx.clone(),
            updates,
            self.shutdown.clone(),
        ));
        self.tasks
            .spawn(loops::scanner_loop(self.ctx.clone(), self.shutdown.clone()));
        self.tasks
            .spawn(loops::strategy_loop(self.ctx.clone(), self.shutdown.clone()));
        self.tasks
            .spawn(loops::risk_monitor_loop(self.ctx.clone(), self.shutdown.clone()));
        self.tasks
            .spawn(loops::performance_loop(self.ctx.clone(), self.shutdown.clone()));
        self.tasks
            .spawn(loops::health_check_loop(self.ctx.clone(), self.shutdown.clone()));
        if config.save_state {
            self.tasks
                .spawn(loops::state_saver_loop(self.ctx.clone(), self.shutdown.clone()));
        }

        self.ctx.set_run_state(RunState::Running);
        info!("✅ All loops spawned successfully");
        Ok(())
    }

    pub fn status(&self) -> BotStatus {
        self.ctx.status()
    }

    pub fn executor(&self) -> &Executor {
        &self.ctx.executor
    }

    pub fn candles(&self) -> &CandleCache {
        &self.ctx.candles
    }

    pub fn tickers(&self) -> &TickerCache {
        &self.ctx.tickers
    }

    pub fn active_pairs(&self) -> Vec<String> {
        self.ctx.active_pairs()
    }

    /// Stop opening positions; exits keep working
    pub fn pause(&self) {
        self.ctx.halt_paused.store(false, Ordering::SeqCst);
        self.ctx.set_run_state(RunState::Paused);
    }

    pub fn resume(&self) {
        if self.ctx.run_state() == RunState::Paused {
            self.ctx.halt_paused.store(false, Ordering::SeqCst);
            self.ctx.set_run_state(RunState::Running);
        }
    }

    /// Clear a latched circuit breaker and resume
    pub fn reset_halt(&self) {
        lock_positions(&self.ctx.positions()).reset_halt();
        self.resume();
    }

    /// One strategy pass, as the strategy loop runs it
    pub async fn run_strategy_cycle(&self) {
        loops::run_strategy_cycle(&self.ctx).await;
    }

    /// One risk pass, as the risk monitor runs it
    pub async fn run_risk_check(&self) {
        loops::run_risk_check(&self.ctx).await;
    }

    pub async fn save_state(&self) -> Result<()> {
        self.ctx.save_state().await
    }

    /// Resolves once shutdown has been requested, by a fatal feed error or
    /// by [`TradingBot::shutdown`]
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }

    /// Cooperative shutdown: cancel the loops, give them the grace period,
    /// abort stragglers, optionally close positions, then save.
    pub async fn shutdown(&mut self) -> Result<()> {
        let failed = self.ctx.run_state() == RunState::Error;
        self.ctx.set_run_state(RunState::Stopping);
        info!("🛑 Shutting down...");
        self.shutdown.cancel();

        let shutdown = &self.ctx.config.shutdown;
        let grace = Duration::from_secs(shutdown.grace_period_seconds);
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "⚠️  Loops still running after {}s grace period, aborting",
                grace.as_secs()
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        if shutdown.close_positions_on_shutdown {
            let prices = self.ctx.prices();
            let closed = self
                .ctx
                .executor
                .close_all(ExitReason::Shutdown, &prices)
                .await;
            info!("Closed {} positions on shutdown", closed);
        }

        let saved = if shutdown.save_state_on_shutdown {
            match self.ctx.save_state().await {
                Ok(()) => {
                    info!("💾 State saved to {}", self.ctx.store.path().display());
                    Ok(())
                }
                Err(e) => {
                    error!("❌ Failed to save state on shutdown: {}", e);
                    Err(e)
                }
            }
        } else {
            Ok(())
        };

        self.ctx.set_run_state(if failed {
            RunState::Error
        } else {
            RunState::Stopped
        });
        info!("👋 Trading bot stopped");
        saved
    }
}
