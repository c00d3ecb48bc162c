use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::errors::{BotError, Result};
use crate::market_data::connection::{ConnectionMonitor, ConnectionState, DegradeReason};
use crate::market_data::subscriptions::SubscriptionManager;
use crate::models::{Candle, Ticker, Timeframe};

/// Updates slower than this are logged
pub const LATENCY_WARN_MS: f64 = 200.0;

/// One market data stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    Candles { pair: String, timeframe: Timeframe },
    Ticker { pair: String },
}

impl Subscription {
    pub fn pair(&self) -> &str {
        match self {
            Subscription::Candles { pair, .. } | Subscription::Ticker { pair } => pair,
        }
    }
}

/// Streams for a pair: one ticker plus candles on every timeframe
pub fn streams_for(pairs: &[String], timeframes: &[Timeframe]) -> Vec<Subscription> {
    let mut streams = Vec::with_capacity(pairs.len() * (timeframes.len() + 1));
    for pair in pairs {
        streams.push(Subscription::Ticker { pair: pair.clone() });
        for &timeframe in timeframes {
            streams.push(Subscription::Candles {
                pair: pair.clone(),
                timeframe,
            });
        }
    }
    streams
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Subscribe(Vec<Subscription>),
    Unsubscribe(Vec<Subscription>),
    Ping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Candle(Candle),
    Ticker(Ticker),
    Pong,
    /// Acks, heartbeats and anything else the transport does not map
    Other,
}

/// A decoded frame and its size on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub size: usize,
    pub event: MarketEvent,
}

/// What the feed hands to the rest of the bot
#[derive(Debug, Clone, PartialEq)]
pub enum MarketUpdate {
    Candle(Candle),
    Ticker(Ticker),
}

/// Exchange connection. Implementations own the wire protocol.
#[async_trait]
pub trait MarketTransport: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn send(&mut self, message: OutboundMessage) -> Result<()>;

    /// Next frame, or None when the peer closed the connection.
    ///
    /// Must be cancel safe: the feed polls it inside `select!`.
    async fn recv(&mut self) -> Result<Option<InboundFrame>>;

    async fn close(&mut self);
}

/// Feed counters, shared with the health check loop
#[derive(Debug, Default)]
pub struct FeedMetrics {
    received: AtomicU64,
    dropped_oversize: AtomicU64,
    dropped_queue_full: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
    heartbeat_timeouts: AtomicU64,
    pong_timeouts: AtomicU64,
    connections_lost: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedStats {
    pub received: u64,
    pub dropped_oversize: u64,
    pub dropped_queue_full: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub heartbeat_timeouts: u64,
    pub pong_timeouts: u64,
    pub connections_lost: u64,
    pub avg_latency_ms: f64,
}

impl FeedStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_oversize + self.dropped_queue_full
    }
}

impl FeedMetrics {
    fn record_degrade(&self, reason: DegradeReason) {
        let counter = match reason {
            DegradeReason::HeartbeatTimeout => &self.heartbeat_timeouts,
            DegradeReason::PongTimeout => &self.pong_timeouts,
            DegradeReason::ConnectionLost => &self.connections_lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency_ms: f64) {
        let micros = (latency_ms.max(0.0) * 1000.0) as u64;
        self.latency_sum_us.fetch_add(micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStats {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let sum_us = self.latency_sum_us.load(Ordering::Relaxed);
        FeedStats {
            received: self.received.load(Ordering::Relaxed),
            dropped_oversize: self.dropped_oversize.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            pong_timeouts: self.pong_timeouts.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            avg_latency_ms: if samples == 0 {
                0.0
            } else {
                sum_us as f64 / samples as f64 / 1000.0
            },
        }
    }
}

/// Handles the bot keeps after the feed task is spawned
pub struct FeedHandle {
    pub updates: mpsc::Receiver<MarketUpdate>,
    pub state: watch::Receiver<ConnectionState>,
    pub metrics: Arc<FeedMetrics>,
}

/// Market data feed: connection state machine, subscriptions and the
/// bounded inbound queue.
pub struct MarketFeed<T: MarketTransport> {
    transport: T,
    monitor: ConnectionMonitor,
    subscriptions: SubscriptionManager,
    timeframes: Vec<Timeframe>,
    watchlist: Vec<String>,
    max_message_size: usize,
    max_reconnect_attempts: u32,
    health_tick: Duration,
    pairs: watch::Receiver<Vec<String>>,
    pairs_open: bool,
    subscribed: HashSet<Subscription>,
    updates: mpsc::Sender<MarketUpdate>,
    state: watch::Sender<ConnectionState>,
    metrics: Arc<FeedMetrics>,
}

impl<T: MarketTransport> MarketFeed<T> {
    pub fn new(
        transport: T,
        config: &WebSocketConfig,
        timeframes: Vec<Timeframe>,
        pairs: watch::Receiver<Vec<String>>,
    ) -> (Self, FeedHandle) {
        let (updates_tx, updates_rx) = mpsc::channel(config.max_queue_size.max(1));
        let monitor = ConnectionMonitor::new(config);
        let (state_tx, state_rx) = watch::channel(monitor.state());
        let metrics = Arc::new(FeedMetrics::default());

        let feed = Self {
            transport,
            monitor,
            subscriptions: SubscriptionManager::new(config),
            timeframes,
            watchlist: Vec::new(),
            max_message_size: config.max_message_size,
            max_reconnect_attempts: config.max_reconnect_attempts,
            health_tick: (config.ping_timeout().min(config.heartbeat_timeout()) / 4)
                .max(Duration::from_millis(50)),
            pairs,
            pairs_open: true,
            subscribed: HashSet::new(),
            updates: updates_tx,
            state: state_tx,
            metrics: Arc::clone(&metrics),
        };

        let handle = FeedHandle {
            updates: updates_rx,
            state: state_rx,
            metrics,
        };

        (feed, handle)
    }

    /// Pairs that get a ticker stream even while inactive, so the scanner
    /// can rank them
    pub fn with_watchlist(mut self, pairs: Vec<String>) -> Self {
        self.watchlist = pairs;
        self
    }

    fn wanted_streams(&self, pairs: &[String]) -> Vec<Subscription> {
        let mut streams = streams_for(pairs, &self.timeframes);
        for pair in &self.watchlist {
            let ticker = Subscription::Ticker { pair: pair.clone() };
            if !streams.contains(&ticker) {
                streams.push(ticker);
            }
        }
        streams
    }

    fn publish_state(&self) {
        self.state.send_replace(self.monitor.state());
    }

    fn degraded(&self, reason: DegradeReason) {
        warn!("⚠️  Market feed degraded: {}", reason);
        self.metrics.record_degrade(reason);
        self.publish_state();
    }

    fn connection_lost(&mut self) {
        if let Some(reason) = self.monitor.mark_lost() {
            self.metrics.record_degrade(reason);
        }
        self.publish_state();
    }

    fn take_wanted_streams(&mut self) -> Vec<Subscription> {
        let pairs = self.pairs.borrow_and_update().clone();
        self.wanted_streams(&pairs)
    }

    /// Run until cancelled or the reconnect budget is spent.
    ///
    /// Returns `Err(BotError::Connection)` only for the fatal case.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.monitor.begin_connect();
            self.publish_state();

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(()) => {
                    self.monitor.on_connected(Instant::now());
                    self.publish_state();
                    info!("🔌 Market feed connected");

                    self.subscribed.clear();
                    match self.sync_subscriptions(&shutdown).await {
                        Ok(()) => self.pump(&shutdown).await,
                        Err(e) => {
                            warn!("⚠️  Subscription failed: {}", e);
                            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                            self.connection_lost();
                        }
                    }

                    self.transport.close().await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("⚠️  Market feed connect failed: {}", e);
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            match self.monitor.schedule_reconnect() {
                Some(delay) => {
                    self.publish_state();
                    self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "🔄 Reconnecting in {:.1}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        self.monitor.attempts(),
                        self.max_reconnect_attempts
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    self.publish_state();
                    error!(
                        "❌ Market feed gave up after {} reconnect attempts",
                        self.max_reconnect_attempts
                    );
                    return Err(BotError::Connection(format!(
                        "exceeded {} reconnect attempts",
                        self.max_reconnect_attempts
                    )));
                }
            }
        }

        self.monitor.close();
        self.publish_state();
        info!("Market feed stopped");
        Ok(())
    }

    /// Read frames until the connection degrades or shutdown fires
    async fn pump(&mut self, shutdown: &CancellationToken) {
        let mut health = tokio::time::interval(self.health_tick);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,

                _ = health.tick() => {
                    let now = Instant::now();
                    if let Some(reason) = self.monitor.check_health(now) {
                        self.degraded(reason);
                        return;
                    }
                    if self.monitor.should_ping(now) {
                        if let Err(e) = self.transport.send(OutboundMessage::Ping).await {
                            warn!("⚠️  Ping failed: {}", e);
                            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                            self.connection_lost();
                            return;
                        }
                        self.monitor.on_ping_sent(now);
                    }
                }

                changed = self.pairs.changed(), if self.pairs_open => {
                    if changed.is_err() {
                        self.pairs_open = false;
                        continue;
                    }
                    match self.resync_watched(shutdown, &mut health).await {
                        Ok(None) => {}
                        Ok(Some(reason)) => {
                            self.degraded(reason);
                            return;
                        }
                        Err(e) => {
                            warn!("⚠️  Resubscribe failed: {}", e);
                            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                            self.connection_lost();
                            return;
                        }
                    }
                }

                frame = self.transport.recv() => match frame {
                    Ok(Some(frame)) => self.handle_frame(frame),
                    Ok(None) => {
                        warn!("⚠️  Market feed closed by peer");
                        self.connection_lost();
                        return;
                    }
                    Err(e) => {
                        warn!("⚠️  Market feed read error: {}", e);
                        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                        self.connection_lost();
                        return;
                    }
                },
            }
        }
    }

    /// Bring the live subscriptions in line with the active pairs
    async fn sync_subscriptions(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let wanted = self.take_wanted_streams();
        sync_streams(
            &mut self.transport,
            &self.subscriptions,
            &mut self.subscribed,
            wanted,
            shutdown,
        )
        .await
    }

    /// Resubscribe on a live connection without pausing health checks.
    ///
    /// Returns the degrade reason if the connection went bad first; the
    /// unfinished resubscribe is dropped with it.
    async fn resync_watched(
        &mut self,
        shutdown: &CancellationToken,
        health: &mut Interval,
    ) -> Result<Option<DegradeReason>> {
        let wanted = self.take_wanted_streams();
        let sync = sync_streams(
            &mut self.transport,
            &self.subscriptions,
            &mut self.subscribed,
            wanted,
            shutdown,
        );
        tokio::pin!(sync);

        loop {
            tokio::select! {
                result = &mut sync => return result.map(|()| None),
                _ = health.tick() => {
                    if let Some(reason) = self.monitor.check_health(Instant::now()) {
                        return Ok(Some(reason));
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        let now = Instant::now();
        self.monitor.on_message(now);

        if frame.size > self.max_message_size {
            self.metrics.dropped_oversize.fetch_add(1, Ordering::Relaxed);
            warn!(
                "⚠️  Dropped {} byte frame (limit {})",
                frame.size, self.max_message_size
            );
            return;
        }

        match frame.event {
            MarketEvent::Pong => self.monitor.on_pong(now),
            MarketEvent::Other => {}
            MarketEvent::Candle(candle) => self.enqueue(MarketUpdate::Candle(candle)),
            MarketEvent::Ticker(ticker) => {
                self.metrics.record_latency(ticker.latency_ms);
                if ticker.latency_ms > LATENCY_WARN_MS {
                    warn!(
                        "🐢 High latency on {}: {:.0}ms",
                        ticker.pair, ticker.latency_ms
                    );
                }
                self.enqueue(MarketUpdate::Ticker(ticker));
            }
        }
    }

    fn enqueue(&self, update: MarketUpdate) {
        match self.updates.try_send(update) {
            Ok(()) => {
                self.metrics.received.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                debug!("Inbound queue full, update dropped");
            }
            // Consumer gone, nothing to deliver to
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Unsubscribe streams no longer wanted, then subscribe the missing ones
/// in `ordered` order
async fn sync_streams<T>(
    transport: &mut T,
    subscriptions: &SubscriptionManager,
    subscribed: &mut HashSet<Subscription>,
    ordered: Vec<Subscription>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    T: MarketTransport + ?Sized,
{
    let wanted: HashSet<Subscription> = ordered.iter().cloned().collect();

    let stale: Vec<Subscription> = subscribed.difference(&wanted).cloned().collect();
    if !stale.is_empty() {
        transport
            .send(OutboundMessage::Unsubscribe(stale.clone()))
            .await?;
        for s in &stale {
            subscribed.remove(s);
        }
    }

    let fresh: Vec<Subscription> = ordered
        .into_iter()
        .filter(|s| !subscribed.contains(s))
        .collect();
    if !fresh.is_empty() {
        debug!(
            "📡 Subscribing {} streams at up to {}/s",
            fresh.len(),
            subscriptions.per_second()
        );
        let sent = subscriptions.subscribe(transport, &fresh, shutdown).await?;
        subscribed.extend(fresh.into_iter().take(sent));
        debug!("📡 {} streams active", subscribed.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: connect results are consumed in order, frames are
    /// served until the script runs out, then the connection idles.
    #[derive(Default)]
    struct ScriptedTransport {
        connects: VecDeque<bool>,
        frames: VecDeque<Option<InboundFrame>>,
        sent: Arc<Mutex<Vec<OutboundMessage>>>,
        connect_calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl MarketTransport for ScriptedTransport {
        async fn connect(&mut self) -> Result<()> {
            *self.connect_calls.lock().unwrap() += 1;
            if self.connects.pop_front().unwrap_or(false) {
                Ok(())
            } else {
                Err(BotError::Connection("refused".into()))
            }
        }

        async fn send(&mut self, message: OutboundMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<InboundFrame>> {
            match self.frames.pop_front() {
                Some(frame) => Ok(frame),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    fn fast_config(max_attempts: u32) -> WebSocketConfig {
        WebSocketConfig {
            max_reconnect_attempts: max_attempts,
            reconnect_delay: 0.01,
            max_reconnect_delay: 0.02,
            batch_delay: 0.0,
            max_subscriptions_per_second: 100,
            batch_size: 100,
            max_queue_size: 2,
            max_message_size: 1_000,
            ..WebSocketConfig::default()
        }
    }

    fn ticker_frame(pair: &str, size: usize, latency_ms: f64) -> Option<InboundFrame> {
        Some(InboundFrame {
            size,
            event: MarketEvent::Ticker(Ticker {
                pair: pair.to_string(),
                last: 100.0,
                quote_volume_24h: 1e6,
                timestamp: Utc::now(),
                latency_ms,
            }),
        })
    }

    #[tokio::test]
    async fn test_gives_up_after_max_reconnects() {
        let calls = Arc::new(Mutex::new(0));
        let transport = ScriptedTransport {
            connect_calls: Arc::clone(&calls),
            ..ScriptedTransport::default()
        };
        let config = fast_config(5);
        let (_pairs_tx, pairs_rx) = watch::channel(vec!["BTC/USDT".to_string()]);
        let (feed, handle) = MarketFeed::new(transport, &config, vec![Timeframe::M5], pairs_rx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            feed.run(CancellationToken::new()),
        )
        .await
        .expect("feed must not retry forever");

        assert!(matches!(result, Err(BotError::Connection(_))));
        assert_eq!(*calls.lock().unwrap(), 6); // initial + 5 reconnects
        assert_eq!(
            *handle.state.borrow(),
            ConnectionState::Disconnected { fatal: true }
        );
    }

    #[tokio::test]
    async fn test_drops_oversize_and_overflow() {
        let transport = ScriptedTransport {
            connects: VecDeque::from(vec![true]),
            frames: VecDeque::from(vec![
                ticker_frame("BTC/USDT", 10, 5.0),
                ticker_frame("BTC/USDT", 5_000, 5.0), // too large
                ticker_frame("BTC/USDT", 10, 300.0),
                ticker_frame("BTC/USDT", 10, 5.0), // queue full (capacity 2)
            ]),
            ..ScriptedTransport::default()
        };
        let sent = Arc::clone(&transport.sent);
        let config = fast_config(5);
        let (_pairs_tx, pairs_rx) = watch::channel(vec!["BTC/USDT".to_string()]);
        let (feed, mut handle) =
            MarketFeed::new(transport, &config, vec![Timeframe::M5], pairs_rx);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(feed.run(shutdown.clone()));

        // Let the scripted frames drain
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let stats = handle.metrics.snapshot();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dropped_oversize, 1);
        assert_eq!(stats.dropped_queue_full, 1);
        assert!((stats.avg_latency_ms - (5.0 + 300.0 + 5.0) / 3.0).abs() < 1e-6);

        assert!(handle.updates.recv().await.is_some());
        assert!(handle.updates.recv().await.is_some());

        // Ticker + one timeframe
        let sent = sent.lock().unwrap();
        assert!(sent.iter().any(|m| matches!(m, OutboundMessage::Subscribe(s) if s.len() == 2)));
    }

    #[tokio::test]
    async fn test_resubscribes_when_pairs_change() {
        let transport = ScriptedTransport {
            connects: VecDeque::from(vec![true]),
            ..ScriptedTransport::default()
        };
        let sent = Arc::clone(&transport.sent);
        let config = fast_config(5);
        let (pairs_tx, pairs_rx) = watch::channel(vec!["BTC/USDT".to_string()]);
        let (feed, _handle) = MarketFeed::new(transport, &config, vec![Timeframe::M5], pairs_rx);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(feed.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        pairs_tx.send_replace(vec!["ETH/USDT".to_string()]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let sent = sent.lock().unwrap();
        let unsubscribed: Vec<&Subscription> = sent
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Unsubscribe(s) => Some(s),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(unsubscribed.len(), 2);
        assert!(unsubscribed.iter().all(|s| s.pair() == "BTC/USDT"));

        let eth_subscribed = sent.iter().any(|m| {
            matches!(m, OutboundMessage::Subscribe(s) if s.iter().all(|x| x.pair() == "ETH/USDT"))
        });
        assert!(eth_subscribed);
    }

    #[tokio::test]
    async fn test_watchlist_pairs_get_ticker_only() {
        let transport = ScriptedTransport {
            connects: VecDeque::from(vec![true]),
            ..ScriptedTransport::default()
        };
        let sent = Arc::clone(&transport.sent);
        let config = fast_config(5);
        let (_pairs_tx, pairs_rx) = watch::channel(vec!["BTC/USDT".to_string()]);
        let (feed, _handle) = MarketFeed::new(transport, &config, vec![Timeframe::M5], pairs_rx);
        let feed = feed.with_watchlist(vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(feed.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let sent = sent.lock().unwrap();
        let subscribed: Vec<&Subscription> = sent
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Subscribe(s) => Some(s),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(subscribed.len(), 3);
        assert!(subscribed.contains(&&Subscription::Ticker {
            pair: "ETH/USDT".into()
        }));
        assert!(!subscribed
            .iter()
            .any(|s| matches!(s, Subscription::Candles { pair, .. } if pair == "ETH/USDT")));
    }

    #[tokio::test]
    async fn test_peer_close_counts_as_connection_lost() {
        let transport = ScriptedTransport {
            connects: VecDeque::from(vec![true]),
            frames: VecDeque::from(vec![None]),
            ..ScriptedTransport::default()
        };
        let config = fast_config(2);
        let (_pairs_tx, pairs_rx) = watch::channel(vec!["BTC/USDT".to_string()]);
        let (feed, handle) = MarketFeed::new(transport, &config, vec![Timeframe::M5], pairs_rx);

        let result = tokio::time::timeout(Duration::from_secs(5), feed.run(CancellationToken::new()))
            .await
            .unwrap();
        assert!(result.is_err());

        let stats = handle.metrics.snapshot();
        assert_eq!(stats.connections_lost, 1);
        assert_eq!(stats.heartbeat_timeouts, 0);
    }

    #[tokio::test]
    async fn test_health_checked_during_throttled_resubscribe() {
        let transport = ScriptedTransport {
            connects: VecDeque::from(vec![true]),
            ..ScriptedTransport::default()
        };
        let config = WebSocketConfig {
            max_subscriptions_per_second: 1,
            batch_subscriptions: false,
            heartbeat_timeout: 0.2,
            ping_interval: 60.0,
            ping_timeout: 10.0,
            ..fast_config(2)
        };
        let (pairs_tx, pairs_rx) = watch::channel(Vec::new());
        let (feed, handle) = MarketFeed::new(transport, &config, vec![Timeframe::M5], pairs_rx);
        let task = tokio::spawn(feed.run(CancellationToken::new()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Ten streams at one per second
        let pairs: Vec<String> = (0..5).map(|i| format!("P{i}/USDT")).collect();
        pairs_tx.send_replace(pairs);

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("heartbeat must be checked while subscriptions are throttled")
            .unwrap();
        assert!(result.is_err());
        assert_eq!(handle.metrics.snapshot().heartbeat_timeouts, 1);
    }

    #[test]
    fn test_streams_for() {
        let streams = streams_for(
            &["BTC/USDT".to_string()],
            &[Timeframe::M5, Timeframe::H1],
        );
        assert_eq!(streams.len(), 3);
        assert_eq!(streams[0], Subscription::Ticker { pair: "BTC/USDT".into() });
    }
}
