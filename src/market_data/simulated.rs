use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use crate::errors::{BotError, Result};
use crate::market_data::feed::{
    InboundFrame, MarketEvent, MarketTransport, OutboundMessage, Subscription,
};
use crate::models::{Candle, Ticker, Timeframe};

/// Candles replayed on a fresh candle subscription
const DEFAULT_BACKFILL: usize = 120;

/// Random-walk market for paper trading.
///
/// Each pair follows one price path shared by its ticker and candle
/// streams. A candle subscription first replays a backfill of closed
/// candles, then one stream is advanced per tick, round robin.
pub struct SimulatedTransport {
    rng: StdRng,
    tick: Duration,
    interval: Option<Interval>,
    backfill: usize,
    volatility: f64,
    prices: HashMap<String, f64>,
    volumes: HashMap<String, f64>,
    open_candles: HashMap<(String, Timeframe), Candle>,
    streams: Vec<Subscription>,
    cursor: usize,
    queue: VecDeque<InboundFrame>,
}

impl SimulatedTransport {
    /// Create a new simulated market; a seed makes it reproducible
    pub fn new(seed: Option<u64>, tick: Duration) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            rng,
            tick: tick.max(Duration::from_millis(1)),
            interval: None,
            backfill: DEFAULT_BACKFILL,
            volatility: 0.004, // ±0.4% per step
            prices: HashMap::new(),
            volumes: HashMap::new(),
            open_candles: HashMap::new(),
            streams: Vec::new(),
            cursor: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn with_backfill(mut self, candles: usize) -> Self {
        self.backfill = candles;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility.abs();
        self
    }

    fn price(&mut self, pair: &str) -> f64 {
        if let Some(&price) = self.prices.get(pair) {
            return price;
        }
        let base = self.rng.gen_range(1.0..500.0);
        self.prices.insert(pair.to_string(), base);
        base
    }

    /// Advance the pair's price path by one step
    fn step(&mut self, pair: &str) -> f64 {
        let price = self.price(pair);
        let change = price * self.rng.gen_range(-self.volatility..=self.volatility);
        // Keep the walk away from zero
        let next = (price + change).max(price * 0.5);
        self.prices.insert(pair.to_string(), next);
        next
    }

    fn volume(&mut self, pair: &str) -> f64 {
        let base = *self
            .volumes
            .entry(pair.to_string())
            .or_insert_with(|| 1_000_000.0 * (1.0 + (pair.len() % 7) as f64));
        base * self.rng.gen_range(0.8..1.2)
    }

    fn frame(event: MarketEvent) -> InboundFrame {
        let size = match &event {
            MarketEvent::Candle(candle) => serde_json::to_vec(candle).map_or(0, |b| b.len()),
            MarketEvent::Ticker(ticker) => serde_json::to_vec(ticker).map_or(0, |b| b.len()),
            MarketEvent::Pong | MarketEvent::Other => 16,
        };
        InboundFrame { size, event }
    }

    fn queue_backfill(&mut self, pair: &str, timeframe: Timeframe) {
        let step = timeframe.duration();
        let now = align(Utc::now(), step);
        let mut close = self.price(pair);

        // Walk backwards from the current price so history ends where live data starts
        let mut closes = Vec::with_capacity(self.backfill);
        for _ in 0..self.backfill {
            closes.push(close);
            close /= 1.0 + self.rng.gen_range(-self.volatility..=self.volatility);
        }
        closes.reverse();

        let mut open = close;
        for (i, &close) in closes.iter().enumerate() {
            let timestamp = now - step * (self.backfill - i) as i32;
            let wiggle = close * self.volatility * 0.5;
            let candle = Candle {
                pair: pair.to_string(),
                timeframe,
                timestamp,
                open,
                high: open.max(close) + self.rng.gen_range(0.0..=wiggle),
                low: (open.min(close) - self.rng.gen_range(0.0..=wiggle)).max(f64::MIN_POSITIVE),
                close,
                volume: self.volume(pair) / 288.0,
            };
            self.queue.push_back(Self::frame(MarketEvent::Candle(candle)));
            open = close;
        }
    }

    fn next_event(&mut self) -> MarketEvent {
        if self.streams.is_empty() {
            return MarketEvent::Other;
        }

        self.cursor %= self.streams.len();
        let stream = self.streams[self.cursor].clone();
        self.cursor += 1;

        match stream {
            Subscription::Ticker { pair } => {
                let last = self.step(&pair);
                let quote_volume_24h = self.volume(&pair);
                MarketEvent::Ticker(Ticker {
                    pair,
                    last,
                    quote_volume_24h,
                    timestamp: Utc::now(),
                    latency_ms: self.rng.gen_range(5.0..60.0),
                })
            }
            Subscription::Candles { pair, timeframe } => {
                let price = self.step(&pair);
                let volume = self.volume(&pair) / 288.0;
                let timestamp = align(Utc::now(), timeframe.duration());
                let key = (pair.clone(), timeframe);

                let candle = match self.open_candles.get_mut(&key) {
                    Some(candle) if candle.timestamp == timestamp => {
                        candle.high = candle.high.max(price);
                        candle.low = candle.low.min(price);
                        candle.close = price;
                        candle.volume += volume * 0.1;
                        candle.clone()
                    }
                    _ => {
                        let open = self
                            .open_candles
                            .get(&key)
                            .map_or(price, |previous| previous.close);
                        let candle = Candle {
                            pair,
                            timeframe,
                            timestamp,
                            open,
                            high: open.max(price),
                            low: open.min(price),
                            close: price,
                            volume: volume * 0.1,
                        };
                        self.open_candles.insert(key, candle.clone());
                        candle
                    }
                };
                MarketEvent::Candle(candle)
            }
        }
    }
}

/// Start of the interval containing `time`
fn align(time: DateTime<Utc>, step: ChronoDuration) -> DateTime<Utc> {
    time.duration_trunc(step).unwrap_or(time)
}

#[async_trait]
impl MarketTransport for SimulatedTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        tracing::debug!("Simulated market connected ({}ms ticks)", self.tick.as_millis());
        Ok(())
    }

    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.interval.is_none() {
            return Err(BotError::Connection("simulated market not connected".into()));
        }

        match message {
            OutboundMessage::Subscribe(streams) => {
                for stream in streams {
                    if self.streams.contains(&stream) {
                        continue;
                    }
                    if let Subscription::Candles { pair, timeframe } = &stream {
                        self.queue_backfill(pair, *timeframe);
                    }
                    self.streams.push(stream);
                }
            }
            OutboundMessage::Unsubscribe(streams) => {
                self.streams.retain(|s| !streams.contains(s));
                for stream in &streams {
                    if let Subscription::Candles { pair, timeframe } = stream {
                        self.open_candles.remove(&(pair.clone(), *timeframe));
                    }
                }
            }
            OutboundMessage::Ping => self.queue.push_back(Self::frame(MarketEvent::Pong)),
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundFrame>> {
        if let Some(frame) = self.queue.pop_front() {
            return Ok(Some(frame));
        }

        let Some(interval) = self.interval.as_mut() else {
            return Ok(None);
        };
        interval.tick().await;

        let event = self.next_event();
        Ok(Some(Self::frame(event)))
    }

    async fn close(&mut self) {
        self.interval = None;
        self.streams.clear();
        self.open_candles.clear();
        self.queue.clear();
        self.cursor = 0;
    }
}
