use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{Candle, Ticker, Timeframe};

type CandleKey = (String, Timeframe);

/// Thread-safe in-memory buffer for candle data
///
/// Maintains a rolling window of candles for each pair and timeframe.
#[derive(Clone)]
pub struct CandleCache {
    data: Arc<RwLock<HashMap<CandleKey, VecDeque<Candle>>>>,
    max_candles: usize,
}

impl CandleCache {
    /// Create a new candle cache
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per pair and timeframe
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles,
        }
    }

    // A panicking writer cannot leave a VecDeque half-updated, so poisoned
    // locks are recovered rather than propagated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CandleKey, VecDeque<Candle>>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CandleKey, VecDeque<Candle>>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a candle
    ///
    /// A candle with the same timestamp as the newest one replaces it (the
    /// bar is still forming); older candles are ignored. Returns whether the
    /// cache changed. If the buffer is full, removes the oldest candle.
    pub fn add_candle(&self, candle: Candle) -> bool {
        let mut data = self.write();

        let series = data
            .entry((candle.pair.clone(), candle.timeframe))
            .or_default();

        match series.back() {
            Some(last) if candle.timestamp < last.timestamp => return false,
            Some(last) if candle.timestamp == last.timestamp => {
                series.pop_back();
            }
            _ => {}
        }

        series.push_back(candle);

        // Remove oldest if exceeds max
        while series.len() > self.max_candles {
            series.pop_front();
        }

        true
    }

    /// Get all candles for a pair and timeframe, oldest first
    pub fn get_candles(&self, pair: &str, timeframe: Timeframe) -> Vec<Candle> {
        self.read()
            .get(&(pair.to_string(), timeframe))
            .map(|deque| deque.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the N most recent candles, oldest first
    pub fn get_recent_candles(&self, pair: &str, timeframe: Timeframe, n: usize) -> Vec<Candle> {
        self.read()
            .get(&(pair.to_string(), timeframe))
            .map(|deque| deque.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest_close(&self, pair: &str, timeframe: Timeframe) -> Option<f64> {
        self.read()
            .get(&(pair.to_string(), timeframe))
            .and_then(|deque| deque.back())
            .map(|c| c.close)
    }

    pub fn candle_count(&self, pair: &str, timeframe: Timeframe) -> usize {
        self.read()
            .get(&(pair.to_string(), timeframe))
            .map(|d| d.len())
            .unwrap_or(0)
    }

    /// Clear all data for a pair (every timeframe)
    pub fn clear_pair(&self, pair: &str) {
        self.write().retain(|(p, _), _| p != pair);
    }
}

/// Latest ticker per pair
#[derive(Clone, Default)]
pub struct TickerCache {
    data: Arc<RwLock<HashMap<String, Ticker>>>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a ticker unless a newer one is already cached
    pub fn update(&self, ticker: Ticker) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        match data.get(&ticker.pair) {
            Some(existing) if existing.timestamp > ticker.timestamp => {}
            _ => {
                data.insert(ticker.pair.clone(), ticker);
            }
        }
    }

    pub fn get(&self, pair: &str) -> Option<Ticker> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(pair).cloned()
    }

    /// Last price, if the ticker is younger than `max_age`
    pub fn fresh_price(&self, pair: &str, max_age: Duration) -> Option<f64> {
        self.get(pair)
            .filter(|t| Utc::now() - t.timestamp <= max_age)
            .map(|t| t.last)
    }

    pub fn all(&self) -> Vec<Ticker> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn create_test_candle(pair: &str, minute: i64, price: f64) -> Candle {
        let base = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Candle {
            pair: pair.to_string(),
            timeframe: Timeframe::M1,
            timestamp: base + Duration::minutes(minute),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_new_cache() {
        let cache = CandleCache::new(100);
        assert_eq!(cache.max_candles, 100);
        assert_eq!(cache.candle_count("BTC/USDT", Timeframe::M1), 0);
    }

    #[test]
    fn test_max_candles_limit() {
        let cache = CandleCache::new(3);

        for i in 0..5 {
            cache.add_candle(create_test_candle("BTC/USDT", i, 100.0 + i as f64));
        }

        let candles = cache.get_candles("BTC/USDT", Timeframe::M1);
        assert_eq!(candles.len(), 3);
        // Oldest evicted
        assert_eq!(candles[0].close, 102.0);
        assert_eq!(candles[2].close, 104.0);
    }

    #[test]
    fn test_forming_bar_replaced() {
        let cache = CandleCache::new(10);
        cache.add_candle(create_test_candle("BTC/USDT", 0, 100.0));
        cache.add_candle(create_test_candle("BTC/USDT", 1, 101.0));
        assert!(cache.add_candle(create_test_candle("BTC/USDT", 1, 101.5)));

        assert_eq!(cache.candle_count("BTC/USDT", Timeframe::M1), 2);
        assert_eq!(cache.latest_close("BTC/USDT", Timeframe::M1), Some(101.5));
    }

    #[test]
    fn test_out_of_order_candle_ignored() {
        let cache = CandleCache::new(10);
        cache.add_candle(create_test_candle("BTC/USDT", 5, 100.0));
        assert!(!cache.add_candle(create_test_candle("BTC/USDT", 3, 90.0)));
        assert_eq!(cache.candle_count("BTC/USDT", Timeframe::M1), 1);
    }

    #[test]
    fn test_timeframes_are_separate() {
        let cache = CandleCache::new(10);
        cache.add_candle(create_test_candle("BTC/USDT", 0, 100.0));
        let mut hourly = create_test_candle("BTC/USDT", 0, 200.0);
        hourly.timeframe = Timeframe::H1;
        cache.add_candle(hourly);

        assert_eq!(cache.latest_close("BTC/USDT", Timeframe::M1), Some(100.0));
        assert_eq!(cache.latest_close("BTC/USDT", Timeframe::H1), Some(200.0));

        cache.clear_pair("BTC/USDT");
        assert_eq!(cache.candle_count("BTC/USDT", Timeframe::H1), 0);
    }

    #[test]
    fn test_get_recent_candles() {
        let cache = CandleCache::new(100);
        for i in 0..10 {
            cache.add_candle(create_test_candle("ETH/USDT", i, 100.0 + i as f64));
        }

        let recent = cache.get_recent_candles("ETH/USDT", Timeframe::M1, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].close, 107.0);
        assert_eq!(recent[2].close, 109.0);
    }

    #[test]
    fn test_ticker_freshness() {
        let tickers = TickerCache::new();
        tickers.update(Ticker {
            pair: "BTC/USDT".into(),
            last: 50_000.0,
            quote_volume_24h: 1e9,
            timestamp: Utc::now() - Duration::seconds(120),
            latency_ms: 10.0,
        });

        assert_eq!(tickers.fresh_price("BTC/USDT", Duration::seconds(60)), None);
        assert_eq!(
            tickers.fresh_price("BTC/USDT", Duration::seconds(300)),
            Some(50_000.0)
        );
    }

    #[test]
    fn test_stale_ticker_does_not_overwrite() {
        let tickers = TickerCache::new();
        let now = Utc::now();
        let ticker = |last: f64, ts| Ticker {
            pair: "BTC/USDT".into(),
            last,
            quote_volume_24h: 1e9,
            timestamp: ts,
            latency_ms: 0.0,
        };

        tickers.update(ticker(2.0, now));
        tickers.update(ticker(1.0, now - Duration::seconds(5)));
        assert_eq!(tickers.get("BTC/USDT").unwrap().last, 2.0);
    }
}
