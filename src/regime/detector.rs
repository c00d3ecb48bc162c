/// Market regime classification
///
/// Labels recent price action so the strategy selector can shift its
/// entry/exit thresholds:
/// - Volatile: per-bar return volatility above the volatility threshold
/// - Trending: long MA separated from the trend MA by more than the trend threshold
/// - Ranging: everything else
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::{calculate_return_volatility, calculate_sma};
use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Trending, // Directional move - enter earlier, hold longer
    Ranging,  // Sideways - demand a stronger entry
    Volatile, // Large swings - strict entry, early exit
}

impl MarketRegime {
    /// Threshold shifts `(entry, exit)` applied by the strategy selector.
    pub fn threshold_shift(&self) -> (f64, f64) {
        match self {
            MarketRegime::Trending => (-0.10, -0.10),
            MarketRegime::Ranging => (0.10, 0.0),
            MarketRegime::Volatile => (0.20, 0.10),
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MarketRegime::Trending => "trending",
            MarketRegime::Ranging => "ranging",
            MarketRegime::Volatile => "volatile",
        };
        f.write_str(label)
    }
}

/// Anything that can label a candle series with a regime.
pub trait RegimeClassifier: Send + Sync {
    /// Returns None if there is not enough data to decide.
    fn classify(&self, candles: &[Candle]) -> Option<MarketRegime>;
}

pub struct HeuristicRegimeClassifier {
    long_window: usize,
    trend_window: usize,
    volatility_period: usize,
    volatility_threshold: f64, // stddev of per-bar returns
    trend_threshold: f64,      // |long - trend| / trend
}

impl Default for HeuristicRegimeClassifier {
    fn default() -> Self {
        Self {
            long_window: 13,
            trend_window: 50,
            volatility_period: 20,
            volatility_threshold: 0.03,
            trend_threshold: 0.02,
        }
    }
}

impl HeuristicRegimeClassifier {
    pub fn new(long_window: usize, trend_window: usize) -> Self {
        Self {
            long_window,
            trend_window,
            ..Self::default()
        }
    }

    pub fn with_thresholds(mut self, volatility_threshold: f64, trend_threshold: f64) -> Self {
        self.volatility_threshold = volatility_threshold;
        self.trend_threshold = trend_threshold;
        self
    }
}

impl RegimeClassifier for HeuristicRegimeClassifier {
    fn classify(&self, candles: &[Candle]) -> Option<MarketRegime> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let long = calculate_sma(&closes, self.long_window)?;
        let trend = calculate_sma(&closes, self.trend_window)?;
        if trend <= 0.0 {
            return None;
        }

        // Volatility wins over direction
        let period = self.volatility_period.min(closes.len().saturating_sub(1));
        if let Some(volatility) = calculate_return_volatility(&closes, period) {
            if volatility > self.volatility_threshold {
                return Some(MarketRegime::Volatile);
            }
        }

        let separation = ((long - trend) / trend).abs();
        if separation > self.trend_threshold {
            Some(MarketRegime::Trending)
        } else {
            Some(MarketRegime::Ranging)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;
    use chrono::{Duration, Utc};

    fn candles_from(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                pair: "BTC/USDT".to_string(),
                timeframe: Timeframe::M5,
                timestamp: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_flat_market_is_ranging() {
        let candles = candles_from(&vec![100.0; 60]);
        let regime = HeuristicRegimeClassifier::default().classify(&candles);
        assert_eq!(regime, Some(MarketRegime::Ranging));
    }

    #[test]
    fn test_steady_climb_is_trending() {
        // +0.5% per bar: low volatility, wide MA separation
        let mut closes = Vec::new();
        let mut price = 100.0;
        for _ in 0..60 {
            closes.push(price);
            price *= 1.005;
        }

        let regime = HeuristicRegimeClassifier::default().classify(&candles_from(&closes));
        assert_eq!(regime, Some(MarketRegime::Trending));
    }

    #[test]
    fn test_whipsaw_is_volatile() {
        // Alternating +/-8% bars
        let closes: Vec<f64> = (0..60)
            .map(|i| if i % 2 == 0 { 100.0 } else { 108.0 })
            .collect();

        let regime = HeuristicRegimeClassifier::default().classify(&candles_from(&closes));
        assert_eq!(regime, Some(MarketRegime::Volatile));
    }

    #[test]
    fn test_insufficient_data() {
        let candles = candles_from(&vec![100.0; 20]);
        assert_eq!(HeuristicRegimeClassifier::default().classify(&candles), None);
    }

    #[test]
    fn test_threshold_shifts() {
        assert_eq!(MarketRegime::Trending.threshold_shift(), (-0.10, -0.10));
        assert_eq!(MarketRegime::Ranging.threshold_shift(), (0.10, 0.0));
        assert_eq!(MarketRegime::Volatile.threshold_shift(), (0.20, 0.10));
    }
}
