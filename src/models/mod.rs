use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::BotError;
use crate::regime::MarketRegime;

/// A tradable market, e.g. "BTC/USDT"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingPair {
    pub symbol: String,
    pub min_volume: f64, // Minimum 24h quote volume to stay active
    pub enabled: bool,
}

impl TradingPair {
    pub fn new(symbol: impl Into<String>, min_volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            min_volume,
            enabled: true,
        }
    }

    /// Base asset of the pair ("BTC" for "BTC/USDT")
    pub fn base(&self) -> &str {
        self.symbol.split('/').next().unwrap_or(&self.symbol)
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(BotError::Config(format!("unknown timeframe '{}'", other))),
        }
    }
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub pair: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest ticker snapshot for a pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub pair: String,
    pub last: f64,
    pub quote_volume_24h: f64,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
}

/// What the bot should do with a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalAction {
    Entry,
    Exit,
    Hold,
}

/// Evaluated trading signal for one pair and timeframe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub pair: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub score: f64,              // Composite score in [-1, 1]
    pub confidence: Option<f64>, // ML confidence in [0, 1], when enabled
    pub regime: Option<MarketRegime>,
    pub action: SignalAction,
}

impl Signal {
    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_pair_creation() {
        let pair = TradingPair::new("BTC/USDT", 1_000_000.0);

        assert_eq!(pair.symbol, "BTC/USDT");
        assert_eq!(pair.base(), "BTC");
        assert!(pair.enabled);
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::M5);
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert!("7m".parse::<Timeframe>().is_err());

        assert_eq!(Timeframe::H1.duration(), Duration::hours(1));
        assert_eq!(Timeframe::M15.to_string(), "15m");
    }

    #[test]
    fn test_timeframe_serde_uses_interval_names() {
        let json = serde_json::to_string(&Timeframe::M5).unwrap();
        assert_eq!(json, "\"5m\"");

        let tf: Timeframe = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(tf, Timeframe::D1);
    }

    #[test]
    fn test_hold_signal_is_not_actionable() {
        let signal = Signal {
            pair: "ETH/USDT".to_string(),
            timeframe: Timeframe::M5,
            timestamp: Utc::now(),
            score: 0.1,
            confidence: None,
            regime: None,
            action: SignalAction::Hold,
        };

        assert!(!signal.is_actionable());
    }
}
