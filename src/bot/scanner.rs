use crate::config::TradingConfig;
use crate::models::{Ticker, TradingPair};

/// Tradability check for a candidate pair
///
/// Returns (is_tradable, reason)
pub fn is_tradable(ticker: &Ticker, pair: &TradingPair) -> (bool, String) {
    if !pair.enabled {
        return (false, "Disabled".to_string());
    }

    // Input validation
    if !(ticker.last > 0.0 && ticker.last.is_finite()) {
        return (false, "InvalidData: Price is invalid".to_string());
    }
    if ticker.quote_volume_24h < 0.0 || !ticker.quote_volume_24h.is_finite() {
        return (
            false,
            "InvalidData: Volume is negative, NaN, or infinite".to_string(),
        );
    }

    if ticker.quote_volume_24h < pair.min_volume {
        return (
            false,
            format!(
                "LowVolume: ${:.0}/24h (min ${:.0})",
                ticker.quote_volume_24h, pair.min_volume
            ),
        );
    }

    (true, format!("Volume ${:.0}/24h", ticker.quote_volume_24h))
}

/// Picks the active pairs out of the configured candidates
pub struct WatchlistScanner {
    candidates: Vec<TradingPair>,
    max_pairs: usize,
}

impl WatchlistScanner {
    pub fn from_config(trading: &TradingConfig) -> Self {
        Self {
            candidates: trading
                .pairs
                .iter()
                .map(|symbol| TradingPair::new(symbol.clone(), trading.min_volume_usdt))
                .collect(),
            max_pairs: trading.max_pairs,
        }
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.iter().map(|p| p.symbol.clone()).collect()
    }

    pub fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    /// Active set before any ticker has arrived: candidates in config order
    pub fn initial(&self) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|p| p.enabled)
            .take(self.max_pairs)
            .map(|p| p.symbol.clone())
            .collect()
    }

    /// Held pairs first, then `others` in order, capped at `max_pairs`
    pub fn pin_held<I>(&self, held: &[String], others: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        if held.len() > self.max_pairs {
            tracing::warn!(
                "⚠️  {} held pairs exceed max_pairs {}, keeping the first {}",
                held.len(),
                self.max_pairs,
                self.max_pairs
            );
        }

        let mut active: Vec<String> = Vec::with_capacity(self.max_pairs);
        for pair in held.iter().cloned().chain(others) {
            if active.len() >= self.max_pairs {
                break;
            }
            if !active.contains(&pair) {
                active.push(pair);
            }
        }
        active
    }

    /// Rank candidates by 24h quote volume.
    ///
    /// Pairs with open positions stay active ahead of ranked ones. Returns
    /// None when no candidate has a ticker yet.
    pub fn rank(&self, tickers: &[Ticker], held: &[String]) -> Option<Vec<String>> {
        let mut ranked: Vec<(&TradingPair, f64)> = Vec::new();
        let mut seen_any = false;

        for pair in &self.candidates {
            let Some(ticker) = tickers.iter().find(|t| t.pair == pair.symbol) else {
                continue;
            };
            seen_any = true;

            let (ok, reason) = is_tradable(ticker, pair);
            if ok {
                tracing::debug!("✅ {} - {}", pair.symbol, reason);
                ranked.push((pair, ticker.quote_volume_24h));
            } else {
                tracing::debug!("❌ {} - {}", pair.symbol, reason);
            }
        }

        if !seen_any {
            return None;
        }

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Some(self.pin_held(held, ranked.into_iter().map(|(pair, _)| pair.symbol.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ticker(pair: &str, volume: f64) -> Ticker {
        Ticker {
            pair: pair.to_string(),
            last: 100.0,
            quote_volume_24h: volume,
            timestamp: Utc::now(),
            latency_ms: 10.0,
        }
    }

    fn scanner(max_pairs: usize) -> WatchlistScanner {
        WatchlistScanner::from_config(&TradingConfig {
            pairs: vec![
                "BTC/USDT".into(),
                "ETH/USDT".into(),
                "SOL/USDT".into(),
                "XRP/USDT".into(),
            ],
            max_pairs,
            min_volume_usdt: 1_000_000.0,
            ..TradingConfig::default()
        })
    }

    #[test]
    fn test_initial_takes_config_order() {
        assert_eq!(scanner(2).initial(), vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn test_rank_by_volume_and_filter_low_volume() {
        let tickers = vec![
            ticker("BTC/USDT", 5e6),
            ticker("ETH/USDT", 9e6),
            ticker("SOL/USDT", 5e5), // below minimum
            ticker("XRP/USDT", 2e6),
        ];

        let active = scanner(2).rank(&tickers, &[]).unwrap();
        assert_eq!(active, vec!["ETH/USDT", "BTC/USDT"]);
    }

    #[test]
    fn test_held_pairs_stay_active() {
        let tickers = vec![
            ticker("BTC/USDT", 5e6),
            ticker("ETH/USDT", 9e6),
            ticker("SOL/USDT", 5e5),
        ];

        let active = scanner(2)
            .rank(&tickers, &["SOL/USDT".to_string()])
            .unwrap();
        assert_eq!(active, vec!["SOL/USDT", "ETH/USDT"]);
    }

    #[test]
    fn test_active_set_never_exceeds_max_pairs() {
        let tickers = vec![
            ticker("BTC/USDT", 5e6),
            ticker("ETH/USDT", 9e6),
            ticker("XRP/USDT", 2e6),
        ];
        let held: Vec<String> = ["BTC/USDT", "ETH/USDT", "SOL/USDT"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let active = scanner(2).rank(&tickers, &held).unwrap();
        assert_eq!(active, vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn test_pin_held_dedups_and_caps() {
        let held = vec!["SOL/USDT".to_string()];
        let others = vec!["SOL/USDT", "BTC/USDT", "ETH/USDT"]
            .into_iter()
            .map(String::from);

        assert_eq!(
            scanner(2).pin_held(&held, others),
            vec!["SOL/USDT", "BTC/USDT"]
        );
    }

    #[test]
    fn test_no_tickers_keeps_current_set() {
        assert_eq!(scanner(2).rank(&[], &[]), None);
    }

    #[test]
    fn test_invalid_ticker_rejected() {
        let pair = TradingPair::new("BTC/USDT", 0.0);
        let mut bad = ticker("BTC/USDT", 1e6);
        bad.last = f64::NAN;

        let (ok, reason) = is_tradable(&bad, &pair);
        assert!(!ok);
        assert!(reason.contains("InvalidData"));
    }
}
