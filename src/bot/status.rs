use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market_data::{ConnectionState, FeedStats};
use crate::risk::CircuitBreakerTrip;

/// Error list is trimmed once it grows past this
pub const MAX_ERRORS: usize = 100;
/// Entries kept after a trim
pub const KEEP_ERRORS: usize = 50;

/// Bot lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Initializing => "initializing",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Paper => f.write_str("paper"),
            TradingMode::Live => f.write_str("live"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Runtime errors surfaced to the status report
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Vec<ErrorRecord>,
}

impl ErrorLog {
    pub fn push(&mut self, message: impl Into<String>) {
        self.entries.push(ErrorRecord {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Keep the last [`KEEP_ERRORS`] once over [`MAX_ERRORS`].
    /// Returns how many entries were dropped.
    pub fn trim(&mut self) -> usize {
        if self.entries.len() <= MAX_ERRORS {
            return 0;
        }
        let dropped = self.entries.len() - KEEP_ERRORS;
        self.entries.drain(..dropped);
        dropped
    }

    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..].to_vec()
    }

    pub fn entries(&self) -> &[ErrorRecord] {
        &self.entries
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ErrorRecord>) {
        self.entries.extend(records);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Point-in-time view of the bot
#[derive(Debug, Clone)]
pub struct BotStatus {
    pub state: RunState,
    pub mode: TradingMode,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub open_positions: usize,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    pub equity: f64,
    pub halt: Option<CircuitBreakerTrip>,
    pub active_pairs: Vec<String>,
    pub connection: ConnectionState,
    pub feed: FeedStats,
    pub errors: Vec<ErrorRecord>,
}

impl BotStatus {
    pub fn win_rate(&self) -> Option<f64> {
        match self.total_trades {
            0 => None,
            n => Some(self.winning_trades as f64 / n as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_log_trims_to_last_fifty() {
        let mut log = ErrorLog::default();
        for i in 0..MAX_ERRORS {
            log.push(format!("error {}", i));
        }
        assert_eq!(log.trim(), 0);
        assert_eq!(log.len(), MAX_ERRORS);

        log.push("one too many");
        assert_eq!(log.trim(), MAX_ERRORS + 1 - KEEP_ERRORS);
        assert_eq!(log.len(), KEEP_ERRORS);
        assert_eq!(log.entries().last().unwrap().message, "one too many");
        assert_eq!(log.entries()[0].message, "error 51");
    }

    #[test]
    fn test_recent_errors() {
        let mut log = ErrorLog::default();
        assert!(log.recent(10).is_empty());

        for i in 0..15 {
            log.push(format!("error {}", i));
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].message, "error 5");
    }

    #[test]
    fn test_run_state_serde() {
        assert_eq!(serde_json::to_string(&RunState::Paused).unwrap(), "\"paused\"");
        let state: RunState = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(state, RunState::Stopped);
    }
}
