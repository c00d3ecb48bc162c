use thiserror::Error;

/// Typed error hierarchy for the trading bot.
///
/// Only `Config` is fatal, and only at startup. Everything else degrades the
/// bot (skip a cycle, drop a message, retry a save). Circuit breaker halts are
/// not errors: they surface as `EntryDecision::Halt`.
#[derive(Error, Debug)]
pub enum BotError {
    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Market data --------------------------------------------------------
    #[error("connection error: {0}")]
    Connection(String),

    #[error("insufficient data for {pair}: {have} candles, need {need}")]
    InsufficientData {
        pair: String,
        have: usize,
        need: usize,
    },

    #[error("invalid market data: {0}")]
    InvalidData(String),

    // -- Execution ----------------------------------------------------------
    #[error("order execution failed for {pair}: {reason}")]
    OrderExecution { pair: String, reason: String },

    #[error("position error: {0}")]
    Position(String),

    // -- Persistence --------------------------------------------------------
    #[error("persistence error: {0}")]
    Persistence(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    ConfigSource(#[from] config::ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Whether the process should stop when this error surfaces.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Config(_) | BotError::ConfigSource(_))
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(BotError::Config("missing exchange.name".into()).is_fatal());
        assert!(!BotError::Connection("reset by peer".into()).is_fatal());
        assert!(!BotError::InsufficientData {
            pair: "BTC/USDT".into(),
            have: 3,
            need: 51,
        }
        .is_fatal());
        assert!(!BotError::Persistence("disk full".into()).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = BotError::InsufficientData {
            pair: "BTC/USDT".into(),
            have: 10,
            need: 50,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data for BTC/USDT: 10 candles, need 50"
        );

        let err = BotError::OrderExecution {
            pair: "ETH/USDT".into(),
            reason: "timeout".into(),
        };
        assert!(err.to_string().contains("ETH/USDT"));
    }
}
