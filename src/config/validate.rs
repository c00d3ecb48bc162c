use super::types::BotConfig;
use crate::errors::{BotError, Result};

/// Validate invariants across the merged config that serde alone cannot enforce.
///
/// Collects every problem before failing so one run reports them all.
pub fn validate_config(config: &BotConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_exchange_config(config, &mut errors);
    validate_trading_config(config, &mut errors);
    validate_strategy_config(config, &mut errors);
    validate_risk_config(config, &mut errors);
    validate_feed_config(config, &mut errors);
    validate_timing_config(config, &mut errors);
    validate_logging_config(config, &mut errors);

    into_result(errors)
}

/// Extra requirements for trading with real funds.
pub fn validate_live_mode(config: &BotConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.exchange.api_key.is_empty() {
        errors.push("exchange.api_key: required for live trading (or set BINANCE_API_KEY)".into());
    }
    if config.exchange.api_secret.is_empty() {
        errors.push(
            "exchange.api_secret: required for live trading (or set BINANCE_API_SECRET)".into(),
        );
    }

    into_result(errors)
}

fn into_result(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }

    Err(BotError::Config(format!(
        "validation failed ({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )))
}

fn check_fraction(name: &str, value: f64, errors: &mut Vec<String>) {
    if !(value > 0.0 && value < 1.0) {
        errors.push(format!("{name}: must be in (0, 1), got {value}"));
    }
}

fn check_positive(name: &str, value: f64, errors: &mut Vec<String>) {
    if !(value > 0.0 && value.is_finite()) {
        errors.push(format!("{name}: must be positive, got {value}"));
    }
}

// ---------------------------------------------------------------------------
// Exchange / trading
// ---------------------------------------------------------------------------

fn validate_exchange_config(config: &BotConfig, errors: &mut Vec<String>) {
    if config.exchange.name.trim().is_empty() {
        errors.push("exchange.name: must not be empty".into());
    }
}

fn validate_trading_config(config: &BotConfig, errors: &mut Vec<String>) {
    let trading = &config.trading;

    if trading.pairs.is_empty() {
        errors.push("trading.pairs: must list at least one pair".into());
    }
    for pair in &trading.pairs {
        let valid = pair
            .split_once('/')
            .is_some_and(|(base, quote)| !base.is_empty() && !quote.is_empty());
        if !valid {
            errors.push(format!("trading.pairs: '{pair}' is not BASE/QUOTE"));
        }
    }

    if trading.max_pairs == 0 {
        errors.push("trading.max_pairs: must be at least 1".into());
    }
    if trading.min_volume_usdt < 0.0 {
        errors.push(format!(
            "trading.min_volume_usdt: must not be negative, got {}",
            trading.min_volume_usdt
        ));
    }
    if !(trading.position_size > 0.0 && trading.position_size <= 1.0) {
        errors.push(format!(
            "trading.position_size: must be in (0, 1], got {}",
            trading.position_size
        ));
    }
    check_positive("trading.initial_balance", trading.initial_balance, errors);

    if trading.timeframes.is_empty() {
        errors.push("trading.timeframes: must list at least one timeframe".into());
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

fn validate_strategy_config(config: &BotConfig, errors: &mut Vec<String>) {
    let signals = config.strategy.signals();

    if signals.short_window == 0 {
        errors.push("strategy.signals.short_window: must be at least 1".into());
    }
    if signals.short_window >= signals.long_window {
        errors.push(format!(
            "strategy.signals: short_window ({}) must be below long_window ({})",
            signals.short_window, signals.long_window
        ));
    }
    if signals.long_window >= signals.trend_window {
        errors.push(format!(
            "strategy.signals: long_window ({}) must be below trend_window ({})",
            signals.long_window, signals.trend_window
        ));
    }

    for (name, value) in [
        ("entry_threshold", signals.entry_threshold),
        ("exit_threshold", signals.exit_threshold),
    ] {
        if !(-1.0..=1.0).contains(&value) {
            errors.push(format!(
                "strategy.signals.{name}: must be in [-1, 1], got {value}"
            ));
        }
    }
    if signals.exit_threshold >= signals.entry_threshold {
        errors.push(format!(
            "strategy.signals: exit_threshold ({}) must be below entry_threshold ({})",
            signals.exit_threshold, signals.entry_threshold
        ));
    }

    if let Some(stop) = signals.stop_loss {
        check_fraction("strategy.signals.stop_loss", stop, errors);
    }
    if let Some(target) = signals.take_profit {
        check_positive("strategy.signals.take_profit", target, errors);
    }

    if let Some(ml) = config.strategy.ml() {
        if !(0.0..=1.0).contains(&ml.ml_confidence_threshold) {
            errors.push(format!(
                "strategy.ml.ml_confidence_threshold: must be in [0, 1], got {}",
                ml.ml_confidence_threshold
            ));
        }
    }

    if config.market_data.cache_size < signals.required_candles() {
        errors.push(format!(
            "market_data.cache_size ({}) cannot hold the {} candles the signal engine needs",
            config.market_data.cache_size,
            signals.required_candles()
        ));
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

fn validate_risk_config(config: &BotConfig, errors: &mut Vec<String>) {
    let risk = &config.risk_management;

    if risk.max_open_positions == 0 {
        errors.push("risk_management.max_open_positions: must be at least 1".into());
    }
    // Every held pair has to fit in the active set
    if risk.max_open_positions > config.trading.max_pairs {
        errors.push(format!(
            "risk_management.max_open_positions ({}) must not exceed trading.max_pairs ({})",
            risk.max_open_positions, config.trading.max_pairs
        ));
    }
    check_fraction("risk_management.default_stop_loss", risk.default_stop_loss, errors);
    check_positive(
        "risk_management.default_take_profit",
        risk.default_take_profit,
        errors,
    );
    if risk.use_trailing_stop {
        check_fraction(
            "risk_management.trailing_stop_distance",
            risk.trailing_stop_distance,
            errors,
        );
    }
    check_fraction("risk_management.max_drawdown", risk.max_drawdown, errors);
    check_fraction("risk_management.max_daily_loss", risk.max_daily_loss, errors);
    if risk.use_kelly_criterion && !(risk.kelly_fraction > 0.0 && risk.kelly_fraction <= 1.0) {
        errors.push(format!(
            "risk_management.kelly_fraction: must be in (0, 1], got {}",
            risk.kelly_fraction
        ));
    }
}

// ---------------------------------------------------------------------------
// Market data feed
// ---------------------------------------------------------------------------

fn validate_feed_config(config: &BotConfig, errors: &mut Vec<String>) {
    let ws = &config.websocket;

    check_positive("websocket.heartbeat_timeout", ws.heartbeat_timeout, errors);
    check_positive("websocket.ping_interval", ws.ping_interval, errors);
    check_positive("websocket.ping_timeout", ws.ping_timeout, errors);
    check_positive("websocket.reconnect_delay", ws.reconnect_delay, errors);
    if ws.max_reconnect_delay < ws.reconnect_delay {
        errors.push(format!(
            "websocket.max_reconnect_delay ({}) must be >= reconnect_delay ({})",
            ws.max_reconnect_delay, ws.reconnect_delay
        ));
    }
    if ws.max_subscriptions_per_second == 0 {
        errors.push("websocket.max_subscriptions_per_second: must be at least 1".into());
    }
    if ws.batch_size == 0 {
        errors.push("websocket.batch_size: must be at least 1".into());
    }
    if !(ws.batch_delay >= 0.0 && ws.batch_delay.is_finite()) {
        errors.push(format!(
            "websocket.batch_delay: must not be negative, got {}",
            ws.batch_delay
        ));
    }
    if ws.max_message_size == 0 {
        errors.push("websocket.max_message_size: must be at least 1 byte".into());
    }
    if ws.max_queue_size == 0 {
        errors.push("websocket.max_queue_size: must be at least 1".into());
    }
}

// ---------------------------------------------------------------------------
// Timing / shutdown
// ---------------------------------------------------------------------------

fn validate_timing_config(config: &BotConfig, errors: &mut Vec<String>) {
    for (name, value) in [
        ("scanner_interval", config.scanner_interval),
        ("strategy_interval", config.strategy_interval),
        ("risk_check_interval", config.risk_check_interval),
        ("performance_interval", config.performance_interval),
        ("health_check_interval", config.health_check_interval),
        ("state_save_interval", config.state_save_interval),
    ] {
        if value == 0 {
            errors.push(format!("{name}: must be at least 1 second"));
        }
    }

    if config.save_state && config.state_file.as_os_str().is_empty() {
        errors.push("state_file: must be set when save_state is on".into());
    }

    let shutdown = &config.shutdown;
    if shutdown.force_kill_after < shutdown.grace_period_seconds {
        errors.push(format!(
            "shutdown.force_kill_after ({}) must be >= grace_period_seconds ({})",
            shutdown.force_kill_after, shutdown.grace_period_seconds
        ));
    }
}

fn validate_logging_config(config: &BotConfig, errors: &mut Vec<String>) {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    let level = config.logging.level.to_ascii_lowercase();
    let level = if level == "warning" { "warn".to_string() } else { level };
    if !LEVELS.contains(&level.as_str()) {
        errors.push(format!(
            "logging.level: unknown level '{}'",
            config.logging.level
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MlParams, SignalParams, StrategyConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&BotConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = BotConfig::default();
        config.trading.pairs = vec!["BTCUSDT".into()];
        config.risk_management.max_daily_loss = 0.0;
        config.strategy_interval = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("3 errors"), "{err}");
        assert!(err.contains("BTCUSDT"));
        assert!(err.contains("max_daily_loss"));
        assert!(err.contains("strategy_interval"));
    }

    #[test]
    fn test_window_ordering() {
        let mut config = BotConfig::default();
        config.strategy = StrategyConfig::MultiSignal {
            signals: SignalParams {
                short_window: 20,
                long_window: 13,
                ..SignalParams::default()
            },
        };

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("short_window"));
    }

    #[test]
    fn test_ml_threshold_range() {
        let mut config = BotConfig::default();
        config.strategy = StrategyConfig::AiEnhanced {
            signals: SignalParams::default(),
            ml: MlParams {
                ml_confidence_threshold: 1.5,
                ..MlParams::default()
            },
        };

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_cache_must_hold_trend_window() {
        let mut config = BotConfig::default();
        config.market_data.cache_size = 30;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("cache_size"));
    }

    #[test]
    fn test_open_positions_must_fit_active_pairs() {
        let mut config = BotConfig::default();
        config.trading.max_pairs = 2;
        config.risk_management.max_open_positions = 3;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("must not exceed trading.max_pairs"), "{err}");

        config.risk_management.max_open_positions = 2;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let mut config = BotConfig::default();
        assert!(validate_live_mode(&config).is_err());

        config.exchange.api_key = "key".into();
        config.exchange.api_secret = "secret".into();
        assert!(validate_live_mode(&config).is_ok());
    }
}
