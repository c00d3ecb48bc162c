use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::Timeframe;

/// Fully merged bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk_management: RiskConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,

    // -- Loop intervals (seconds) -------------------------------------------
    #[serde(default = "default_scanner_interval")]
    pub scanner_interval: u64,
    #[serde(default = "default_strategy_interval")]
    pub strategy_interval: u64,
    #[serde(default = "default_risk_check_interval")]
    pub risk_check_interval: u64,
    #[serde(default = "default_performance_interval")]
    pub performance_interval: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,

    // -- State persistence --------------------------------------------------
    #[serde(default = "default_true")]
    pub save_state: bool,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_state_save_interval")]
    pub state_save_interval: u64,

    /// Close every open position when a circuit breaker pauses trading.
    #[serde(default)]
    pub close_on_pause: bool,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            trading: TradingConfig::default(),
            strategy: StrategyConfig::MultiSignal {
                signals: SignalParams::default(),
            },
            risk_management: RiskConfig::default(),
            market_data: MarketDataConfig::default(),
            websocket: WebSocketConfig::default(),
            scanner_interval: default_scanner_interval(),
            strategy_interval: default_strategy_interval(),
            risk_check_interval: default_risk_check_interval(),
            performance_interval: default_performance_interval(),
            health_check_interval: default_health_check_interval(),
            save_state: true,
            state_file: default_state_file(),
            state_save_interval: default_state_save_interval(),
            close_on_pause: false,
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub testnet: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: "binance".to_string(),
            testnet: true,
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

impl ExchangeConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

// Credentials never reach the logs.
impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("name", &self.name)
            .field("testnet", &self.testnet)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

// ---------------------------------------------------------------------------
// Trading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub pairs: Vec<String>,
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
    #[serde(default = "default_min_volume_usdt")]
    pub min_volume_usdt: f64,
    /// Fraction of capital committed per position.
    #[serde(default = "default_position_size")]
    pub position_size: f64,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// First entry drives decisions; the rest confirm.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            pairs: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            max_pairs: default_max_pairs(),
            min_volume_usdt: default_min_volume_usdt(),
            position_size: default_position_size(),
            initial_balance: default_initial_balance(),
            timeframes: default_timeframes(),
        }
    }
}

impl TradingConfig {
    pub fn primary_timeframe(&self) -> Timeframe {
        self.timeframes.first().copied().unwrap_or(Timeframe::M5)
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Strategy variant, tagged by `name` in the JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum StrategyConfig {
    MultiSignal {
        #[serde(default)]
        signals: SignalParams,
    },
    AiEnhanced {
        #[serde(default)]
        signals: SignalParams,
        #[serde(default)]
        ml: MlParams,
    },
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::MultiSignal { .. } => "multi_signal",
            StrategyConfig::AiEnhanced { .. } => "ai_enhanced",
        }
    }

    pub fn signals(&self) -> &SignalParams {
        match self {
            StrategyConfig::MultiSignal { signals } => signals,
            StrategyConfig::AiEnhanced { signals, .. } => signals,
        }
    }

    pub fn ml(&self) -> Option<&MlParams> {
        match self {
            StrategyConfig::MultiSignal { .. } => None,
            StrategyConfig::AiEnhanced { ml, .. } => Some(ml),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalParams {
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    #[serde(default = "default_long_window")]
    pub long_window: usize,
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
    /// Per-strategy override of `risk_management.default_stop_loss`.
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Per-strategy override of `risk_management.default_take_profit`.
    #[serde(default)]
    pub take_profit: Option<f64>,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            short_window: default_short_window(),
            long_window: default_long_window(),
            trend_window: default_trend_window(),
            min_data_points: default_min_data_points(),
            entry_threshold: default_entry_threshold(),
            exit_threshold: default_exit_threshold(),
            stop_loss: None,
            take_profit: None,
        }
    }
}

impl SignalParams {
    /// Candles needed before the engine will score anything.
    pub fn required_candles(&self) -> usize {
        let longest = self.short_window.max(self.long_window).max(self.trend_window);
        // +1 so the previous short MA exists for the momentum term
        self.min_data_points.max(longest + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlParams {
    #[serde(default = "default_true")]
    pub use_ml: bool,
    #[serde(default = "default_ml_confidence_threshold")]
    pub ml_confidence_threshold: f64,
    #[serde(default = "default_true")]
    pub adapt_to_regime: bool,
}

impl Default for MlParams {
    fn default() -> Self {
        Self {
            use_ml: true,
            ml_confidence_threshold: default_ml_confidence_threshold(),
            adapt_to_regime: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_stop_loss")]
    pub default_stop_loss: f64,
    #[serde(default = "default_take_profit")]
    pub default_take_profit: f64,
    #[serde(default = "default_true")]
    pub use_trailing_stop: bool,
    #[serde(default = "default_trailing_stop_distance")]
    pub trailing_stop_distance: f64,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default)]
    pub use_kelly_criterion: bool,
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    #[serde(default = "default_kelly_min_trades")]
    pub kelly_min_trades: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            default_stop_loss: default_stop_loss(),
            default_take_profit: default_take_profit(),
            use_trailing_stop: true,
            trailing_stop_distance: default_trailing_stop_distance(),
            max_drawdown: default_max_drawdown(),
            max_daily_loss: default_max_daily_loss(),
            use_kelly_criterion: false,
            kelly_fraction: default_kelly_fraction(),
            kelly_min_trades: default_kelly_min_trades(),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data / websocket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Candles kept per pair and timeframe.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Seconds after which a ticker is considered stale.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            update_interval: default_update_interval(),
        }
    }
}

/// Websocket tuning. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: f64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: f64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: f64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: f64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay: f64,
    #[serde(default = "default_max_subscriptions_per_second")]
    pub max_subscriptions_per_second: u32,
    #[serde(default = "default_true")]
    pub batch_subscriptions: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay")]
    pub batch_delay: f64,
    /// Bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: default_heartbeat_timeout(),
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_delay: default_max_reconnect_delay(),
            max_subscriptions_per_second: default_max_subscriptions_per_second(),
            batch_subscriptions: true,
            batch_size: default_batch_size(),
            batch_delay: default_batch_delay(),
            max_message_size: default_max_message_size(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl WebSocketConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_timeout)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_reconnect_delay)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs_f64(self.batch_delay)
    }
}

// ---------------------------------------------------------------------------
// Shutdown / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
    #[serde(default = "default_force_kill_after")]
    pub force_kill_after: u64,
    #[serde(default)]
    pub close_positions_on_shutdown: bool,
    #[serde(default = "default_true")]
    pub save_state_on_shutdown: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: default_grace_period(),
            force_kill_after: default_force_kill_after(),
            close_positions_on_shutdown: false,
            save_state_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}
fn default_scanner_interval() -> u64 {
    300
}
fn default_strategy_interval() -> u64 {
    60
}
fn default_risk_check_interval() -> u64 {
    30
}
fn default_performance_interval() -> u64 {
    300
}
fn default_health_check_interval() -> u64 {
    60
}
fn default_state_file() -> PathBuf {
    PathBuf::from("data/bot_state.json")
}
fn default_state_save_interval() -> u64 {
    300
}
fn default_max_pairs() -> usize {
    10
}
fn default_min_volume_usdt() -> f64 {
    1_000_000.0
}
fn default_position_size() -> f64 {
    0.02
}
fn default_initial_balance() -> f64 {
    10_000.0
}
fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M5, Timeframe::H1]
}
fn default_short_window() -> usize {
    5
}
fn default_long_window() -> usize {
    13
}
fn default_trend_window() -> usize {
    50
}
fn default_min_data_points() -> usize {
    50
}
fn default_entry_threshold() -> f64 {
    0.5
}
fn default_exit_threshold() -> f64 {
    -0.3
}
fn default_ml_confidence_threshold() -> f64 {
    0.65
}
fn default_max_open_positions() -> usize {
    3
}
fn default_stop_loss() -> f64 {
    0.02
}
fn default_take_profit() -> f64 {
    0.04
}
fn default_trailing_stop_distance() -> f64 {
    0.015
}
fn default_max_drawdown() -> f64 {
    0.20
}
fn default_max_daily_loss() -> f64 {
    0.05
}
fn default_kelly_fraction() -> f64 {
    0.5
}
fn default_kelly_min_trades() -> u32 {
    20
}
fn default_cache_size() -> usize {
    500
}
fn default_update_interval() -> u64 {
    60
}
fn default_heartbeat_timeout() -> f64 {
    30.0
}
fn default_ping_interval() -> f64 {
    20.0
}
fn default_ping_timeout() -> f64 {
    10.0
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay() -> f64 {
    1.0
}
fn default_max_reconnect_delay() -> f64 {
    60.0
}
fn default_max_subscriptions_per_second() -> u32 {
    5
}
fn default_batch_size() -> usize {
    5
}
fn default_batch_delay() -> f64 {
    1.0
}
fn default_max_message_size() -> usize {
    1_048_576
}
fn default_max_queue_size() -> usize {
    10_000
}
fn default_grace_period() -> u64 {
    30
}
fn default_force_kill_after() -> u64 {
    60
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_file() -> PathBuf {
    PathBuf::from("logs/trading_bot.log")
}
