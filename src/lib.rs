// Core modules
pub mod bot;
pub mod config;
pub mod errors;
pub mod execution;
pub mod indicators;
pub mod logging;
pub mod market_data;
pub mod models;
pub mod persistence;
pub mod regime;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use bot::{BotStatus, RunState, TradingBot, TradingMode};
pub use config::BotConfig;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub use errors::{BotError, Result};
