pub mod types;
pub mod validate;

pub use types::*;
pub use validate::{validate_config, validate_live_mode};

use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::info;

use crate::errors::{BotError, Result};

/// Prefix for environment overrides, e.g.
/// `TRADING_BOT__RISK_MANAGEMENT__MAX_DAILY_LOSS=0.03`.
pub const ENV_PREFIX: &str = "TRADING_BOT";

/// Load the JSON config file, layer environment overrides on top, fill
/// credentials from the environment and validate.
///
/// | Env Var                                 | Config Field                    |
/// |-----------------------------------------|---------------------------------|
/// | `TRADING_BOT__<SECTION>__<KEY>`         | `<section>.<key>`               |
/// | `BINANCE_API_KEY`                       | `exchange.api_key` (when empty) |
/// | `BINANCE_API_SECRET`                    | `exchange.api_secret` (when empty) |
pub fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        return Err(BotError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Json))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: BotConfig = settings.try_deserialize()?;

    apply_credential_fallback(&mut config);
    validate::validate_config(&config)?;

    info!(
        "✓ Loaded config from {} (strategy: {}, {} pairs)",
        path.display(),
        config.strategy.name(),
        config.trading.pairs.len()
    );

    Ok(config)
}

/// Empty credentials fall back to `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
fn apply_credential_fallback(config: &mut BotConfig) {
    if config.exchange.api_key.is_empty() {
        if let Some(key) = env_non_empty("BINANCE_API_KEY") {
            info!("env fallback: BINANCE_API_KEY");
            config.exchange.api_key = key;
        }
    }

    if config.exchange.api_secret.is_empty() {
        if let Some(secret) = env_non_empty("BINANCE_API_SECRET") {
            info!("env fallback: BINANCE_API_SECRET");
            config.exchange.api_secret = secret;
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
