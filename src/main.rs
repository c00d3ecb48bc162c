use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use trading_bot::config::{load_config, validate_live_mode};
use trading_bot::execution::PaperGateway;
use trading_bot::logging::init_tracing;
use trading_bot::market_data::SimulatedTransport;
use trading_bot::persistence::StateStore;
use trading_bot::{BotError, RunState, TradingBot, TradingMode};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "trading-bot",
    about = "Multi-signal crypto trading bot with risk management",
    version
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config/config.json")]
    config: PathBuf,

    /// Trade with real funds (default is paper trading)
    #[arg(long, default_value_t = false)]
    live: bool,

    /// Override the state file from the configuration
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long, default_value_t = false)]
    check_config: bool,

    /// Seed for the simulated paper market
    #[arg(long)]
    seed: Option<u64>,

    /// Milliseconds between simulated market updates
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(path) = cli.state_file {
        config.state_file = path;
    }

    if cli.check_config {
        if cli.live {
            validate_live_mode(&config)?;
        }
        println!("✓ Configuration valid: {}", cli.config.display());
        println!("  Strategy: {}", config.strategy.name());
        println!("  Pairs: {}", config.trading.pairs.join(", "));
        return Ok(());
    }

    let _log_guard = init_tracing(&config.logging).context("failed to initialize logging")?;

    let mode = if cli.live {
        TradingMode::Live
    } else {
        TradingMode::Paper
    };

    if mode == TradingMode::Live {
        validate_live_mode(&config)?;
        // Exchange wire protocols live outside this crate
        return Err(BotError::Config(format!(
            "no live connector for exchange '{}' is built into this binary",
            config.exchange.name
        ))
        .into());
    }

    info!("🚀 Trading bot starting in {} mode", mode);

    let store = StateStore::new(&config.state_file);
    let saved = match store.load().await {
        Ok(saved) => saved,
        Err(e) => {
            warn!("⚠️  Ignoring saved state: {}", e);
            None
        }
    };

    // Paper holdings mirror the saved positions
    let gateway = Arc::new(match &saved {
        Some(state) => PaperGateway::with_holdings(state.holdings()),
        None => PaperGateway::new(),
    });
    let transport = SimulatedTransport::new(cli.seed, Duration::from_millis(cli.tick_ms));

    let force_kill = Duration::from_secs(config.shutdown.force_kill_after);
    let mut bot = TradingBot::new(config, mode, transport, gateway);

    if let Some(state) = saved {
        let dropped = bot.restore(state).await?;
        if dropped > 0 {
            warn!("⚠️  Dropped {} positions the exchange no longer holds", dropped);
        }
    }

    bot.start()?;
    info!("Press Ctrl+C to stop...\n");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        _ = bot.stopped() => {
            warn!("⚠️  Bot stopped itself, shutting down...");
        }
    }

    match tokio::time::timeout(force_kill, bot.shutdown()).await {
        Ok(result) => result.context("shutdown did not complete cleanly")?,
        Err(_) => {
            error!(
                "❌ Shutdown exceeded {}s, forcing exit",
                force_kill.as_secs()
            );
            std::process::exit(1);
        }
    }

    if bot.status().state == RunState::Error {
        bail!("trading bot stopped after a fatal error");
    }
    Ok(())
}
