// Trading strategy module
pub mod selector;
pub mod signal_engine;

pub use selector::{ConfidenceModel, HeuristicConfidenceModel, StrategySelector};
pub use signal_engine::{Analysis, SignalComponents, SignalEngine};

use crate::models::{Candle, Signal};
use crate::Result;

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal from one pair/timeframe series, oldest first.
    ///
    /// `Ok(None)` means "not enough data yet", never a failure.
    fn generate_signal(&self, candles: &[Candle]) -> Result<Option<Signal>>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
