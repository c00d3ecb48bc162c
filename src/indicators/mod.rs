// Technical indicators module
// Moving averages for the signal engine, volatility for regime detection

pub mod moving_average;
pub mod volatility;

pub use moving_average::{calculate_sma, calculate_sma_at};
pub use volatility::calculate_return_volatility;
