// Risk management module
pub mod circuit_breakers;
pub mod manager;
pub mod sizing;

pub use circuit_breakers::{CircuitBreakerTrip, CircuitBreakers, RiskState, TradeStats};
pub use manager::{trailing_stop, EntryDecision, RiskManager, StopOverrides};
pub use sizing::SizingPolicy;
