use crate::config::{RiskConfig, SignalParams};
use crate::risk::{CircuitBreakerTrip, CircuitBreakers, RiskState, SizingPolicy};

/// Outcome of an entry request
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Accept {
        size: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    Reject(String),
    Halt(CircuitBreakerTrip),
}

/// Strategy-level stop/target fractions that replace the risk defaults
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StopOverrides {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl From<&SignalParams> for StopOverrides {
    fn from(params: &SignalParams) -> Self {
        Self {
            stop_loss: params.stop_loss,
            take_profit: params.take_profit,
        }
    }
}

pub struct RiskManager {
    breakers: CircuitBreakers,
    sizing: SizingPolicy,
    max_open_positions: usize,
    default_stop_loss: f64,
    default_take_profit: f64,
    trailing_stop_distance: Option<f64>,
}

impl RiskManager {
    pub fn new(position_size: f64, config: &RiskConfig) -> Self {
        Self {
            breakers: CircuitBreakers::from(config),
            sizing: SizingPolicy::from_config(position_size, config),
            max_open_positions: config.max_open_positions,
            default_stop_loss: config.default_stop_loss,
            default_take_profit: config.default_take_profit,
            trailing_stop_distance: config
                .use_trailing_stop
                .then_some(config.trailing_stop_distance),
        }
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn position_size(&self) -> f64 {
        self.sizing.position_size()
    }

    pub fn trailing_stop_distance(&self) -> Option<f64> {
        self.trailing_stop_distance
    }

    /// Decide whether a new position may be opened.
    ///
    /// Order of checks: halt (latched or fresh), duplicate pair, position
    /// limit, sizing.
    pub fn evaluate_entry(
        &self,
        pair: &str,
        requested_size: f64,
        entry_price: f64,
        overrides: &StopOverrides,
        state: &RiskState,
        open_pairs: &[String],
    ) -> EntryDecision {
        if let Some(trip) = state.halt {
            return EntryDecision::Halt(trip);
        }
        if let Err(trip) = self.breakers.check(state) {
            return EntryDecision::Halt(trip);
        }

        if open_pairs.iter().any(|p| p == pair) {
            return EntryDecision::Reject(format!("already holding {}", pair));
        }

        if open_pairs.len() >= self.max_open_positions {
            return EntryDecision::Reject(format!(
                "max open positions reached ({}/{})",
                open_pairs.len(),
                self.max_open_positions
            ));
        }

        if entry_price <= 0.0 {
            return EntryDecision::Reject(format!("invalid entry price {}", entry_price));
        }

        let size = self.sizing.size(requested_size, &state.stats);
        if size <= 0.0 {
            return EntryDecision::Reject(format!("position size {:.4} is not positive", size));
        }

        let (stop_loss, take_profit) = self.initial_stops(entry_price, overrides);
        EntryDecision::Accept {
            size,
            stop_loss,
            take_profit,
        }
    }

    /// Stop-loss and take-profit prices for a fresh entry
    pub fn initial_stops(&self, entry_price: f64, overrides: &StopOverrides) -> (f64, f64) {
        let stop_pct = overrides.stop_loss.unwrap_or(self.default_stop_loss);
        let target_pct = overrides.take_profit.unwrap_or(self.default_take_profit);
        (entry_price * (1.0 - stop_pct), entry_price * (1.0 + target_pct))
    }
}

/// Trailing stop for a high-water mark. Never lowers the current stop.
pub fn trailing_stop(current_stop: f64, high_water_mark: f64, distance: f64) -> f64 {
    current_stop.max(high_water_mark * (1.0 - distance))
}
