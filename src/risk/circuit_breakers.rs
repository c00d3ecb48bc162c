use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RiskConfig;

/// Circuit breakers to prevent catastrophic losses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakers {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.05, // -5% daily
            max_drawdown_pct: 0.20,   // -20% from peak
        }
    }
}

impl From<&RiskConfig> for CircuitBreakers {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_daily_loss_pct: config.max_daily_loss,
            max_drawdown_pct: config.max_drawdown,
        }
    }
}

/// Closed-trade statistics feeding Kelly sizing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub wins: u32,
    pub losses: u32,
    pub gross_profit: f64,
    pub gross_loss: f64, // stored positive
}

impl TradeStats {
    pub fn record(&mut self, pnl: f64) {
        if pnl > 0.0 {
            self.wins += 1;
            self.gross_profit += pnl;
        } else {
            self.losses += 1;
            self.gross_loss += -pnl;
        }
    }

    pub fn total_trades(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn net_pnl(&self) -> f64 {
        self.gross_profit - self.gross_loss
    }

    pub fn win_rate(&self) -> Option<f64> {
        match self.total_trades() {
            0 => None,
            n => Some(self.wins as f64 / n as f64),
        }
    }

    /// Average win divided by average loss
    pub fn payoff_ratio(&self) -> Option<f64> {
        if self.wins == 0 || self.losses == 0 || self.gross_loss <= 0.0 {
            return None;
        }
        let avg_win = self.gross_profit / self.wins as f64;
        let avg_loss = self.gross_loss / self.losses as f64;
        Some(avg_win / avg_loss)
    }
}

/// Account-level risk bookkeeping, persisted with the bot state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub capital: f64,        // initial balance + realized P&L
    pub peak_equity: f64,
    pub current_equity: f64, // capital + unrealized P&L
    pub day_start_capital: f64,
    pub daily_pnl: f64,
    pub trading_day: NaiveDate,
    pub open_positions: usize,
    pub halt: Option<CircuitBreakerTrip>,
    pub stats: TradeStats,
}

impl RiskState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            peak_equity: initial_capital,
            current_equity: initial_capital,
            day_start_capital: initial_capital,
            daily_pnl: 0.0,
            trading_day: Utc::now().date_naive(),
            open_positions: 0,
            halt: None,
            stats: TradeStats::default(),
        }
    }

    pub fn mark_equity(&mut self, equity: f64) {
        self.current_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn record_trade(&mut self, pnl: f64) {
        self.capital += pnl;
        self.daily_pnl += pnl;
        self.stats.record(pnl);
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        (self.peak_equity - self.current_equity) / self.peak_equity
    }

    pub fn daily_return(&self) -> f64 {
        if self.day_start_capital <= 0.0 {
            return 0.0;
        }
        self.daily_pnl / self.day_start_capital
    }

    /// Start a new trading day if `today` differs from the current one.
    ///
    /// Clears a daily-loss halt; a drawdown halt survives the rollover.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today == self.trading_day {
            return false;
        }

        self.trading_day = today;
        self.day_start_capital = self.capital;
        self.daily_pnl = 0.0;
        if self.halt == Some(CircuitBreakerTrip::DailyLoss) {
            self.halt = None;
        }
        true
    }

    /// Manual reset. Re-bases the peak so the drawdown breaker does not
    /// immediately re-trip on the same loss.
    pub fn reset_halt(&mut self) {
        self.halt = None;
        self.peak_equity = self.current_equity;
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerTrip {
    DailyLoss,
    MaxDrawdown,
}

impl fmt::Display for CircuitBreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerTrip::DailyLoss => f.write_str("daily loss limit reached"),
            CircuitBreakerTrip::MaxDrawdown => f.write_str("maximum drawdown reached"),
        }
    }
}

impl CircuitBreakers {
    /// Fresh check against the limits. Both limits are inclusive.
    pub fn check(&self, state: &RiskState) -> Result<(), CircuitBreakerTrip> {
        // Check daily loss
        if state.daily_return() <= -self.max_daily_loss_pct {
            return Err(CircuitBreakerTrip::DailyLoss);
        }

        // Check drawdown
        if state.drawdown() >= self.max_drawdown_pct {
            return Err(CircuitBreakerTrip::MaxDrawdown);
        }

        Ok(())
    }

    /// Latch the first trip into `state`. Returns the active halt, if any.
    pub fn latch(&self, state: &mut RiskState) -> Option<CircuitBreakerTrip> {
        if state.halt.is_none() {
            if let Err(trip) = self.check(state) {
                tracing::warn!("🛑 Circuit breaker tripped: {}", trip);
                state.halt = Some(trip);
            }
        }
        state.halt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_daily_loss() {
        let breakers = CircuitBreakers::default();
        let mut state = RiskState::new(10000.0);

        // Simulate -6% daily loss
        state.record_trade(-600.0);

        let result = breakers.check(&state);
        assert_eq!(result, Err(CircuitBreakerTrip::DailyLoss));
    }

    #[test]
    fn test_daily_loss_limit_is_inclusive() {
        let breakers = CircuitBreakers::default();
        let mut state = RiskState::new(10000.0);

        // Exactly -5%
        state.record_trade(-500.0);
        assert_eq!(breakers.check(&state), Err(CircuitBreakerTrip::DailyLoss));

        let mut state = RiskState::new(10000.0);
        state.record_trade(-499.0);
        assert!(breakers.check(&state).is_ok());
    }

    #[test]
    fn test_circuit_breaker_drawdown() {
        let breakers = CircuitBreakers::default();
        let mut state = RiskState::new(10000.0);

        // Peak was 12000, now 9000 = 25% drawdown
        state.mark_equity(12000.0);
        state.mark_equity(9000.0);

        let result = breakers.check(&state);
        assert_eq!(result, Err(CircuitBreakerTrip::MaxDrawdown));
    }

    #[test]
    fn test_circuit_breaker_ok() {
        let breakers = CircuitBreakers::default();
        let state = RiskState::new(10000.0);

        let result = breakers.check(&state);
        assert!(result.is_ok());
    }

    #[test]
    fn test_halt_latches_after_recovery() {
        let breakers = CircuitBreakers::default();
        let mut state = RiskState::new(10000.0);

        state.record_trade(-600.0);
        assert_eq!(breakers.latch(&mut state), Some(CircuitBreakerTrip::DailyLoss));

        // Winning trade brings the day back above the limit, halt stays
        state.record_trade(400.0);
        assert!(breakers.check(&state).is_ok());
        assert_eq!(breakers.latch(&mut state), Some(CircuitBreakerTrip::DailyLoss));
    }

    #[test]
    fn test_daily_loss_clears_on_new_day() {
        let breakers = CircuitBreakers::default();
        let mut state = RiskState::new(10000.0);

        state.record_trade(-600.0);
        breakers.latch(&mut state);

        let tomorrow = state.trading_day.succ_opt().unwrap();
        assert!(state.roll_day(tomorrow));
        assert_eq!(state.halt, None);
        assert_eq!(state.daily_pnl, 0.0);
        assert_eq!(state.day_start_capital, 9400.0);
        assert!(!state.roll_day(tomorrow));
    }

    #[test]
    fn test_drawdown_halt_survives_new_day() {
        let breakers = CircuitBreakers::default();
        let mut state = RiskState::new(10000.0);

        state.mark_equity(7500.0);
        assert_eq!(breakers.latch(&mut state), Some(CircuitBreakerTrip::MaxDrawdown));

        let tomorrow = state.trading_day.succ_opt().unwrap();
        state.roll_day(tomorrow);
        assert_eq!(state.halt, Some(CircuitBreakerTrip::MaxDrawdown));

        state.reset_halt();
        assert!(!state.is_halted());
        assert_eq!(breakers.latch(&mut state), None);
    }

    #[test]
    fn test_trade_stats() {
        let mut stats = TradeStats::default();
        assert_eq!(stats.win_rate(), None);

        stats.record(30.0);
        stats.record(10.0);
        stats.record(-10.0);

        assert_eq!(stats.total_trades(), 3);
        assert!((stats.win_rate().unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.payoff_ratio(), Some(2.0)); // avg win 20 / avg loss 10
    }
}
