use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use uuid::Uuid;

use crate::errors::{BotError, Result};
use crate::risk::{trailing_stop, CircuitBreakerTrip, CircuitBreakers, RiskState};

/// Closed positions kept in memory (and in snapshots)
pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    SignalExit,
    CircuitBreaker,
    Shutdown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::StopLoss => "stop loss",
            ExitReason::TakeProfit => "take profit",
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::SignalExit => "signal exit",
            ExitReason::CircuitBreaker => "circuit breaker",
            ExitReason::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub pair: String,
    pub entry_price: f64,
    pub size: f64,     // fraction of capital committed
    pub quantity: f64, // base units
    pub stop_loss: f64,
    pub initial_stop: f64,
    pub take_profit: f64,
    pub trailing_distance: Option<f64>,
    pub high_water_mark: f64,
    pub last_price: f64,
    pub entry_time: DateTime<Utc>,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        (self.last_price - self.entry_price) * self.quantity
    }

    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity
    }
}

/// Stop or target breached on a price update
#[derive(Debug, Clone, PartialEq)]
pub struct ExitTrigger {
    pub pair: String,
    pub position_id: Uuid,
    pub price: f64,
    pub reason: ExitReason,
}

/// Everything needed to rebuild a [`PositionManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub open_positions: Vec<Position>,
    pub history: Vec<Position>,
    pub risk: RiskState,
}

/// Single owner of positions and risk bookkeeping.
///
/// Every mutation (stops, targets, P&L, risk state) completes inside one
/// `&mut self` call, so a snapshot never sees a half-updated position.
pub struct PositionManager {
    positions: HashMap<String, Position>,
    history: VecDeque<Position>,
    risk: RiskState,
    circuit_breakers: CircuitBreakers,
    trailing_stop_distance: Option<f64>,
}

/// Checks an entry's levels: all positive and finite, stop < entry < target
pub fn check_entry(
    pair: &str,
    entry_price: f64,
    size: f64,
    stop_loss: f64,
    take_profit: f64,
) -> Result<()> {
    for (name, value) in [
        ("entry price", entry_price),
        ("size", size),
        ("stop loss", stop_loss),
        ("take profit", take_profit),
    ] {
        if !(value > 0.0 && value.is_finite()) {
            return Err(BotError::Position(format!(
                "{} for {} must be positive, got {}",
                name, pair, value
            )));
        }
    }

    if !(stop_loss < entry_price && entry_price < take_profit) {
        return Err(BotError::Position(format!(
            "{}: expected stop {} < entry {} < target {}",
            pair, stop_loss, entry_price, take_profit
        )));
    }
    Ok(())
}

impl PositionManager {
    pub fn new(
        initial_capital: f64,
        circuit_breakers: CircuitBreakers,
        trailing_stop_distance: Option<f64>,
    ) -> Self {
        Self {
            positions: HashMap::new(),
            history: VecDeque::new(),
            risk: RiskState::new(initial_capital),
            circuit_breakers,
            trailing_stop_distance,
        }
    }

    /// Create new position
    pub fn open(
        &mut self,
        pair: &str,
        entry_price: f64,
        size: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<Uuid> {
        self.open_at(pair, entry_price, size, stop_loss, take_profit, Utc::now())
    }

    /// Create new position with explicit timestamp
    pub fn open_at(
        &mut self,
        pair: &str,
        entry_price: f64,
        size: f64,
        stop_loss: f64,
        take_profit: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Uuid> {
        if self.positions.contains_key(pair) {
            return Err(BotError::Position(format!(
                "already have open position for {}",
                pair
            )));
        }

        check_entry(pair, entry_price, size, stop_loss, take_profit)?;

        let id = Uuid::new_v4();
        let quantity = size * self.risk.capital / entry_price;

        let position = Position {
            id,
            pair: pair.to_string(),
            entry_price,
            size,
            quantity,
            stop_loss,
            initial_stop: stop_loss,
            take_profit,
            trailing_distance: self.trailing_stop_distance,
            high_water_mark: entry_price,
            last_price: entry_price,
            entry_time: timestamp,
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            realized_pnl: None,
        };

        tracing::info!(
            "📈 Opened {} @ ${:.4} (size {:.2}%, qty {:.6}, stop ${:.4}, target ${:.4})",
            pair,
            entry_price,
            size * 100.0,
            quantity,
            stop_loss,
            take_profit
        );

        self.positions.insert(pair.to_string(), position);
        self.risk.open_positions = self.positions.len();
        Ok(id)
    }

    /// Apply a price tick. Moves the trailing stop, marks equity and reports
    /// a breached stop or target.
    pub fn update(&mut self, pair: &str, price: f64) -> Option<ExitTrigger> {
        if !(price > 0.0 && price.is_finite()) {
            return None;
        }

        let position = self.positions.get_mut(pair)?;
        position.last_price = price;

        if let Some(distance) = position.trailing_distance {
            if price > position.high_water_mark {
                position.high_water_mark = price;
            }
            position.stop_loss = trailing_stop(position.stop_loss, position.high_water_mark, distance);
        }

        let reason = if price >= position.take_profit {
            Some(ExitReason::TakeProfit)
        } else if price <= position.stop_loss {
            if position.high_water_mark > position.entry_price
                && position.stop_loss > position.initial_stop
            {
                Some(ExitReason::TrailingStop)
            } else {
                Some(ExitReason::StopLoss)
            }
        } else {
            None
        };

        let trigger = reason.map(|reason| ExitTrigger {
            pair: pair.to_string(),
            position_id: position.id,
            price,
            reason,
        });

        self.mark_equity();
        trigger
    }

    /// Update every open position from a price map
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) -> Vec<ExitTrigger> {
        let pairs: Vec<String> = self.positions.keys().cloned().collect();
        pairs
            .iter()
            .filter_map(|pair| {
                let price = *prices.get(pair)?;
                self.update(pair, price)
            })
            .collect()
    }

    /// Close position and realize its P&L
    pub fn close(&mut self, pair: &str, exit_price: f64, reason: ExitReason) -> Result<Position> {
        self.close_at(pair, exit_price, reason, Utc::now())
    }

    pub fn close_at(
        &mut self,
        pair: &str,
        exit_price: f64,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
    ) -> Result<Position> {
        if !(exit_price > 0.0 && exit_price.is_finite()) {
            return Err(BotError::Position(format!(
                "exit price for {} must be positive, got {}",
                pair, exit_price
            )));
        }

        let mut position = self
            .positions
            .remove(pair)
            .ok_or_else(|| BotError::Position(format!("no open position for {}", pair)))?;

        let pnl = (exit_price - position.entry_price) * position.quantity;

        position.status = PositionStatus::Closed;
        position.last_price = exit_price;
        position.exit_price = Some(exit_price);
        position.exit_time = Some(timestamp);
        position.exit_reason = Some(reason);
        position.realized_pnl = Some(pnl);

        self.risk.record_trade(pnl);
        self.risk.open_positions = self.positions.len();
        self.mark_equity();

        let emoji = if pnl >= 0.0 { "💰" } else { "🔻" };
        tracing::info!(
            "{} Closed {} @ ${:.4} ({}) P&L: ${:.2}",
            emoji,
            pair,
            exit_price,
            reason,
            pnl
        );

        self.history.push_back(position.clone());
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        Ok(position)
    }

    /// Recompute equity from capital plus unrealized P&L and latch any
    /// circuit breaker that trips.
    fn mark_equity(&mut self) {
        let unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl()).sum();
        self.risk.mark_equity(self.risk.capital + unrealized);
        self.circuit_breakers.latch(&mut self.risk);
    }

    /// Start a new trading day if the date changed
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        let rolled = self.risk.roll_day(today);
        if rolled {
            tracing::info!("📅 New trading day {}, daily P&L reset", today);
            // A drawdown halt may still apply
            self.circuit_breakers.latch(&mut self.risk);
        }
        rolled
    }

    pub fn reset_halt(&mut self) {
        tracing::info!("Circuit breaker halt reset");
        self.risk.reset_halt();
    }

    pub fn halt(&self) -> Option<CircuitBreakerTrip> {
        self.risk.halt
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakers {
        &self.circuit_breakers
    }

    pub fn has_open_position(&self, pair: &str) -> bool {
        self.positions.contains_key(pair)
    }

    pub fn get_open_position(&self, pair: &str) -> Option<&Position> {
        self.positions.get(pair)
    }

    /// Open positions ordered by entry time
    pub fn open_positions(&self) -> Vec<&Position> {
        let mut open: Vec<&Position> = self.positions.values().collect();
        open.sort_by(|a, b| a.entry_time.cmp(&b.entry_time).then(a.pair.cmp(&b.pair)));
        open
    }

    pub fn open_pairs(&self) -> Vec<String> {
        self.open_positions().iter().map(|p| p.pair.clone()).collect()
    }

    pub fn history(&self) -> impl Iterator<Item = &Position> {
        self.history.iter()
    }

    pub fn equity(&self) -> f64 {
        self.risk.current_equity
    }

    /// Realized P&L across all closed trades
    pub fn total_pnl(&self) -> f64 {
        self.risk.stats.net_pnl()
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            open_positions: self.open_positions().into_iter().cloned().collect(),
            history: self.history.iter().cloned().collect(),
            risk: self.risk.clone(),
        }
    }

    /// Replace in-memory state with a snapshot
    pub fn restore(&mut self, snapshot: PortfolioSnapshot) {
        self.positions = snapshot
            .open_positions
            .into_iter()
            .map(|p| (p.pair.clone(), p))
            .collect();
        self.history = snapshot.history.into_iter().collect();
        self.risk = snapshot.risk;
        self.risk.open_positions = self.positions.len();

        tracing::info!(
            "Restored {} open positions (realized P&L: ${:.2})",
            self.positions.len(),
            self.total_pnl()
        );
    }

    /// Drop restored positions the exchange no longer holds
    pub fn reconcile(&mut self, live_pairs: &HashSet<String>) -> Vec<Position> {
        let missing: Vec<String> = self
            .positions
            .keys()
            .filter(|pair| !live_pairs.contains(*pair))
            .cloned()
            .collect();

        let dropped: Vec<Position> = missing
            .iter()
            .filter_map(|pair| self.positions.remove(pair))
            .collect();

        for position in &dropped {
            tracing::warn!(
                "⚠️  Dropping restored position {} ({}): not held on the exchange",
                position.pair,
                position.id
            );
        }

        self.risk.open_positions = self.positions.len();
        if !dropped.is_empty() {
            self.mark_equity();
        }
        dropped
    }
}
