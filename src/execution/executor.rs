use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{BotError, Result};
use crate::execution::{
    check_entry, ExitReason, ExitTrigger, OrderGateway, OrderRequest, OrderSide, PairLocks, Position,
    PositionManager,
};
use crate::models::{Signal, SignalAction};
use crate::risk::{EntryDecision, RiskManager, StopOverrides};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Open {
        size: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    Close {
        exit_reason: ExitReason,
    },
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Lock the position manager, recovering from a poisoned mutex
pub fn lock_positions(positions: &Mutex<PositionManager>) -> MutexGuard<'_, PositionManager> {
    positions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Turns signals and exit triggers into orders and position changes.
///
/// Decisions are taken under the position-manager guard; the gateway call
/// happens with no guard held, and its fill is applied under a fresh guard.
pub struct Executor {
    positions: Arc<Mutex<PositionManager>>,
    risk: RiskManager,
    gateway: Arc<dyn OrderGateway>,
    locks: PairLocks,
    pending_exits: Mutex<HashMap<String, ExitReason>>,
}

impl Executor {
    pub fn new(
        positions: Arc<Mutex<PositionManager>>,
        risk: RiskManager,
        gateway: Arc<dyn OrderGateway>,
    ) -> Self {
        Self {
            positions,
            risk,
            gateway,
            locks: PairLocks::new(),
            pending_exits: Mutex::new(HashMap::new()),
        }
    }

    pub fn positions(&self) -> Arc<Mutex<PositionManager>> {
        self.positions.clone()
    }

    pub fn gateway(&self) -> Arc<dyn OrderGateway> {
        self.gateway.clone()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Decide what a signal means given current positions and risk state
    pub fn decide(&self, signal: &Signal, price: f64, overrides: &StopOverrides) -> ExecutionDecision {
        let pm = lock_positions(&self.positions);

        match signal.action {
            SignalAction::Entry => {
                let open_pairs = pm.open_pairs();
                match self.risk.evaluate_entry(
                    &signal.pair,
                    self.risk.position_size(),
                    price,
                    overrides,
                    pm.risk_state(),
                    &open_pairs,
                ) {
                    EntryDecision::Accept {
                        size,
                        stop_loss,
                        take_profit,
                    } => ExecutionDecision {
                        action: ExecutionAction::Open {
                            size,
                            stop_loss,
                            take_profit,
                        },
                        reason: format!("Entry signal (score {:.3})", signal.score),
                    },
                    EntryDecision::Reject(reason) => ExecutionDecision::skip(reason),
                    EntryDecision::Halt(trip) => {
                        ExecutionDecision::skip(format!("Circuit breaker: {}", trip))
                    }
                }
            }

            SignalAction::Exit => {
                if pm.has_open_position(&signal.pair) {
                    ExecutionDecision {
                        action: ExecutionAction::Close {
                            exit_reason: ExitReason::SignalExit,
                        },
                        reason: format!("Exit signal (score {:.3})", signal.score),
                    }
                } else {
                    ExecutionDecision::skip("No position to close")
                }
            }

            SignalAction::Hold => ExecutionDecision::skip("Hold signal"),
        }
    }

    /// Decide and carry out a signal at `price`
    pub async fn execute(
        &self,
        signal: &Signal,
        price: f64,
        overrides: &StopOverrides,
    ) -> Result<ExecutionDecision> {
        let _gate = match signal.action {
            SignalAction::Entry => Some(self.locks.entry_gate().await),
            _ => None,
        };
        let _pair = self.locks.lock(&signal.pair).await;

        let decision = self.decide(signal, price, overrides);
        match decision.action {
            ExecutionAction::Open { size, .. } => {
                self.open_locked(&signal.pair, price, size, overrides).await?;
            }
            ExecutionAction::Close { exit_reason } => {
                self.close_locked(&signal.pair, price, exit_reason).await?;
            }
            ExecutionAction::Skip => {
                tracing::debug!("{}: skipped ({})", signal.pair, decision.reason);
            }
        }

        Ok(decision)
    }

    async fn open_locked(
        &self,
        pair: &str,
        price: f64,
        size: f64,
        overrides: &StopOverrides,
    ) -> Result<()> {
        // Nothing reaches the exchange unless the position could be tracked
        let (stop_loss, take_profit) = self.risk.initial_stops(price, overrides);
        check_entry(pair, price, size, stop_loss, take_profit)?;

        let quantity = {
            let pm = lock_positions(&self.positions);
            size * pm.risk_state().capital / price
        };

        let order = OrderRequest::new(pair, OrderSide::Buy, quantity, price);
        let fill = self.gateway.submit(&order).await.map_err(|e| {
            tracing::error!("❌ Entry order for {} failed: {}", pair, e);
            e
        })?;

        // Stops follow the actual fill
        let (stop_loss, take_profit) = self.risk.initial_stops(fill.price, overrides);
        let opened = lock_positions(&self.positions).open_at(
            pair,
            fill.price,
            size,
            stop_loss,
            take_profit,
            fill.timestamp,
        );

        if let Err(e) = opened {
            tracing::error!(
                "❌ Fill for {} @ {} rejected ({}), unwinding {:.8}",
                pair,
                fill.price,
                e,
                fill.quantity
            );
            self.unwind(pair, fill.quantity, price).await;
            return Err(e);
        }
        Ok(())
    }

    /// Sell back a fill that could not be tracked
    async fn unwind(&self, pair: &str, quantity: f64, price: f64) {
        let order = OrderRequest::new(pair, OrderSide::Sell, quantity, price);
        if let Err(e) = self.gateway.submit(&order).await {
            tracing::error!(
                "❌ Unwind of {:.8} {} failed, exchange holds an untracked balance: {}",
                quantity,
                pair,
                e
            );
        }
    }

    /// Close a position, queueing the exit for retry when the order fails
    pub async fn close_position(
        &self,
        pair: &str,
        price: f64,
        reason: ExitReason,
    ) -> Result<Position> {
        let _pair = self.locks.lock(pair).await;
        self.close_locked(pair, price, reason).await
    }

    pub async fn handle_trigger(&self, trigger: &ExitTrigger) -> Result<Position> {
        tracing::info!(
            "⚡ {} triggered for {} @ ${:.4}",
            trigger.reason,
            trigger.pair,
            trigger.price
        );
        self.close_position(&trigger.pair, trigger.price, trigger.reason)
            .await
    }

    async fn close_locked(&self, pair: &str, price: f64, reason: ExitReason) -> Result<Position> {
        let quantity = {
            let pm = lock_positions(&self.positions);
            pm.get_open_position(pair)
                .map(|p| p.quantity)
                .ok_or_else(|| BotError::Position(format!("no open position for {}", pair)))?
        };

        let order = OrderRequest::new(pair, OrderSide::Sell, quantity, price);
        match self.gateway.submit(&order).await {
            Ok(fill) => {
                self.pending().remove(pair);
                let mut pm = lock_positions(&self.positions);
                pm.close_at(pair, fill.price, reason, fill.timestamp)
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️  Exit order for {} failed ({}), position stays open and will be retried",
                    pair,
                    e
                );
                self.pending().insert(pair.to_string(), reason);
                Err(e)
            }
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, ExitReason>> {
        self.pending_exits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pairs whose exit order failed and awaits a retry
    pub fn pending_exits(&self) -> Vec<(String, ExitReason)> {
        let mut pending: Vec<_> = self
            .pending()
            .iter()
            .map(|(pair, reason)| (pair.clone(), *reason))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }

    /// Retry failed exits at the given prices. Returns how many closed.
    pub async fn retry_pending_exits(&self, prices: &HashMap<String, f64>) -> usize {
        let mut closed = 0;

        for (pair, reason) in self.pending_exits() {
            let Some(&price) = prices.get(&pair) else {
                continue;
            };

            tracing::info!("🔄 Retrying {} exit for {}", reason, pair);
            match self.close_position(&pair, price, reason).await {
                Ok(_) => closed += 1,
                Err(BotError::Position(_)) => {
                    // Closed elsewhere in the meantime
                    self.pending().remove(&pair);
                }
                Err(_) => {}
            }
        }

        closed
    }

    /// Close every open position, using `prices` or each position's last price
    pub async fn close_all(&self, reason: ExitReason, prices: &HashMap<String, f64>) -> usize {
        let targets: Vec<(String, f64)> = {
            let pm = lock_positions(&self.positions);
            pm.open_positions()
                .iter()
                .map(|p| (p.pair.clone(), prices.get(&p.pair).copied().unwrap_or(p.last_price)))
                .collect()
        };

        let mut closed = 0;
        for (pair, price) in targets {
            match self.close_position(&pair, price, reason).await {
                Ok(_) => closed += 1,
                Err(e) => tracing::error!("❌ Failed to close {} on {}: {}", pair, reason, e),
            }
        }
        closed
    }
}
