use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::{BotError, Result};

/// Remaining base quantity treated as flat
const DUST: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64, // reference price; market orders may fill elsewhere
}

impl OrderRequest {
    pub fn new(pair: &str, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            pair: pair.to_string(),
            side,
            quantity,
            price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub client_order_id: Uuid,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Exchange order API
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit an order and wait for its fill
    async fn submit(&self, order: &OrderRequest) -> Result<OrderFill>;

    /// Pairs the account currently holds a non-zero position in
    async fn live_positions(&self) -> Result<HashSet<String>>;

    fn name(&self) -> &str;
}

/// Paper trading gateway. Fills every valid order at the requested price.
pub struct PaperGateway {
    holdings: Mutex<HashMap<String, f64>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self {
            holdings: Mutex::new(HashMap::new()),
        }
    }

    /// Seed holdings, e.g. from positions restored off disk
    pub fn with_holdings(holdings: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            holdings: Mutex::new(holdings.into_iter().collect()),
        }
    }

    pub fn holding(&self, pair: &str) -> f64 {
        self.holdings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(pair)
            .copied()
            .unwrap_or(0.0)
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderFill> {
        let reject = |reason: String| BotError::OrderExecution {
            pair: order.pair.clone(),
            reason,
        };

        if !(order.quantity > 0.0 && order.quantity.is_finite()) {
            return Err(reject(format!("invalid quantity {}", order.quantity)));
        }
        if !(order.price > 0.0 && order.price.is_finite()) {
            return Err(reject(format!("invalid price {}", order.price)));
        }

        {
            let mut holdings = self.holdings.lock().unwrap_or_else(|e| e.into_inner());
            match order.side {
                OrderSide::Buy => {
                    *holdings.entry(order.pair.clone()).or_insert(0.0) += order.quantity;
                }
                OrderSide::Sell => {
                    let held = holdings.get(&order.pair).copied().unwrap_or(0.0);
                    if held + DUST < order.quantity {
                        return Err(reject(format!(
                            "insufficient holdings: have {:.8}, selling {:.8}",
                            held, order.quantity
                        )));
                    }
                    let remaining = held - order.quantity;
                    if remaining <= DUST {
                        holdings.remove(&order.pair);
                    } else {
                        holdings.insert(order.pair.clone(), remaining);
                    }
                }
            }
        }

        tracing::debug!(
            "📝 Paper {} {:.6} {} @ ${:.4}",
            order.side,
            order.quantity,
            order.pair,
            order.price
        );

        Ok(OrderFill {
            client_order_id: order.client_order_id,
            pair: order.pair.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            timestamp: Utc::now(),
        })
    }

    async fn live_positions(&self) -> Result<HashSet<String>> {
        let holdings = self.holdings.lock().unwrap_or_else(|e| e.into_inner());
        Ok(holdings
            .iter()
            .filter(|(_, qty)| **qty > DUST)
            .map(|(pair, _)| pair.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "paper"
    }
}
