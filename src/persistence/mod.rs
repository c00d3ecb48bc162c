// State persistence: JSON snapshot written atomically
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bot::{ErrorRecord, RunState};
use crate::errors::{BotError, Result};
use crate::execution::PortfolioSnapshot;

pub const SCHEMA_VERSION: u32 = 1;

/// Errors carried across restarts
pub const PERSISTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeCounters {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: f64,
}

/// Everything the bot needs to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub run_state: RunState,
    pub capital: f64,
    pub portfolio: PortfolioSnapshot,
    pub counters: TradeCounters,
    pub errors: Vec<ErrorRecord>,
}

impl BotState {
    pub fn new(run_state: RunState, portfolio: PortfolioSnapshot, errors: Vec<ErrorRecord>) -> Self {
        let stats = &portfolio.risk.stats;
        let counters = TradeCounters {
            total_trades: stats.total_trades(),
            winning_trades: stats.wins,
            losing_trades: stats.losses,
            total_pnl: stats.net_pnl(),
        };

        let skip = errors.len().saturating_sub(PERSISTED_ERRORS);
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            run_state,
            capital: portfolio.risk.capital,
            counters,
            errors: errors.into_iter().skip(skip).collect(),
            portfolio,
        }
    }

    /// Base quantity held per open pair
    pub fn holdings(&self) -> Vec<(String, f64)> {
        self.portfolio
            .open_positions
            .iter()
            .map(|p| (p.pair.clone(), p.quantity))
            .collect()
    }
}

/// JSON file store. Writes go to a sibling temp file and are renamed over
/// the target, so a crash never leaves a truncated state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "bot_state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub async fn save(&self, state: &BotState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BotError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| BotError::Persistence(format!("write {}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            BotError::Persistence(format!("rename to {}: {}", self.path.display(), e))
        })?;

        tracing::debug!(
            "💾 Saved state to {} ({} open positions)",
            self.path.display(),
            state.portfolio.open_positions.len()
        );
        Ok(())
    }

    /// Load the saved state, or None if nothing was saved yet
    pub async fn load(&self) -> Result<Option<BotState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BotError::Persistence(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let state: BotState = serde_json::from_slice(&bytes).map_err(|e| {
            BotError::Persistence(format!("corrupt state file {}: {}", self.path.display(), e))
        })?;

        if state.schema_version > SCHEMA_VERSION {
            return Err(BotError::Persistence(format!(
                "state file schema v{} is newer than supported v{}",
                state.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExitReason, PositionManager};
    use crate::risk::CircuitBreakers;

    fn sample_state() -> BotState {
        let mut pm = PositionManager::new(10000.0, CircuitBreakers::default(), Some(0.015));
        pm.open("BTC/USDT", 100.0, 0.02, 98.0, 104.0).unwrap();
        pm.open("ETH/USDT", 10.0, 0.02, 9.8, 10.4).unwrap();
        pm.update("BTC/USDT", 101.0);
        pm.close("ETH/USDT", 10.2, ExitReason::SignalExit).unwrap();

        let errors = (0..15)
            .map(|i| ErrorRecord {
                timestamp: Utc::now(),
                message: format!("error {}", i),
            })
            .collect();
        BotState::new(RunState::Running, pm.snapshot(), errors)
    }

    #[test]
    fn test_state_keeps_last_ten_errors() {
        let state = sample_state();
        assert_eq!(state.errors.len(), PERSISTED_ERRORS);
        assert_eq!(state.errors[0].message, "error 5");
        assert_eq!(state.counters.total_trades, 1);
        assert_eq!(state.counters.winning_trades, 1);
        assert_eq!(state.holdings().len(), 1);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("bot_state.json"));
        let state = sample_state();

        store.save(&state).await.unwrap();
        assert!(!store.temp_path().exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot_state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result = StateStore::new(&path).load().await;
        assert!(matches!(result, Err(BotError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("bot_state.json"));
        let mut state = sample_state();
        state.schema_version = SCHEMA_VERSION + 1;
        store.save(&state).await.unwrap();

        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("bot_state.json"));

        let mut state = sample_state();
        store.save(&state).await.unwrap();
        state.run_state = RunState::Stopped;
        store.save(&state).await.unwrap();

        assert_eq!(
            store.load().await.unwrap().unwrap().run_state,
            RunState::Stopped
        );
    }
}
