use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OwnedMutexGuard};

/// Serializes order flow per pair.
///
/// Different pairs proceed in parallel. Entries additionally go through a
/// single entry gate so the open-position limit holds across pairs. Lock
/// order is always entry gate first, then pair.
#[derive(Default)]
pub struct PairLocks {
    pairs: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    entry_gate: AsyncMutex<()>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, pair: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
            pairs
                .entry(pair.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn entry_gate(&self) -> MutexGuard<'_, ()> {
        self.entry_gate.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_pair_is_serialized() {
        let locks = Arc::new(PairLocks::new());
        let guard = locks.lock("BTC/USDT").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("BTC/USDT").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_pairs_do_not_block() {
        let locks = PairLocks::new();
        let _btc = locks.lock("BTC/USDT").await;

        let eth = tokio::time::timeout(Duration::from_millis(100), locks.lock("ETH/USDT")).await;
        assert!(eth.is_ok());
    }

    #[test]
    fn test_entry_gate_is_exclusive() {
        let locks = PairLocks::new();
        let held = tokio_test::block_on(locks.entry_gate());

        let mut waiting = tokio_test::task::spawn(locks.entry_gate());
        tokio_test::assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
    }
}
