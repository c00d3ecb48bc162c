use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WebSocketConfig;
use crate::errors::{BotError, Result};
use crate::market_data::feed::{MarketTransport, OutboundMessage, Subscription};

/// Rate-limited subscription sender
///
/// Each stream costs one cell of a `max_subscriptions_per_second` quota.
/// With batching on, streams go out in groups of `batch_size` (never more
/// than the quota allows at once) separated by `batch_delay`.
pub struct SubscriptionManager {
    limiter: DefaultDirectRateLimiter,
    per_second: NonZeroU32,
    batch_size: Option<NonZeroU32>,
    batch_delay: Duration,
}

impl SubscriptionManager {
    pub fn new(config: &WebSocketConfig) -> Self {
        let per_second = NonZeroU32::new(config.max_subscriptions_per_second).unwrap_or(NonZeroU32::MIN);

        let batch_size = config.batch_subscriptions.then(|| {
            let size = u32::try_from(config.batch_size).unwrap_or(u32::MAX);
            NonZeroU32::new(size.min(per_second.get())).unwrap_or(NonZeroU32::MIN)
        });

        Self {
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            per_second,
            batch_size,
            batch_delay: config.batch_delay(),
        }
    }

    pub fn per_second(&self) -> NonZeroU32 {
        self.per_second
    }

    /// Split streams into the groups that will be sent together
    pub fn plan(&self, streams: &[Subscription]) -> Vec<Vec<Subscription>> {
        let chunk = self.batch_size.map_or(1, |n| n.get() as usize);
        streams.chunks(chunk).map(|c| c.to_vec()).collect()
    }

    /// Subscribe to every stream, respecting the rate limit.
    ///
    /// Returns the number of streams sent. Stops early if `cancel` fires.
    pub async fn subscribe<T>(
        &self,
        transport: &mut T,
        streams: &[Subscription],
        cancel: &CancellationToken,
    ) -> Result<usize>
    where
        T: MarketTransport + ?Sized,
    {
        let batches = self.plan(streams);
        let total = batches.len();
        let mut sent = 0;

        for (i, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let cells = u32::try_from(batch.len())
                .ok()
                .and_then(NonZeroU32::new)
                .unwrap_or(NonZeroU32::MIN);
            self.limiter
                .until_n_ready(cells)
                .await
                .map_err(|e| BotError::Connection(format!("subscription batch too large: {e}")))?;

            let count = batch.len();
            transport.send(OutboundMessage::Subscribe(batch)).await?;
            sent += count;
            debug!("📡 Subscribed batch {}/{} ({} streams)", i + 1, total, count);

            if self.batch_size.is_some() && i + 1 < total && !self.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.batch_delay) => {}
                }
            }
        }

        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::feed::InboundFrame;
    use crate::models::Timeframe;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<OutboundMessage>,
    }

    #[async_trait]
    impl MarketTransport for RecordingTransport {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, message: OutboundMessage) -> Result<()> {
            self.sent.push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<InboundFrame>> {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    fn streams(n: usize) -> Vec<Subscription> {
        (0..n)
            .map(|i| Subscription::Candles {
                pair: format!("P{i}/USDT"),
                timeframe: Timeframe::M5,
            })
            .collect()
    }

    #[test]
    fn test_batches_follow_batch_size() {
        let config = WebSocketConfig {
            max_subscriptions_per_second: 10,
            batch_size: 4,
            ..WebSocketConfig::default()
        };
        let manager = SubscriptionManager::new(&config);

        let plan = manager.plan(&streams(10));
        let sizes: Vec<usize> = plan.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_batch_size_clamped_to_quota() {
        let config = WebSocketConfig {
            max_subscriptions_per_second: 3,
            batch_size: 50,
            ..WebSocketConfig::default()
        };
        let manager = SubscriptionManager::new(&config);

        assert!(manager.plan(&streams(7)).iter().all(|b| b.len() <= 3));
    }

    #[test]
    fn test_unbatched_sends_one_at_a_time() {
        let config = WebSocketConfig {
            batch_subscriptions: false,
            ..WebSocketConfig::default()
        };
        let manager = SubscriptionManager::new(&config);

        assert_eq!(manager.plan(&streams(3)).len(), 3);
    }

    #[tokio::test]
    async fn test_quota_is_enforced() {
        let config = WebSocketConfig {
            max_subscriptions_per_second: 5,
            batch_subscriptions: false,
            ..WebSocketConfig::default()
        };
        let manager = SubscriptionManager::new(&config);
        assert_eq!(manager.per_second().get(), 5);

        let mut transport = RecordingTransport::default();
        let started = std::time::Instant::now();
        let sent = manager
            .subscribe(&mut transport, &streams(6), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sent, 6);
        assert_eq!(transport.sent.len(), 6);
        // A burst of five, then the sixth waits for a fresh cell
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_cancelled_subscribe_sends_nothing() {
        let manager = SubscriptionManager::new(&WebSocketConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut transport = RecordingTransport::default();
        let sent = manager
            .subscribe(&mut transport, &streams(3), &cancel)
            .await
            .unwrap();

        assert_eq!(sent, 0);
        assert!(transport.sent.is_empty());
    }
}
