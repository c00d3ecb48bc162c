// Market data: caches, connection state machine, subscriptions and the feed loop
pub mod backoff;
pub mod cache;
pub mod connection;
pub mod feed;
pub mod simulated;
pub mod subscriptions;

pub use cache::{CandleCache, TickerCache};
pub use connection::{ConnectionMonitor, ConnectionState, DegradeReason};
pub use feed::{
    FeedHandle, FeedMetrics, FeedStats, InboundFrame, MarketEvent, MarketFeed, MarketTransport,
    MarketUpdate, OutboundMessage, Subscription, LATENCY_WARN_MS,
};
pub use simulated::SimulatedTransport;
pub use subscriptions::SubscriptionManager;
