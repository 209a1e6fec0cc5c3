//! Notification publisher for liquidity snapshots
//!
//! Serializes a market's current pools into a `LiquidityUpdate` and
//! broadcasts it on the topic keyed by that market.

use bytes::Bytes;
use market_core::{LiquidityPool, LiquidityUpdate, MarketError, MarketResult};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::broker::{TopicBroker, TopicSubscription};

/// Topic carrying liquidity updates for one market
pub fn liquidity_topic(market_id: &str) -> String {
    format!("market:{}:liquidity", market_id)
}

/// Publishes liquidity snapshots to per-market topics
#[derive(Clone)]
pub struct LiquidityPublisher {
    broker: Arc<dyn TopicBroker>,
}

impl LiquidityPublisher {
    pub fn new(broker: Arc<dyn TopicBroker>) -> Self {
        Self { broker }
    }

    /// Broadcast a snapshot of `pools` for `market_id`
    ///
    /// Returns the number of subscribers reached (zero is not an error).
    #[instrument(skip(self, pools), fields(pools = pools.len()))]
    pub async fn publish(
        &self,
        market_id: &str,
        pools: Vec<LiquidityPool>,
    ) -> MarketResult<usize> {
        let update = LiquidityUpdate::snapshot(market_id, pools);
        let payload = serde_json::to_vec(&update).map_err(|e| {
            MarketError::notification(format!("marshal liquidity update: {}", e))
        })?;

        let delivered = self
            .broker
            .publish(&liquidity_topic(market_id), Bytes::from(payload))
            .await?;

        debug!("Liquidity update for {} reached {} subscribers", market_id, delivered);
        Ok(delivered)
    }

    /// Open a dedicated subscription to a market's liquidity topic
    pub async fn subscribe(&self, market_id: &str) -> MarketResult<TopicSubscription> {
        Ok(self.broker.subscribe(&liquidity_topic(market_id)).await?)
    }
}

impl std::fmt::Debug for LiquidityPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidityPublisher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BroadcastBroker;
    use chrono::Utc;
    use futures::StreamExt;
    use market_core::MarketOption;

    #[test]
    fn test_topic_is_keyed_by_market() {
        assert_eq!(liquidity_topic("abc"), "market:abc:liquidity");
    }

    #[tokio::test]
    async fn test_publish_serializes_snapshot() {
        let broker = Arc::new(BroadcastBroker::default());
        let publisher = LiquidityPublisher::new(broker.clone());

        let mut subscription = publisher.subscribe("m1").await.unwrap();
        let option = MarketOption::new("o1", "m1", "Yes", Utc::now());
        let pools = vec![LiquidityPool::empty("p1", &option, Utc::now())];

        let delivered = publisher.publish("m1", pools.clone()).await.unwrap();
        assert_eq!(delivered, 1);

        let payload = subscription.next().await.unwrap();
        let update: LiquidityUpdate = serde_json::from_slice(&payload).unwrap();
        assert_eq!(update.market_id, "m1");
        assert_eq!(update.liquidity_pools, pools);
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_succeeds() {
        let publisher = LiquidityPublisher::new(Arc::new(BroadcastBroker::default()));
        assert_eq!(publisher.publish("m1", Vec::new()).await.unwrap(), 0);
    }
}
