//! In-process topic broker
//!
//! One broadcast channel per topic, created lazily on first subscribe and
//! pruned once it has no receivers left.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::{BrokerError, TopicBroker, TopicSubscription};

type TopicMap = DashMap<String, broadcast::Sender<Bytes>>;

/// Broadcast-channel backed broker for a single process
pub struct BroadcastBroker {
    /// Map of topic -> broadcast sender
    topics: Arc<TopicMap>,
    /// Buffer per topic; slower subscribers lose older messages
    capacity: usize,
}

impl BroadcastBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Get the number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics currently tracked
    pub fn total_topics(&self) -> usize {
        self.topics.len()
    }

    /// Close a topic, ending every subscription on it
    pub fn close_topic(&self, topic: &str) -> bool {
        let closed = self.topics.remove(topic).is_some();
        if closed {
            debug!("Closed topic {}", topic);
        }
        closed
    }
}

#[async_trait]
impl TopicBroker for BroadcastBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, BrokerError> {
        let sender = match self.topics.get(topic) {
            Some(tx) => tx.value().clone(),
            None => {
                debug!("No subscribers on {}, dropping message", topic);
                return Ok(0);
            }
        };

        match sender.send(payload) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                // Every subscription on this topic has been dropped
                self.topics
                    .remove_if(topic, |_, tx| tx.receiver_count() == 0);
                debug!("Pruned idle topic {}", topic);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<TopicSubscription, BrokerError> {
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!("New subscription on {}", topic);

        let topic_name = topic.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let result = match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!("Subscriber on {} lagged, {} messages dropped", topic_name, n);
                    None
                }
            };
            futures::future::ready(result)
        });

        let lease = TopicLease {
            stream: Some(Box::pin(stream)),
            topic: topic.to_string(),
            topics: Arc::downgrade(&self.topics),
        };

        Ok(TopicSubscription::new(topic, lease))
    }
}

/// Receiver side of one subscription; prunes its topic when the last one drops
struct TopicLease {
    stream: Option<Pin<Box<dyn Stream<Item = Bytes> + Send>>>,
    topic: String,
    topics: Weak<TopicMap>,
}

impl Stream for TopicLease {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.stream.as_mut() {
            Some(stream) => stream.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for TopicLease {
    fn drop(&mut self) {
        // Release the receiver before checking for remaining ones
        self.stream.take();

        if let Some(topics) = self.topics.upgrade() {
            if topics
                .remove_if(&self.topic, |_, tx| tx.receiver_count() == 0)
                .is_some()
            {
                debug!("Pruned idle topic {}", self.topic);
            }
        }
    }
}

impl Default for BroadcastBroker {
    fn default() -> Self {
        Self::new(super::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for BroadcastBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBroker")
            .field("total_topics", &self.total_topics())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let broker = BroadcastBroker::default();
        let delivered = broker
            .publish("market:none:liquidity", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(broker.total_topics(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_only_their_topic() {
        let broker = BroadcastBroker::default();
        let mut a = broker.subscribe("a").await.unwrap();
        let mut b = broker.subscribe("b").await.unwrap();

        assert_eq!(broker.publish("a", Bytes::from_static(b"one")).await.unwrap(), 1);
        assert_eq!(broker.publish("b", Bytes::from_static(b"two")).await.unwrap(), 1);

        assert_eq!(a.next().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(b.next().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(a.topic(), "a");
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_released_and_pruned() {
        let broker = BroadcastBroker::default();
        let subscription = broker.subscribe("t").await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 1);

        drop(subscription);
        assert_eq!(broker.subscriber_count("t"), 0);
        assert_eq!(broker.total_topics(), 0);

        assert_eq!(broker.publish("t", Bytes::from_static(b"x")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_topic_survives_until_last_subscription_drops() {
        let broker = BroadcastBroker::default();
        let first = broker.subscribe("t").await.unwrap();
        let mut second = broker.subscribe("t").await.unwrap();

        drop(first);
        assert_eq!(broker.total_topics(), 1);
        assert_eq!(broker.publish("t", Bytes::from_static(b"x")).await.unwrap(), 1);
        assert_eq!(second.next().await.unwrap(), Bytes::from_static(b"x"));

        drop(second);
        assert_eq!(broker.total_topics(), 0);
    }

    #[tokio::test]
    async fn test_close_topic_ends_subscriptions() {
        let broker = BroadcastBroker::default();
        let mut subscription = broker.subscribe("t").await.unwrap();

        assert!(broker.close_topic("t"));
        assert!(subscription.next().await.is_none());
        assert!(!broker.close_topic("t"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_missed_messages() {
        let broker = BroadcastBroker::new(2);
        let mut subscription = broker.subscribe("t").await.unwrap();

        for i in 0..5u8 {
            broker.publish("t", Bytes::from(vec![i])).await.unwrap();
        }

        // Oldest messages were overwritten, the stream resumes at the buffer
        assert_eq!(subscription.next().await.unwrap(), Bytes::from(vec![3u8]));
        assert_eq!(subscription.next().await.unwrap(), Bytes::from(vec![4u8]));
    }
}
