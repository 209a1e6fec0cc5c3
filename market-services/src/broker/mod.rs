//! Topic-based publish/subscribe
//!
//! Delivery is fire-and-forget: no retry, no persistence of missed
//! messages, no acknowledgment. Any topic broker can back the service by
//! implementing [`TopicBroker`].

mod memory;

pub use memory::BroadcastBroker;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use market_core::MarketError;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Default per-topic buffer for the in-process broker
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Capability to broadcast payloads on dynamically named topics
#[async_trait]
pub trait TopicBroker: Send + Sync {
    /// Broadcast a payload, returning how many subscribers it reached
    ///
    /// Publishing to a topic nobody listens on is a no-op, not an error.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, BrokerError>;

    /// Open a dedicated subscription to a topic
    ///
    /// Dropping the returned subscription releases it.
    async fn subscribe(&self, topic: &str) -> Result<TopicSubscription, BrokerError>;
}

/// Stream of raw payloads received on one topic
///
/// Ends when the broker closes the topic.
pub struct TopicSubscription {
    topic: String,
    inner: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
}

impl TopicSubscription {
    pub fn new(
        topic: impl Into<String>,
        inner: impl Stream<Item = Bytes> + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            inner: Box::pin(inner),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Stream for TopicSubscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("topic", &self.topic)
            .finish()
    }
}

/// Errors raised by a topic backend
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported broker URL: {0}")]
    UnsupportedUrl(String),
}

impl From<BrokerError> for MarketError {
    fn from(err: BrokerError) -> Self {
        MarketError::notification(err.to_string())
    }
}

/// Build a broker from its connection string
///
/// `memory://` selects the in-process [`BroadcastBroker`].
pub fn connect(url: &str, capacity: usize) -> Result<Arc<BroadcastBroker>, BrokerError> {
    match url.split_once("://") {
        Some(("memory", _)) => Ok(Arc::new(BroadcastBroker::new(capacity))),
        _ => Err(BrokerError::UnsupportedUrl(url.to_string())),
    }
}
