//! Business logic services for the prediction market metadata service
//!
//! This crate owns persistence, the market lifecycle state machine,
//! liquidity broadcasts and per-client live streams.

pub mod broker;
pub mod live_stream;
pub mod market_service;
pub mod market_store;
pub mod publisher;
pub mod repository;

pub use broker::{BroadcastBroker, BrokerError, TopicBroker, TopicSubscription};
pub use live_stream::{LiquidityEventStream, LiquidityStreamer, DEFAULT_KEEPALIVE};
pub use market_service::MarketService;
pub use market_store::SqliteMarketStore;
pub use publisher::{liquidity_topic, LiquidityPublisher};
pub use repository::{Committed, MarketRepository, StoreError};
