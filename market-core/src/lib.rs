//! Core types for the prediction market service
//!
//! This crate defines the shared data structures used across the service,
//! including markets with their options and liquidity pools, the lifecycle
//! status state machine, and the live-stream event protocol.

pub mod error;
pub mod market;
pub mod request;
pub mod status;
pub mod stream;

pub use error::{MarketError, MarketResult};
pub use market::{LiquidityPool, LiquidityUpdate, Market, MarketOption};
pub use request::{
    CreateMarketRequest, MarketListResponse, UpdateLiquidityPoolRequest, UpdateMarketRequest,
};
pub use status::MarketStatus;
pub use stream::StreamEvent;
