//! Persistence gateway for markets, their options and liquidity pools
//!
//! All multi-row writes commit atomically. Reads return each market with
//! the children that were committed for the row version that was read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{LiquidityPool, Market, MarketError, MarketStatus, UpdateMarketRequest};
use rust_decimal::Decimal;

/// Transactional storage of markets, options and liquidity pools
#[async_trait]
pub trait MarketRepository: Send + Sync {
    /// Create tables and indexes. Safe to run on every startup.
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Insert the market row together with its options and pools, all or nothing
    async fn create_market(&self, market: &Market) -> Result<Committed<()>, StoreError>;

    /// Fetch a market with its options and pools, `None` if absent
    async fn get_market(&self, market_id: &str) -> Result<Option<Market>, StoreError>;

    /// All markets (children populated), optionally filtered, newest first
    async fn list_markets(&self, status: Option<MarketStatus>)
        -> Result<Vec<Market>, StoreError>;

    /// Apply the fields present in `update` and refresh `updated_at`
    ///
    /// Returns the market as committed by this write, `None` when no market
    /// row was affected.
    async fn update_market(
        &self,
        market_id: &str,
        update: &UpdateMarketRequest,
        updated_at: DateTime<Utc>,
    ) -> Result<Committed<Option<Market>>, StoreError>;

    /// Current pools of a market, in option order
    async fn get_liquidity_pools(&self, market_id: &str) -> Result<Vec<LiquidityPool>, StoreError>;

    /// Single-row update of one pool's value
    ///
    /// Returns the market's pools as committed by this write, `None` when no
    /// pool with that id belongs to the market.
    async fn update_liquidity_pool(
        &self,
        market_id: &str,
        pool_id: &str,
        pool_value: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<Committed<Option<Vec<LiquidityPool>>>, StoreError>;
}

/// Result of a write, tagged with its position in the store's commit order
///
/// A higher `sequence` always belongs to a later commit, so snapshots of the
/// same market can be ordered by it.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub sequence: u64,
    pub value: T,
}

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    #[error("Corrupt row in {table}: {message}")]
    Corrupt {
        table: &'static str,
        message: String,
    },

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn corrupt(table: &'static str, message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            table,
            message: message.into(),
        }
    }
}

impl From<StoreError> for MarketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { .. } | StoreError::Task(_) => {
                MarketError::internal(err.to_string())
            }
            _ => MarketError::storage(err.to_string()),
        }
    }
}
