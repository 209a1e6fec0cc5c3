//! Market data structures: markets, their options and liquidity pools

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::status::MarketStatus;

/// A prediction market: a question with mutually exclusive outcome options
///
/// The market exclusively owns its options and liquidity pools; both are
/// removed together with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Opaque unique identifier, assigned at creation
    pub id: String,

    /// The question being asked
    pub title: String,

    /// Detailed description and resolution criteria
    pub description: String,

    /// Current lifecycle status
    pub status: MarketStatus,

    /// When the market is expected to resolve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_datetime: Option<DateTime<Utc>>,

    /// The winning option, once resolved. Always one of `options`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_option_id: Option<String>,

    /// Outcome options in creation order
    #[serde(default)]
    pub options: Vec<MarketOption>,

    /// One pool per option, in the same order as `options`
    #[serde(default)]
    pub liquidity_pools: Vec<LiquidityPool>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// Whether `option_id` refers to one of this market's own options
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    /// Find an option by its title
    pub fn option_by_title(&self, title: &str) -> Option<&MarketOption> {
        self.options.iter().find(|o| o.title == title)
    }

    /// Get the liquidity pool backing an option
    pub fn pool_for_option(&self, option_id: &str) -> Option<&LiquidityPool> {
        self.liquidity_pools.iter().find(|p| p.option_id == option_id)
    }
}

/// One possible outcome of a market. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOption {
    pub id: String,
    pub market_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl MarketOption {
    pub fn new(
        id: impl Into<String>,
        market_id: impl Into<String>,
        title: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            market_id: market_id.into(),
            title: title.into(),
            created_at,
        }
    }
}

/// Liquidity tracked for a single option (1:1 with `MarketOption`)
///
/// The value is opaque here: no pricing curve is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub id: String,
    pub market_id: String,
    pub option_id: String,
    /// Non-negative pooled value
    pub pool_value: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl LiquidityPool {
    /// Create the initial, empty pool for an option
    pub fn empty(
        id: impl Into<String>,
        option: &MarketOption,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            market_id: option.market_id.clone(),
            option_id: option.id.clone(),
            pool_value: Decimal::ZERO,
            updated_at,
        }
    }
}

/// Snapshot of a market's pools, broadcast on its topic. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityUpdate {
    pub market_id: String,
    pub liquidity_pools: Vec<LiquidityPool>,
    pub timestamp: DateTime<Utc>,
}

impl LiquidityUpdate {
    /// Snapshot the given pools at the current time
    pub fn snapshot(market_id: impl Into<String>, liquidity_pools: Vec<LiquidityPool>) -> Self {
        Self {
            market_id: market_id.into(),
            liquidity_pools,
            timestamp: Utc::now(),
        }
    }

    /// Get the pool value for an option, if present in the snapshot
    pub fn value_for_option(&self, option_id: &str) -> Option<Decimal> {
        self.liquidity_pools
            .iter()
            .find(|p| p.option_id == option_id)
            .map(|p| p.pool_value)
    }
}
