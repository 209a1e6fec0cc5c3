//! Request and response payloads for market operations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};
use crate::market::Market;
use crate::status::MarketStatus;

/// Minimum number of outcome options a market must have
pub const MIN_OPTIONS: usize = 2;

/// Payload for creating a new market
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMarketRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_datetime: Option<DateTime<Utc>>,
    /// Option titles, one option (and pool) is created per entry
    #[serde(default)]
    pub options: Vec<String>,
}

impl CreateMarketRequest {
    /// Check the request without touching storage
    pub fn validate(&self) -> MarketResult<()> {
        if self.title.trim().is_empty() {
            return Err(MarketError::validation("title is required"));
        }
        if self.description.trim().is_empty() {
            return Err(MarketError::validation("description is required"));
        }
        if self.options.len() < MIN_OPTIONS {
            return Err(MarketError::validation(format!(
                "at least {} options are required",
                MIN_OPTIONS
            )));
        }
        if let Some(index) = self.options.iter().position(|o| o.trim().is_empty()) {
            return Err(MarketError::validation(format!(
                "option {} has an empty title",
                index + 1
            )));
        }
        Ok(())
    }
}

/// Partial update of a market. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMarketRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MarketStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_option_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_datetime: Option<DateTime<Utc>>,
}

impl UpdateMarketRequest {
    pub fn with_status(status: MarketStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Payload for setting a single pool's value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLiquidityPoolRequest {
    pub pool_value: Decimal,
}

/// Response for market listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketListResponse {
    pub markets: Vec<Market>,
    pub total: usize,
}

impl From<Vec<Market>> for MarketListResponse {
    fn from(markets: Vec<Market>) -> Self {
        let total = markets.len();
        Self { markets, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, description: &str, options: &[&str]) -> CreateMarketRequest {
        CreateMarketRequest {
            title: title.to_string(),
            description: description.to_string(),
            resolution_datetime: None,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request("Will it rain?", "Tomorrow", &["Yes", "No"]).validate().is_ok());
    }

    #[test]
    fn test_rejects_missing_fields() {
        let cases = [
            request("", "desc", &["Yes", "No"]),
            request("   ", "desc", &["Yes", "No"]),
            request("title", "", &["Yes", "No"]),
            request("title", "desc", &["Yes"]),
            request("title", "desc", &[]),
            request("title", "desc", &["Yes", " "]),
        ];
        for case in cases {
            assert!(
                matches!(case.validate(), Err(MarketError::Validation(_))),
                "{:?}",
                case
            );
        }
    }

    #[test]
    fn test_missing_json_fields_default_to_invalid() {
        let req: CreateMarketRequest = serde_json::from_str(r#"{"title": "t"}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_request_parses_partial_body() {
        let req: UpdateMarketRequest = serde_json::from_str(r#"{"status": "active"}"#).unwrap();
        assert_eq!(req, UpdateMarketRequest::with_status(MarketStatus::Active));

        let empty: UpdateMarketRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, UpdateMarketRequest::default());
    }

    #[test]
    fn test_pool_value_accepts_number_or_string() {
        let from_number: UpdateLiquidityPoolRequest =
            serde_json::from_str(r#"{"pool_value": 150.5}"#).unwrap();
        let from_string: UpdateLiquidityPoolRequest =
            serde_json::from_str(r#"{"pool_value": "150.5"}"#).unwrap();
        assert_eq!(from_number.pool_value, from_string.pool_value);
    }
}
