//! Error types for the market service

use thiserror::Error;

use crate::status::MarketStatus;

/// Service-wide error type
#[derive(Error, Debug)]
pub enum MarketError {
    /// Bad input, detected before any storage access
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested status change is not in the transition table
    #[error("Invalid status transition: cannot transition from {from} to {to}")]
    InvalidTransition { from: MarketStatus, to: MarketStatus },

    #[error("Storage error: {0}")]
    Storage(String),

    /// Topic backend failure. Never fails the operation that triggered it.
    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MarketError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        MarketError::NotFound(msg.into())
    }

    pub fn invalid_transition(from: MarketStatus, to: MarketStatus) -> Self {
        MarketError::InvalidTransition { from, to }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        MarketError::Storage(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        MarketError::Notification(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MarketError::Internal(msg.into())
    }
}

/// Result type alias for market operations
pub type MarketResult<T> = Result<T, MarketError>;
