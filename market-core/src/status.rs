//! Market lifecycle status and its transition table

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MarketError, MarketResult};

/// Lifecycle status of a market
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    /// Newly created, not visible to traders
    #[default]
    Draft,
    /// Open for trading
    Active,
    /// Temporarily withdrawn from listings
    Hidden,
    /// Trading closed, outcome being determined
    Resolving,
    /// Outcome final. Terminal.
    Resolved,
}

impl MarketStatus {
    pub const ALL: [MarketStatus; 5] = [
        MarketStatus::Draft,
        MarketStatus::Active,
        MarketStatus::Hidden,
        MarketStatus::Resolving,
        MarketStatus::Resolved,
    ];

    /// Storage / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Draft => "draft",
            MarketStatus::Active => "active",
            MarketStatus::Hidden => "hidden",
            MarketStatus::Resolving => "resolving",
            MarketStatus::Resolved => "resolved",
        }
    }

    /// Statuses reachable from this one in a single update
    pub fn allowed_transitions(&self) -> &'static [MarketStatus] {
        match self {
            MarketStatus::Draft => &[MarketStatus::Active, MarketStatus::Hidden],
            MarketStatus::Active => &[MarketStatus::Hidden, MarketStatus::Resolving],
            MarketStatus::Hidden => &[MarketStatus::Active, MarketStatus::Draft],
            MarketStatus::Resolving => &[MarketStatus::Resolved],
            MarketStatus::Resolved => &[],
        }
    }

    pub fn can_transition_to(&self, to: MarketStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Check a transition against the table, failing with `InvalidTransition`
    pub fn validate_transition(&self, to: MarketStatus) -> MarketResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(MarketError::invalid_transition(*self, to))
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MarketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(MarketStatus::Draft),
            "active" => Ok(MarketStatus::Active),
            "hidden" => Ok(MarketStatus::Hidden),
            "resolving" => Ok(MarketStatus::Resolving),
            "resolved" => Ok(MarketStatus::Resolved),
            _ => Err(format!("Unknown market status: {}", s)),
        }
    }
}
