//! Live stream event types
//!
//! These types define the server-push protocol for per-market liquidity
//! streams. Each event has a name and a JSON data payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::LiquidityUpdate;

/// Events pushed to a live stream client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Sent once, right after the subscription is established
    Connected {
        market_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A relayed pool snapshot
    LiquidityUpdate(LiquidityUpdate),
    /// Keepalive, sent after an idle interval
    Ping { timestamp: DateTime<Utc> },
}

impl StreamEvent {
    pub const CONNECTED: &'static str = "connected";
    pub const LIQUIDITY_UPDATE: &'static str = "liquidity-update";
    pub const PING: &'static str = "ping";

    pub fn connected(market_id: impl Into<String>) -> Self {
        StreamEvent::Connected {
            market_id: market_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn ping() -> Self {
        StreamEvent::Ping {
            timestamp: Utc::now(),
        }
    }

    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => Self::CONNECTED,
            StreamEvent::LiquidityUpdate(_) => Self::LIQUIDITY_UPDATE,
            StreamEvent::Ping { .. } => Self::PING,
        }
    }
}

impl From<LiquidityUpdate> for StreamEvent {
    fn from(update: LiquidityUpdate) -> Self {
        StreamEvent::LiquidityUpdate(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_payload() {
        let event = StreamEvent::connected("mkt-1");
        assert_eq!(event.event_name(), "connected");

        let data = serde_json::to_value(&event).unwrap();
        assert_eq!(data["market_id"], "mkt-1");
        assert!(data["timestamp"].is_string());
    }

    #[test]
    fn test_ping_payload_has_only_timestamp() {
        let event = StreamEvent::ping();
        assert_eq!(event.event_name(), "ping");

        let data = serde_json::to_value(&event).unwrap();
        let object = data.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert!(object.contains_key("timestamp"));
    }

    #[test]
    fn test_update_payload_is_the_snapshot() {
        let update = LiquidityUpdate::snapshot("mkt-1", Vec::new());
        let event = StreamEvent::from(update.clone());
        assert_eq!(event.event_name(), "liquidity-update");

        let decoded: LiquidityUpdate =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(decoded, update);
    }
}
