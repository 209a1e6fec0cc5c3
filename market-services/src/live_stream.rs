//! Per-client liquidity streams
//!
//! Each open stream owns a dedicated topic subscription and a relay task
//! that forwards updates for one market, interleaved with keepalive pings.
//! The subscription is released as soon as the client goes away.

use futures::StreamExt;
use market_core::{LiquidityUpdate, MarketResult, StreamEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::broker::TopicSubscription;
use crate::market_service::MarketService;
use crate::publisher::LiquidityPublisher;

/// Idle interval after which a ping is sent
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Events buffered per client before the relay waits on it
const CLIENT_BUFFER: usize = 32;

/// Ordered events for one client: `connected` first, then updates and pings
pub type LiquidityEventStream = ReceiverStream<StreamEvent>;

/// Opens live liquidity streams for existing markets
#[derive(Clone)]
pub struct LiquidityStreamer {
    markets: MarketService,
    publisher: LiquidityPublisher,
    keepalive: Duration,
}

impl LiquidityStreamer {
    pub fn new(markets: MarketService, keepalive: Duration) -> Self {
        let publisher = markets.publisher().clone();
        Self {
            markets,
            publisher,
            keepalive,
        }
    }

    /// Open a stream for `market_id`
    ///
    /// Fails with NotFound before subscribing if the market does not exist.
    #[instrument(skip(self))]
    pub async fn open(&self, market_id: &str) -> MarketResult<LiquidityEventStream> {
        self.markets.get_market(market_id).await?;

        let subscription = self.publisher.subscribe(market_id).await?;
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);

        info!("Opened liquidity stream for {}", market_id);
        tokio::spawn(relay(
            market_id.to_string(),
            subscription,
            tx,
            self.keepalive,
        ));

        Ok(ReceiverStream::new(rx))
    }
}

impl std::fmt::Debug for LiquidityStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidityStreamer")
            .field("keepalive", &self.keepalive)
            .finish_non_exhaustive()
    }
}

/// Forward one market's updates to a client until either side goes away
async fn relay(
    market_id: String,
    mut subscription: TopicSubscription,
    tx: mpsc::Sender<StreamEvent>,
    keepalive: Duration,
) {
    if tx.send(StreamEvent::connected(&market_id)).await.is_err() {
        return;
    }

    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Client left liquidity stream for {}", market_id);
                break;
            }
            payload = subscription.next() => {
                let Some(payload) = payload else {
                    debug!("Topic {} closed", subscription.topic());
                    break;
                };

                match serde_json::from_slice::<LiquidityUpdate>(&payload) {
                    Ok(update) if update.market_id == market_id => {
                        if tx.send(update.into()).await.is_err() {
                            break;
                        }
                        ticker.reset();
                    }
                    Ok(update) => {
                        warn!(
                            "Dropping update for {} received on {}",
                            update.market_id,
                            subscription.topic()
                        );
                    }
                    Err(e) => {
                        warn!("Dropping malformed payload on {}: {}", subscription.topic(), e);
                    }
                }
            }
            _ = ticker.tick() => {
                if tx.send(StreamEvent::ping()).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("Closed liquidity stream for {}", market_id);
}
