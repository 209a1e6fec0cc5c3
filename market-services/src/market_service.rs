//! Market lifecycle service
//!
//! Validates requests, assigns identifiers, enforces the status state
//! machine and orchestrates storage commits followed by liquidity
//! broadcasts. Broadcast failures are logged and never fail the operation.
//!
//! Snapshots of one market are published in commit order: a snapshot
//! older than one already published for that market is dropped.

use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use market_core::{
    CreateMarketRequest, LiquidityPool, Market, MarketError, MarketOption, MarketResult,
    MarketStatus, UpdateMarketRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::publisher::LiquidityPublisher;
use crate::repository::{Committed, MarketRepository};

/// Service for creating, querying and transitioning markets
#[derive(Clone)]
pub struct MarketService {
    repo: Arc<dyn MarketRepository>,
    publisher: LiquidityPublisher,
    /// Map of market id -> sequence of the last snapshot published
    published: Arc<DashMap<String, Arc<Mutex<u64>>>>,
}

impl MarketService {
    /// Create a new market service
    pub fn new(repo: Arc<dyn MarketRepository>, publisher: LiquidityPublisher) -> Self {
        Self {
            repo,
            publisher,
            published: Arc::new(DashMap::new()),
        }
    }

    pub fn publisher(&self) -> &LiquidityPublisher {
        &self.publisher
    }

    /// Create a market in `draft` with one zero-valued pool per option
    #[instrument(skip(self, req), fields(title = %req.title))]
    pub async fn create_market(&self, req: CreateMarketRequest) -> MarketResult<Market> {
        req.validate()?;

        let now = storage_now();
        let market_id = new_id();

        let options: Vec<MarketOption> = req
            .options
            .iter()
            .map(|title| MarketOption::new(new_id(), &market_id, title.as_str(), now))
            .collect();

        let liquidity_pools: Vec<LiquidityPool> = options
            .iter()
            .map(|option| LiquidityPool::empty(new_id(), option, now))
            .collect();

        let market = Market {
            id: market_id,
            title: req.title,
            description: req.description,
            status: MarketStatus::Draft,
            resolution_datetime: req.resolution_datetime.map(|at| at.trunc_subsecs(6)),
            winning_option_id: None,
            options,
            liquidity_pools,
            created_at: now,
            updated_at: now,
        };

        let committed = self.repo.create_market(&market).await?;
        info!(
            "Created market {} with {} options",
            market.id,
            market.options.len()
        );

        self.broadcast(
            &market.id,
            committed.sequence,
            market.liquidity_pools.clone(),
            "market creation",
        )
        .await;

        Ok(market)
    }

    /// Get a single market with its options and pools
    #[instrument(skip(self))]
    pub async fn get_market(&self, market_id: &str) -> MarketResult<Market> {
        self.repo
            .get_market(market_id)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("market {}", market_id)))
    }

    /// List markets, newest first, optionally filtered by status
    #[instrument(skip(self))]
    pub async fn list_markets(&self, status: Option<MarketStatus>) -> MarketResult<Vec<Market>> {
        let markets = self.repo.list_markets(status).await?;
        debug!("Listed {} markets", markets.len());
        Ok(markets)
    }

    /// Apply a partial update
    ///
    /// A status change is checked against the market's stored status. Two
    /// concurrent updates are not serialized here: the last write wins.
    #[instrument(skip(self))]
    pub async fn update_market(
        &self,
        market_id: &str,
        req: UpdateMarketRequest,
    ) -> MarketResult<Market> {
        if req.status.is_some() || req.winning_option_id.is_some() {
            let current = self.get_market(market_id).await?;

            if let Some(to) = req.status {
                current.status.validate_transition(to)?;
            }

            if let Some(winning_option_id) = &req.winning_option_id {
                if !current.has_option(winning_option_id) {
                    return Err(MarketError::validation(format!(
                        "winning option {} does not belong to market {}",
                        winning_option_id, market_id
                    )));
                }
            }
        }

        let req = UpdateMarketRequest {
            resolution_datetime: req.resolution_datetime.map(|at| at.trunc_subsecs(6)),
            ..req
        };

        let Committed { sequence, value } = self
            .repo
            .update_market(market_id, &req, storage_now())
            .await?;
        let market =
            value.ok_or_else(|| MarketError::not_found(format!("market {}", market_id)))?;
        info!("Updated market {} (status: {})", market.id, market.status);

        self.broadcast(
            &market.id,
            sequence,
            market.liquidity_pools.clone(),
            "market update",
        )
        .await;

        Ok(market)
    }

    /// Set one pool's value and broadcast the market's refreshed pools
    #[instrument(skip(self))]
    pub async fn update_liquidity_pool(
        &self,
        market_id: &str,
        pool_id: &str,
        pool_value: Decimal,
    ) -> MarketResult<Vec<LiquidityPool>> {
        if pool_value.is_sign_negative() && !pool_value.is_zero() {
            return Err(MarketError::validation("pool_value must be non-negative"));
        }

        let Committed { sequence, value } = self
            .repo
            .update_liquidity_pool(market_id, pool_id, pool_value, storage_now())
            .await?;
        let pools = value.ok_or_else(|| {
            MarketError::not_found(format!(
                "liquidity pool {} in market {}",
                pool_id, market_id
            ))
        })?;
        debug!("Pool {} in market {} set to {}", pool_id, market_id, pool_value);

        self.broadcast(market_id, sequence, pools.clone(), "liquidity update")
            .await;

        Ok(pools)
    }

    /// Broadcast the snapshot committed at `sequence`, logging instead of failing
    ///
    /// Skipped when a later commit of the same market was already published.
    async fn broadcast(
        &self,
        market_id: &str,
        sequence: u64,
        pools: Vec<LiquidityPool>,
        action: &str,
    ) {
        let gate = self
            .published
            .entry(market_id.to_string())
            .or_default()
            .clone();
        let mut last_published = gate.lock().await;

        if sequence <= *last_published {
            debug!(
                "Skipping stale {} for {} (commit {} <= {})",
                action, market_id, sequence, *last_published
            );
            return;
        }
        *last_published = sequence;

        if let Err(e) = self.publisher.publish(market_id, pools).await {
            warn!("Failed to publish {} for {}: {}", action, market_id, e);
        }
    }
}

impl std::fmt::Debug for MarketService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketService")
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time at the precision the store keeps
fn storage_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BroadcastBroker, BrokerError, TopicBroker, TopicSubscription};
    use crate::market_store::SqliteMarketStore;
    use crate::publisher::liquidity_topic;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use market_core::LiquidityUpdate;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    /// Broker whose backend is always down
    struct UnavailableBroker;

    #[async_trait]
    impl TopicBroker for UnavailableBroker {
        async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<usize, BrokerError> {
            Err(BrokerError::Unavailable("connection refused".to_string()))
        }

        async fn subscribe(&self, _topic: &str) -> Result<TopicSubscription, BrokerError> {
            Err(BrokerError::Unavailable("connection refused".to_string()))
        }
    }

    fn service_with_broker(broker: Arc<dyn TopicBroker>) -> MarketService {
        let store = SqliteMarketStore::new_in_memory().unwrap();
        MarketService::new(Arc::new(store), LiquidityPublisher::new(broker))
    }

    fn test_service() -> (MarketService, Arc<BroadcastBroker>) {
        let broker = Arc::new(BroadcastBroker::default());
        (service_with_broker(broker.clone()), broker)
    }

    fn create_request(options: &[&str]) -> CreateMarketRequest {
        CreateMarketRequest {
            title: "Will BTC close above 100k?".to_string(),
            description: "Resolves on the daily close".to_string(),
            resolution_datetime: None,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// Shortest path from draft to each status
    fn path_to(status: MarketStatus) -> Vec<MarketStatus> {
        match status {
            MarketStatus::Draft => vec![],
            MarketStatus::Active => vec![MarketStatus::Active],
            MarketStatus::Hidden => vec![MarketStatus::Hidden],
            MarketStatus::Resolving => vec![MarketStatus::Active, MarketStatus::Resolving],
            MarketStatus::Resolved => vec![
                MarketStatus::Active,
                MarketStatus::Resolving,
                MarketStatus::Resolved,
            ],
        }
    }

    async fn market_in(service: &MarketService, status: MarketStatus) -> Market {
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        for step in path_to(status) {
            service
                .update_market(&market.id, UpdateMarketRequest::with_status(step))
                .await
                .unwrap();
        }
        service.get_market(&market.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_market_builds_draft_with_empty_pools() {
        let (service, _) = test_service();
        let market = service
            .create_market(create_request(&["Yes", "No", "Maybe"]))
            .await
            .unwrap();

        assert_eq!(market.status, MarketStatus::Draft);
        assert_eq!(market.options.len(), 3);
        assert_eq!(market.liquidity_pools.len(), 3);
        for option in &market.options {
            let pool = market.pool_for_option(&option.id).unwrap();
            assert!(pool.pool_value.is_zero());
            assert_eq!(pool.market_id, market.id);
        }
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let (service, _) = test_service();
        let request = create_request(&["Yes", "No"]);
        let created = service.create_market(request.clone()).await.unwrap();

        let fetched = service.get_market(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.title, request.title);
        assert_eq!(fetched.description, request.description);
        let titles: Vec<&str> = fetched.options.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles, vec!["Yes", "No"]);
        assert!(fetched.liquidity_pools.iter().all(|p| p.pool_value.is_zero()));
    }

    #[tokio::test]
    async fn test_invalid_create_writes_nothing() {
        let (service, _) = test_service();
        let mut no_title = create_request(&["Yes", "No"]);
        no_title.title = String::new();
        let mut no_description = create_request(&["Yes", "No"]);
        no_description.description = String::new();

        for request in [create_request(&["Yes"]), no_title, no_description] {
            let err = service.create_market(request).await.unwrap_err();
            assert!(matches!(err, MarketError::Validation(_)));
        }

        assert!(service.list_markets(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_broadcasts_snapshot() {
        let (service, broker) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let mut subscription = broker.subscribe(&liquidity_topic(&market.id)).await.unwrap();

        service
            .update_market(&market.id, UpdateMarketRequest::with_status(MarketStatus::Active))
            .await
            .unwrap();

        let payload = subscription.next().await.unwrap();
        let update: LiquidityUpdate = serde_json::from_slice(&payload).unwrap();
        assert_eq!(update.market_id, market.id);
        assert_eq!(update.liquidity_pools.len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_not_fatal() {
        let service = service_with_broker(Arc::new(UnavailableBroker));

        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let updated = service
            .update_market(&market.id, UpdateMarketRequest::with_status(MarketStatus::Active))
            .await
            .unwrap();
        assert_eq!(updated.status, MarketStatus::Active);

        let pools = service
            .update_liquidity_pool(&market.id, &market.liquidity_pools[0].id, dec!(10))
            .await
            .unwrap();
        assert_eq!(pools[0].pool_value, dec!(10));
    }

    #[tokio::test]
    async fn test_allowed_transitions_succeed() {
        let (service, _) = test_service();
        for from in MarketStatus::ALL {
            for &to in from.allowed_transitions() {
                let market = market_in(&service, from).await;
                let updated = service
                    .update_market(&market.id, UpdateMarketRequest::with_status(to))
                    .await
                    .unwrap();
                assert_eq!(updated.status, to);
                assert_eq!(service.get_market(&market.id).await.unwrap().status, to);
            }
        }
    }

    #[tokio::test]
    async fn test_disallowed_transitions_fail_and_keep_status() {
        let (service, _) = test_service();
        for from in MarketStatus::ALL {
            for to in MarketStatus::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let market = market_in(&service, from).await;
                let err = service
                    .update_market(&market.id, UpdateMarketRequest::with_status(to))
                    .await
                    .unwrap_err();
                assert!(
                    matches!(err, MarketError::InvalidTransition { .. }),
                    "{} -> {}: {:?}",
                    from,
                    to,
                    err
                );

                let stored = service.get_market(&market.id).await.unwrap();
                assert_eq!(stored.status, from);
                assert_eq!(stored.updated_at, market.updated_at);
            }
        }
    }

    #[tokio::test]
    async fn test_update_missing_market_is_not_found() {
        let (service, _) = test_service();

        let err = service
            .update_market("nonexistent-id", UpdateMarketRequest::with_status(MarketStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));

        let err = service
            .update_market("nonexistent-id", UpdateMarketRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));

        let err = service.get_market("nonexistent-id").await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_winning_option_must_belong_to_market() {
        let (service, _) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let other = service.create_market(create_request(&["Up", "Down"])).await.unwrap();

        let foreign = UpdateMarketRequest {
            winning_option_id: Some(other.options[0].id.clone()),
            ..UpdateMarketRequest::default()
        };
        let err = service.update_market(&market.id, foreign).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let own = UpdateMarketRequest {
            winning_option_id: Some(market.options[1].id.clone()),
            ..UpdateMarketRequest::default()
        };
        let updated = service.update_market(&market.id, own).await.unwrap();
        assert_eq!(updated.winning_option_id.as_deref(), Some(market.options[1].id.as_str()));
        assert_eq!(updated.status, MarketStatus::Draft);
    }

    #[tokio::test]
    async fn test_resolution_time_update_leaves_status() {
        let (service, _) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let resolves_at = Utc::now().trunc_subsecs(6) + chrono::Duration::days(30);

        let updated = service
            .update_market(
                &market.id,
                UpdateMarketRequest {
                    resolution_datetime: Some(resolves_at),
                    ..UpdateMarketRequest::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.resolution_datetime, Some(resolves_at));
        assert_eq!(updated.status, MarketStatus::Draft);
        assert!(updated.updated_at >= market.updated_at);
    }

    #[tokio::test]
    async fn test_list_filters_by_status_newest_first() {
        let (service, _) = test_service();
        let first = market_in(&service, MarketStatus::Active).await;
        let _draft = market_in(&service, MarketStatus::Draft).await;
        let second = market_in(&service, MarketStatus::Active).await;

        let active = service.list_markets(Some(MarketStatus::Active)).await.unwrap();
        let ids: Vec<&str> = active.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
        assert!(active.iter().all(|m| m.status == MarketStatus::Active));

        assert_eq!(service.list_markets(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_pool_update_scenario() {
        let (service, broker) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let yes = market.option_by_title("Yes").unwrap().clone();
        let no = market.option_by_title("No").unwrap().clone();
        let yes_pool = market.pool_for_option(&yes.id).unwrap().id.clone();

        let mut subscription = broker.subscribe(&liquidity_topic(&market.id)).await.unwrap();

        service
            .update_liquidity_pool(&market.id, &yes_pool, dec!(150.5))
            .await
            .unwrap();

        let fetched = service.get_market(&market.id).await.unwrap();
        assert_eq!(fetched.pool_for_option(&yes.id).unwrap().pool_value, dec!(150.5));
        assert_eq!(fetched.pool_for_option(&no.id).unwrap().pool_value, Decimal::ZERO);

        let payload = subscription.next().await.unwrap();
        let update: LiquidityUpdate = serde_json::from_slice(&payload).unwrap();
        assert_eq!(update.liquidity_pools.len(), 2);
        assert_eq!(update.value_for_option(&yes.id), Some(dec!(150.5)));
        assert_eq!(update.value_for_option(&no.id), Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_older_snapshot_is_not_published_after_newer() {
        let (service, broker) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let mut subscription = broker.subscribe(&liquidity_topic(&market.id)).await.unwrap();

        let mut newer = market.liquidity_pools.clone();
        newer[0].pool_value = dec!(2);
        let mut older = market.liquidity_pools.clone();
        older[0].pool_value = dec!(1);

        service.broadcast(&market.id, 100, newer.clone(), "test").await;
        service.broadcast(&market.id, 99, older, "test").await;

        let payload = subscription.next().await.unwrap();
        let update: LiquidityUpdate = serde_json::from_slice(&payload).unwrap();
        assert_eq!(update.liquidity_pools, newer);

        let next = tokio::time::timeout(Duration::from_millis(100), subscription.next()).await;
        assert!(next.is_err(), "stale snapshot was published");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pool_updates_end_on_stored_state() {
        let (service, broker) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let mut subscription = broker.subscribe(&liquidity_topic(&market.id)).await.unwrap();

        let handles: Vec<_> = (1..=20u32)
            .map(|i| {
                let service = service.clone();
                let market_id = market.id.clone();
                let pool_id = market.liquidity_pools[(i % 2) as usize].id.clone();
                tokio::spawn(async move {
                    service
                        .update_liquidity_pool(&market_id, &pool_id, Decimal::from(i))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut relayed = Vec::new();
        while let Ok(Some(payload)) =
            tokio::time::timeout(Duration::from_millis(200), subscription.next()).await
        {
            let update: LiquidityUpdate = serde_json::from_slice(&payload).unwrap();
            relayed.push(update.liquidity_pools);
        }

        let stored = service.get_market(&market.id).await.unwrap().liquidity_pools;
        assert!(!relayed.is_empty());
        assert_eq!(relayed.last(), Some(&stored));
    }

    #[tokio::test]
    async fn test_pool_update_rejects_negative_and_unknown() {
        let (service, _) = test_service();
        let market = service.create_market(create_request(&["Yes", "No"])).await.unwrap();
        let pool_id = market.liquidity_pools[0].id.clone();

        let err = service
            .update_liquidity_pool(&market.id, &pool_id, dec!(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let err = service
            .update_liquidity_pool(&market.id, "missing-pool", dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));

        let unchanged = service.get_market(&market.id).await.unwrap();
        assert!(unchanged.liquidity_pools.iter().all(|p| p.pool_value.is_zero()));
    }
}
