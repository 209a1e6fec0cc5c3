//! Market lifecycle endpoints

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use market_core::{
    CreateMarketRequest, LiquidityUpdate, Market, MarketListResponse, MarketStatus,
    UpdateLiquidityPoolRequest, UpdateMarketRequest,
};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

/// Query parameters for listing markets
#[derive(Debug, Deserialize)]
pub struct ListMarketsQuery {
    /// Filter by lifecycle status
    pub status: Option<String>,
}

impl ListMarketsQuery {
    fn status_filter(&self) -> Result<Option<MarketStatus>, ApiError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(ApiError::InvalidQuery),
        }
    }
}

/// Create market routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/markets", get(list_markets).post(create_market))
        .route("/markets/{id}", get(get_market).put(update_market))
        .route("/markets/{id}/pools/{pool_id}", put(update_liquidity_pool))
}

async fn create_market(
    State(state): State<AppState>,
    body: Result<Json<CreateMarketRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Market>), ApiError> {
    let Json(req) = body?;
    let market = state.market_service.create_market(req).await?;
    Ok((StatusCode::CREATED, Json(market)))
}

/// List markets with optional status filtering
async fn list_markets(
    State(state): State<AppState>,
    query: Result<Query<ListMarketsQuery>, QueryRejection>,
) -> Result<Json<MarketListResponse>, ApiError> {
    let Query(params) = query?;
    let status = params.status_filter()?;

    let markets = state.market_service.list_markets(status).await?;
    info!("Returning {} markets", markets.len());
    Ok(Json(MarketListResponse::from(markets)))
}

async fn get_market(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Market>, ApiError> {
    Ok(Json(state.market_service.get_market(&id).await?))
}

async fn update_market(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateMarketRequest>, JsonRejection>,
) -> Result<Json<Market>, ApiError> {
    let Json(req) = body?;
    Ok(Json(state.market_service.update_market(&id, req).await?))
}

/// Set a pool's value and return the market's refreshed pools
async fn update_liquidity_pool(
    State(state): State<AppState>,
    Path((id, pool_id)): Path<(String, String)>,
    body: Result<Json<UpdateLiquidityPoolRequest>, JsonRejection>,
) -> Result<Json<LiquidityUpdate>, ApiError> {
    let Json(req) = body?;
    let pools = state
        .market_service
        .update_liquidity_pool(&id, &pool_id, req.pool_value)
        .await?;
    Ok(Json(LiquidityUpdate::snapshot(id, pools)))
}
