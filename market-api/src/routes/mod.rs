//! API route definitions

mod health;
mod markets;
mod stream;

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use crate::error::panic_response;
use crate::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the full application router
pub fn router(state: AppState) -> Router {
    with_middleware(
        Router::new()
            .merge(markets::routes())
            .merge(stream::routes())
            .merge(health::routes()),
    )
    .with_state(state)
}

/// Wrap routes in the shared middleware stack
///
/// Outermost first: request id assignment, tracing, request id echo, panic
/// recovery, CORS.
fn with_middleware(routes: Router<AppState>) -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id,
        )
    });

    routes
        .layer(cors)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
