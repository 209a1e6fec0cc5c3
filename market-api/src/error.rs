//! HTTP error responses

use std::any::Any;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use market_core::MarketError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Errors returned by API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("Handler panicked: {0}")]
    Panic(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Panic(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Market(e) => match e {
                MarketError::Validation(_) | MarketError::InvalidTransition { .. } => {
                    StatusCode::BAD_REQUEST
                }
                MarketError::NotFound(_) => StatusCode::NOT_FOUND,
                MarketError::Storage(_)
                | MarketError::Notification(_)
                | MarketError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "Invalid request body",
            ApiError::InvalidQuery(_) => "Invalid query parameters",
            ApiError::Panic(_) => "Internal server error",
            ApiError::Market(e) => match e {
                MarketError::Validation(_) => "Validation failed",
                MarketError::InvalidTransition { .. } => "Invalid status transition",
                MarketError::NotFound(_) => "Not found",
                MarketError::Storage(_)
                | MarketError::Notification(_)
                | MarketError::Internal(_) => "Internal server error",
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQuery(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let message = match &self {
            ApiError::InvalidBody(msg) | ApiError::InvalidQuery(msg) => msg.clone(),
            ApiError::Panic(_) | ApiError::Market(_) => self.to_string(),
        };

        let body = ErrorResponse {
            error: self.summary().to_string(),
            message: Some(message),
        };

        (status, Json(body)).into_response()
    }
}

/// Turn a panic caught by `CatchPanicLayer` into a 500 error body
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    ApiError::Panic(detail).into_response()
}
