use axum::extract::{RawPathParams, Request, State};
use axum::http::header::{
    ACCEPT, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE, CONTENT_TYPE, ORIGIN, RANGE,
    RETRY_AFTER,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use common::prelude::ShareId;

pub mod client;
pub mod download;
pub mod history;
pub mod progress;
pub mod signal;
pub mod status;
pub mod stop;
pub mod upload;

pub use history::{HistoryRequest, HistoryResponse, ShareSummary};
pub use status::{StatusRequest, StatusResponse};
pub use stop::{StopRequest, StopResponse};
pub use upload::UploadResponse;

use crate::ServiceState;

const SHARE_ID_PARAM: &str = "share_id";

pub fn router(state: ServiceState) -> Router<ServiceState> {
    let cors_layer = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(vec![ACCEPT, CONTENT_TYPE, ORIGIN, RANGE])
        .expose_headers(vec![ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE])
        .allow_origin(Any)
        .allow_credentials(false);

    // every route naming a share is throttled per share
    let share_routes = Router::new()
        .route("/download/:share_id", get(download::handler))
        .route("/status/:share_id", get(status::handler))
        .route("/stop/:share_id", post(stop::handler))
        .route("/ws/progress/:share_id", get(progress::handler))
        .route(
            "/signal/:share_id",
            get(signal::subscribe_handler).post(signal::relay_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/upload", post(upload::handler))
        .route("/history", get(history::handler))
        .merge(share_routes)
        .with_state(state)
        .layer(cors_layer)
}

async fn rate_limit(
    State(state): State<ServiceState>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Response {
    let key = params
        .iter()
        .find(|(name, _)| *name == SHARE_ID_PARAM)
        .map(|(_, value)| value.to_string());

    if let Some(key) = key {
        if let Err(limited) = state.rate_limiter().check(&key) {
            tracing::debug!(share_id = %key, retry_after = ?limited.retry_after, "request rate limited");
            let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "too many requests");
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from(limited.retry_after.as_secs().max(1)),
            );
            return response;
        }
    }

    next.run(request).await
}

/// JSON error body shared by every endpoint: `{"error": "..."}`
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

/// Generic 500 body; details stay in the logs
pub(crate) fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

pub(crate) fn parse_share_id(raw: &str) -> Result<ShareId, InvalidShareId> {
    ShareId::parse(raw).map_err(|_| InvalidShareId)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid share id")]
pub struct InvalidShareId;

impl IntoResponse for InvalidShareId {
    fn into_response(self) -> Response {
        error_response(StatusCode::BAD_REQUEST, self.to_string())
    }
}
