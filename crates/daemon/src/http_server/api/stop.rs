use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::ShareId;

use super::client::{ApiError, ApiRequest};
use super::{error_response, internal_error, parse_share_id, InvalidShareId};
use crate::database::RegistryError;
use crate::ServiceState;

const STOPPED: &str = "stopped";

#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct StopRequest {
    /// Share to stop serving
    pub share_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: String,
    pub share_id: ShareId,
}

/// Stop a share and release its blob. The blob delete is best-effort;
///  the share is stopped either way.
pub async fn handler(
    State(state): State<ServiceState>,
    Path(share_id): Path<String>,
) -> Result<impl IntoResponse, StopError> {
    let share_id = parse_share_id(&share_id)?;
    let blob_ref = state.database().stop_share(&share_id).await?;

    if let Err(e) = state.blobs().delete(&blob_ref).await {
        tracing::warn!(
            share_id = %share_id,
            blob_ref = %blob_ref,
            error = %e,
            "failed to delete blob of stopped share, leaving it orphaned"
        );
    }
    tracing::info!(share_id = %share_id, "share stopped");

    Ok(Json(StopResponse {
        status: STOPPED.to_string(),
        share_id,
    }))
}

#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error(transparent)]
    InvalidShareId(#[from] InvalidShareId),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl IntoResponse for StopError {
    fn into_response(self) -> Response {
        match self {
            StopError::InvalidShareId(e) => e.into_response(),
            StopError::Registry(RegistryError::NotFound(_)) => {
                error_response(StatusCode::NOT_FOUND, "invalid share id")
            }
            StopError::Registry(e) => {
                tracing::error!(error = %e, "failed to stop share");
                internal_error()
            }
        }
    }
}

impl ApiRequest for StopRequest {
    type Response = StopResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!("/stop/{}", self.share_id))?;
        Ok(client.post(full_url))
    }
}
