use axum::extract::{Json, Path, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use super::client::{ApiError, ApiRequest};
use super::{internal_error, parse_share_id, InvalidShareId};
use crate::database::RegistryError;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct StatusRequest {
    /// Share to check
    pub share_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active: bool,
}

/// Unknown shares are simply not active
pub async fn handler(
    State(state): State<ServiceState>,
    Path(share_id): Path<String>,
) -> Result<impl IntoResponse, StatusError> {
    let share_id = parse_share_id(&share_id)?;
    let active = state.database().is_active(&share_id, Utc::now()).await?;
    Ok(Json(StatusResponse { active }))
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    InvalidShareId(#[from] InvalidShareId),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        match self {
            StatusError::InvalidShareId(e) => e.into_response(),
            StatusError::Registry(e) => {
                tracing::error!(error = %e, "status lookup failed");
                internal_error()
            }
        }
    }
}

impl ApiRequest for StatusRequest {
    type Response = StatusResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!("/status/{}", self.share_id))?;
        Ok(client.get(full_url))
    }
}
