use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::ShareId;

use super::client::{ApiError, ApiRequest};
use super::internal_error;
use crate::database::{RegistryError, ShareRecord};
use crate::pipeline::ShareLinks;
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize, clap::Args)]
pub struct HistoryRequest;

pub type HistoryResponse = Vec<ShareSummary>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareSummary {
    pub share_id: ShareId,
    pub filename: String,
    pub max_downloads: u32,
    pub download_count: u32,
    /// Live right now: not stopped, exhausted or expired
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub share_link: String,
    pub link_published: bool,
}

impl ShareSummary {
    fn from_record(record: ShareRecord, links: &ShareLinks, now: DateTime<Utc>) -> Self {
        Self {
            active: record.active && !record.is_expired(now),
            share_link: links.link(&record.share_id),
            share_id: record.share_id,
            filename: record.filename,
            max_downloads: record.max_downloads,
            download_count: record.download_count,
            expires_at: record.expires_at,
            link_published: record.link_published,
        }
    }
}

/// Every share ever created, latest expiry first
pub async fn handler(State(state): State<ServiceState>) -> Result<impl IntoResponse, HistoryError> {
    let now = Utc::now();
    let summaries: HistoryResponse = state
        .database()
        .list_history()
        .await?
        .into_iter()
        .map(|record| ShareSummary::from_record(record, state.links(), now))
        .collect();
    Ok(Json(summaries))
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl IntoResponse for HistoryError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "failed to list share history");
        internal_error()
    }
}

impl ApiRequest for HistoryRequest {
    type Response = HistoryResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/history")?;
        Ok(client.get(full_url))
    }
}
