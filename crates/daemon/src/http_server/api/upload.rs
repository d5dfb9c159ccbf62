use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use common::prelude::ShareId;

use super::{error_response, internal_error};
use crate::pipeline::{ShareDescriptor, StagedUpload, UploadError, UploadOptions};
use crate::ServiceState;

/// Multipart field carrying the files; anything else is ignored
const FILES_FIELD: &str = "files";
const DEFAULT_MAX_DOWNLOADS: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadQuery {
    // kept as text so a bad value is a 400 with our own message
    pub max_downloads: Option<String>,
    pub share_id: Option<String>,
    pub zip_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub share_links: Vec<ShareDescriptor>,
}

pub async fn handler(
    State(state): State<ServiceState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, UploadRequestError> {
    let options = UploadOptions {
        max_downloads: parse_max_downloads(query.max_downloads.as_deref())?,
        share_id: parse_requested_id(query.share_id.as_deref())?,
        zip_name: query.zip_name,
        ttl: state.policy().default_ttl,
    };

    let mut staged = StagedUpload::new()?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let len = staged.stage(&filename, content_type, field).await?;
        tracing::debug!(filename = %filename, len, "staged upload part");
    }

    let descriptor = state.upload_pipeline().run(staged, options).await?;

    Ok((
        StatusCode::OK,
        Json(UploadResponse {
            share_links: vec![descriptor],
        }),
    ))
}

fn parse_max_downloads(raw: Option<&str>) -> Result<u32, UploadRequestError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_DOWNLOADS);
    };
    let value: i64 = raw.trim().parse().map_err(|_| {
        UploadRequestError::InvalidInput("max_downloads must be an integer".into())
    })?;
    if value < 1 {
        return Err(UploadRequestError::InvalidInput(
            "max_downloads must be at least 1".into(),
        ));
    }
    u32::try_from(value)
        .map_err(|_| UploadRequestError::InvalidInput("max_downloads is too large".into()))
}

fn parse_requested_id(raw: Option<&str>) -> Result<Option<ShareId>, UploadRequestError> {
    match raw.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => ShareId::parse(id)
            .map(Some)
            .map_err(|e| UploadRequestError::InvalidInput(format!("invalid share_id: {}", e))),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadRequestError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl IntoResponse for UploadRequestError {
    fn into_response(self) -> Response {
        match self {
            UploadRequestError::InvalidInput(msg) => error_response(StatusCode::BAD_REQUEST, msg),
            UploadRequestError::Multipart(e) => {
                tracing::debug!(error = %e, "rejecting malformed multipart body");
                error_response(e.status(), e.body_text())
            }
            UploadRequestError::Upload(UploadError::InvalidInput(msg)) => {
                error_response(StatusCode::BAD_REQUEST, msg)
            }
            UploadRequestError::Upload(e @ UploadError::DuplicateShare(_)) => {
                error_response(StatusCode::CONFLICT, e.to_string())
            }
            UploadRequestError::Upload(UploadError::BlobStore(e)) if e.is_upstream() => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
            }
            // already logged by the pipeline
            UploadRequestError::Upload(_) => internal_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_downloads() {
        assert_eq!(parse_max_downloads(None).unwrap(), 1);
        assert_eq!(parse_max_downloads(Some(" 3 ")).unwrap(), 3);
        for bad in ["0", "-2", "many", "", "99999999999"] {
            assert!(matches!(
                parse_max_downloads(Some(bad)),
                Err(UploadRequestError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_parse_requested_id() {
        assert!(parse_requested_id(None).unwrap().is_none());
        assert!(parse_requested_id(Some("")).unwrap().is_none());
        assert_eq!(
            parse_requested_id(Some("my-share")).unwrap().unwrap().as_str(),
            "my-share"
        );
        assert!(parse_requested_id(Some("../etc")).is_err());
    }
}
