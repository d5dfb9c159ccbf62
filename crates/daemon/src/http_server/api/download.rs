use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;

use common::crypto::CHUNK_SIZE;

use super::{error_response, internal_error, parse_share_id, InvalidShareId};
use crate::access::AccessError;
use crate::pipeline::{DownloadError, PreparedDownload};
use crate::ServiceState;

pub async fn handler(
    State(state): State<ServiceState>,
    Path(share_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, DownloadRequestError> {
    let share_id = parse_share_id(&share_id)?;
    let range = headers
        .get(RANGE)
        .map(|value| value.to_str().unwrap_or_default());

    let download = state
        .download_pipeline()
        .prepare(&share_id, range)
        .await?;

    Ok(into_response(download))
}

fn into_response(download: PreparedDownload) -> Response {
    let status = if download.is_partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let content_type = HeaderValue::from_str(&download.record.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = Response::new(Body::from_stream(chunked(download.body.clone())));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(download.body.len()));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&download.record.filename)) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(range) = download.range {
        if let Ok(value) = HeaderValue::from_str(&range.content_range(download.total_len)) {
            headers.insert(CONTENT_RANGE, value);
        }
    }

    response
}

/// Hand the body to the client a chunk at a time; a disconnect drops the rest
fn chunked(body: Bytes) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(body, |mut rest| async move {
        if rest.is_empty() {
            return None;
        }
        let chunk = rest.split_to(rest.len().min(CHUNK_SIZE));
        Some((Ok(chunk), rest))
    })
}

/// `attachment` disposition with an ASCII fallback name and, when the
///  real name needs it, an RFC 5987 encoded one
fn content_disposition(filename: &str) -> String {
    if filename.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\') {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::new();
    for b in filename.bytes() {
        if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadRequestError {
    #[error(transparent)]
    InvalidShareId(#[from] InvalidShareId),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl IntoResponse for DownloadRequestError {
    fn into_response(self) -> Response {
        let err = match self {
            DownloadRequestError::InvalidShareId(e) => return e.into_response(),
            DownloadRequestError::Download(e) => e,
        };

        match err {
            DownloadError::Access(AccessError::NotFound(_)) => {
                error_response(StatusCode::NOT_FOUND, "share not found")
            }
            DownloadError::Access(
                e @ (AccessError::Expired | AccessError::QuotaExceeded | AccessError::Inactive),
            ) => error_response(StatusCode::FORBIDDEN, e.to_string()),
            DownloadError::RangeNotSatisfiable { total } => {
                let mut response =
                    error_response(StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable");
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total)) {
                    response.headers_mut().insert(CONTENT_RANGE, value);
                }
                response
            }
            DownloadError::BlobStore(e) if e.is_upstream() => {
                tracing::error!(error = %e, "blob store unavailable during download");
                error_response(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
            }
            e => {
                tracing::error!(error = %e, "download failed");
                internal_error()
            }
        }
    }
}
