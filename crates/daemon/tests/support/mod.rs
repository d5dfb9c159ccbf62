//! Shared helpers for the daemon integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::blobs::MemoryBlobStore;
use common::prelude::{BlobRef, ShareId};
use shroud_daemon::database::{Database, NewShare};
use shroud_daemon::pipeline::ShareLinks;
use shroud_daemon::service_state::SharePolicy;
use shroud_daemon::ServiceState;

pub const PUBLIC_HOST: &str = "localhost:5000";
const BOUNDARY: &str = "shroud-test-boundary";

pub struct TestApp {
    pub state: ServiceState,
    pub blobs: MemoryBlobStore,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(SharePolicy::default()).await
    }

    pub async fn with_policy(policy: SharePolicy) -> Self {
        let database = Database::in_memory().await.unwrap();
        let blobs = MemoryBlobStore::new();
        let state = ServiceState::new(
            database,
            Arc::new(blobs.clone()),
            ShareLinks::new(PUBLIC_HOST),
            policy,
        );
        let router = shroud_daemon::http_server::router(state.clone());
        Self {
            state,
            blobs,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        self.send(Request::post(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Upload `files` as `files` multipart parts and return the parsed response
    pub async fn upload(&self, query: &str, files: &[(&str, &[u8])]) -> Response<Body> {
        let request = Request::post(format!("/upload{}", query))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(files)))
            .unwrap();
        self.send(request).await
    }

    /// Register a share directly, bypassing the upload pipeline
    pub async fn insert_share(&self, id: &str, max_downloads: u32, ttl: Duration, now: DateTime<Utc>) -> ShareId {
        self.state
            .database()
            .create_share(
                NewShare {
                    share_id: Some(ShareId::parse(id).unwrap()),
                    blob_ref: BlobRef::new(format!("blob-{}", id)),
                    filename: "notes.txt".to_string(),
                    content_type: "text/plain".to_string(),
                    private_key: "unused".to_string(),
                    max_downloads,
                    ttl,
                },
                now,
            )
            .await
            .unwrap()
    }
}

pub fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
