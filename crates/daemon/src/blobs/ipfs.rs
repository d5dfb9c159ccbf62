use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use url::Url;

use common::prelude::{BlobRef, BlobStore, BlobStoreError};

const API_PREFIX: &str = "api/v0/";

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Message")]
    message: String,
}

/// Blob store backed by an IPFS node's HTTP RPC API.
///  Blobs are pinned on add; delete unpins and leaves collection to the
///  node's garbage collector.
#[derive(Debug, Clone)]
pub struct IpfsBlobStore {
    api_url: Url,
    client: Client,
}

impl IpfsBlobStore {
    pub fn new(api_url: Url) -> Result<Self, BlobStoreError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BlobStoreError::Unavailable(e.to_string()))?;
        Ok(Self { api_url, client })
    }

    fn endpoint(&self, command: &str) -> Result<Url, BlobStoreError> {
        self.api_url
            .join(API_PREFIX)
            .and_then(|base| base.join(command))
            .map_err(|e| BlobStoreError::Unavailable(format!("bad IPFS API url: {}", e)))
    }

    async fn call(
        &self,
        command: &str,
        arg: Option<&BlobRef>,
        form: Option<Form>,
    ) -> Result<Response, IpfsCallError> {
        let mut request = self.client.post(self.endpoint(command)?);
        if let Some(arg) = arg {
            request = request.query(&[("arg", arg.as_str())]);
        }
        if let Some(form) = form {
            request = request.multipart(form);
        }

        let response = request.send().await.map_err(unavailable)?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(IpfsCallError::Rejected { status, message })
    }
}

#[derive(Debug)]
enum IpfsCallError {
    Store(BlobStoreError),
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
}

impl From<BlobStoreError> for IpfsCallError {
    fn from(err: BlobStoreError) -> Self {
        Self::Store(err)
    }
}

impl From<IpfsCallError> for BlobStoreError {
    fn from(err: IpfsCallError) -> Self {
        match err {
            IpfsCallError::Store(e) => e,
            IpfsCallError::Rejected { status, message } => {
                BlobStoreError::Unavailable(format!("IPFS returned {}: {}", status, message))
            }
        }
    }
}

fn unavailable(err: reqwest::Error) -> BlobStoreError {
    BlobStoreError::Unavailable(err.to_string())
}

#[async_trait]
impl BlobStore for IpfsBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobStoreError> {
        let len = data.len();
        let part = Part::bytes(data.to_vec()).file_name("blob");
        let form = Form::new().part("file", part);

        let response = self.call("add?pin=true", None, Some(form)).await?;
        let added: AddResponse = response.json().await.map_err(unavailable)?;
        tracing::debug!(cid = %added.hash, len, "added blob to IPFS");
        Ok(BlobRef::new(added.hash))
    }

    async fn get(&self, blob_ref: &BlobRef) -> Result<Bytes, BlobStoreError> {
        match self.call("cat", Some(blob_ref), None).await {
            Ok(response) => response.bytes().await.map_err(unavailable),
            Err(IpfsCallError::Rejected { message, .. })
                if message.contains("not found") || message.contains("invalid") =>
            {
                Err(BlobStoreError::NotFound(blob_ref.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, blob_ref: &BlobRef) -> Result<(), BlobStoreError> {
        match self.call("pin/rm", Some(blob_ref), None).await {
            Ok(_) => Ok(()),
            Err(IpfsCallError::Rejected { message, .. }) if message.contains("not pinned") => {
                tracing::debug!(cid = %blob_ref, "blob already unpinned");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<(), BlobStoreError> {
        self.call("version", None, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use axum::extract::{Multipart, Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default, Clone)]
    struct FakeNode {
        blocks: Arc<Mutex<HashMap<String, Bytes>>>,
        pins: Arc<Mutex<HashSet<String>>>,
    }

    #[derive(Deserialize)]
    struct Arg {
        arg: String,
    }

    fn ipfs_error(message: &str) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"Message": message, "Code": 0, "Type": "error"})),
        )
            .into_response()
    }

    async fn add(State(node): State<FakeNode>, mut multipart: Multipart) -> Response {
        let field = multipart.next_field().await.unwrap().unwrap();
        let data = field.bytes().await.unwrap();
        let cid = format!("bafy{}", node.blocks.lock().len());
        node.blocks.lock().insert(cid.clone(), data);
        node.pins.lock().insert(cid.clone());
        Json(serde_json::json!({"Name": "blob", "Hash": cid, "Size": "0"})).into_response()
    }

    async fn cat(State(node): State<FakeNode>, Query(q): Query<Arg>) -> Response {
        match node.blocks.lock().get(&q.arg) {
            Some(data) => data.clone().into_response(),
            None => ipfs_error("block was not found locally (offline): ipld: could not find node"),
        }
    }

    async fn pin_rm(State(node): State<FakeNode>, Query(q): Query<Arg>) -> Response {
        if node.pins.lock().remove(&q.arg) {
            Json(serde_json::json!({"Pins": [q.arg]})).into_response()
        } else {
            ipfs_error("not pinned or pinned indirectly")
        }
    }

    async fn version() -> Response {
        Json(serde_json::json!({"Version": "0.29.0"})).into_response()
    }

    async fn spawn_node() -> (IpfsBlobStore, FakeNode) {
        let node = FakeNode::default();
        let app = Router::new()
            .route("/api/v0/add", post(add))
            .route("/api/v0/cat", post(cat))
            .route("/api/v0/pin/rm", post(pin_rm))
            .route("/api/v0/version", post(version))
            .with_state(node.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = Url::parse(&format!("http://{}", addr)).unwrap();
        (IpfsBlobStore::new(url).unwrap(), node)
    }

    #[tokio::test]
    async fn test_add_cat_unpin() {
        let (store, node) = spawn_node().await;
        store.ping().await.unwrap();

        let blob_ref = store.put(Bytes::from_static(b"sealed bytes")).await.unwrap();
        assert!(blob_ref.as_str().starts_with("bafy"));
        assert_eq!(store.get(&blob_ref).await.unwrap(), "sealed bytes");

        store.delete(&blob_ref).await.unwrap();
        assert!(node.pins.lock().is_empty());
        // second unpin is not an error
        store.delete(&blob_ref).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_block() {
        let (store, _node) = spawn_node().await;
        let err = store.get(&BlobRef::new("bafymissing")).await.unwrap_err();
        assert!(matches!(err, BlobStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = IpfsBlobStore::new(Url::parse(&format!("http://{}", addr)).unwrap()).unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(err.is_upstream());
    }
}
