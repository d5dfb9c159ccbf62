//! Exposure of the local HTTP server to downloaders.
//!
//! The service must not serve traffic until a transport has published it,
//! so startup retries with a fixed backoff and treats exhaustion as fatal.

mod tor;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::state::TransportConfig;

pub use tor::TorControl;

pub const START_ATTEMPTS: u32 = 5;
pub const START_BACKOFF: Duration = Duration::from_secs(1);

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Publish `local_port` and return the public host downloaders should use
    async fn start_hidden_service(&self, local_port: u16) -> Result<String, TransportError>;
}

pub type DynTransport = Arc<dyn Transport>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected control port reply: {0}")]
    Protocol(String),
    #[error("control port refused {command}: {code} {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },
    #[error("no supported authentication method offered: {0}")]
    NoAuthMethod(String),
    #[error("transport did not start after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

/// A host that is already reachable, used for development and tests
#[derive(Debug, Clone)]
pub struct StaticHost(String);

impl StaticHost {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }
}

#[async_trait]
impl Transport for StaticHost {
    async fn start_hidden_service(&self, _local_port: u16) -> Result<String, TransportError> {
        Ok(self.0.clone())
    }
}

pub fn from_config(config: &TransportConfig) -> DynTransport {
    match config {
        TransportConfig::Tor {
            control_addr,
            virtual_port,
            control_password,
        } => Arc::new(TorControl::new(
            *control_addr,
            *virtual_port,
            control_password.clone(),
        )),
        TransportConfig::Static { host } => Arc::new(StaticHost::new(host.clone())),
    }
}

/// Start `transport`, retrying with a fixed backoff
pub async fn start_with_retries(
    transport: &dyn Transport,
    local_port: u16,
    attempts: u32,
    backoff: Duration,
) -> Result<String, TransportError> {
    let mut attempt = 1;
    loop {
        match transport.start_hidden_service(local_port).await {
            Ok(host) => {
                tracing::info!(host = %host, attempt, "transport started");
                return Ok(host);
            }
            Err(e) if attempt >= attempts => {
                return Err(TransportError::Exhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts = attempts, error = %e, "transport not ready, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn start_hidden_service(&self, local_port: u16) -> Result<String, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(TransportError::Io(std::io::ErrorKind::ConnectionRefused.into()));
            }
            Ok(format!("flaky-{}.onion", local_port))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_starts() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let host = start_with_retries(&flaky, 5000, START_ATTEMPTS, START_BACKOFF)
            .await
            .unwrap();
        assert_eq!(host, "flaky-5000.onion");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_an_error() {
        let flaky = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = start_with_retries(&flaky, 5000, START_ATTEMPTS, START_BACKOFF)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Exhausted { attempts: 5, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_static_host() {
        let transport = from_config(&TransportConfig::Static {
            host: "localhost:5000".into(),
        });
        assert_eq!(
            transport.start_hidden_service(5000).await.unwrap(),
            "localhost:5000"
        );
    }
}
