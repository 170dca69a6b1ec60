use crate::protocol::{PushRequest, PUSH_PATH};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("no store endpoint configured")]
    NoEndpoint,
}

impl PushError {
    /// Network errors, 5xx, 429 and a missing endpoint are worth retrying.
    /// Any other status means the store rejected the batch itself.
    pub fn is_transient(&self) -> bool {
        match self {
            PushError::Http(_) | PushError::NoEndpoint => true,
            PushError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// Delivers one push body to the store.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, request: &PushRequest) -> Result<(), PushError>;
}

/// HTTP client for the store's push endpoint.
///
/// The base URL comes from a watch channel so it can be set or changed
/// while the agent runs.
#[derive(Debug)]
pub struct PushClient {
    endpoint: watch::Receiver<Option<String>>,
    client: reqwest::Client,
}

impl PushClient {
    pub fn new(endpoint: watch::Receiver<Option<String>>, timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn push_url(&self) -> Option<String> {
        self.endpoint
            .borrow()
            .as_deref()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), PUSH_PATH))
    }
}

#[async_trait]
impl PushTransport for PushClient {
    async fn push(&self, request: &PushRequest) -> Result<(), PushError> {
        let url = self.push_url().ok_or(PushError::NoEndpoint)?;
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(PushError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_url_follows_endpoint_updates() {
        let (tx, rx) = watch::channel(None);
        let client = PushClient::new(rx, Duration::from_secs(1)).unwrap();
        assert_eq!(client.push_url(), None);

        tx.send(Some("http://store:3100/".to_string())).unwrap();
        assert_eq!(
            client.push_url().as_deref(),
            Some("http://store:3100/loki/api/v1/push")
        );
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_transient() {
        let (_tx, rx) = watch::channel(None);
        let client = PushClient::new(rx, Duration::from_secs(1)).unwrap();

        let err = client.push(&PushRequest::default()).await.unwrap_err();
        assert!(matches!(err, PushError::NoEndpoint));
        assert!(err.is_transient());
    }

    #[test]
    fn test_status_classification() {
        let status = |status| PushError::Status {
            status,
            message: String::new(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transient() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_tx, rx) = watch::channel(Some(format!("http://{}", addr)));
        let client = PushClient::new(rx, Duration::from_secs(2)).unwrap();

        let err = client.push(&PushRequest::default()).await.unwrap_err();
        assert!(matches!(err, PushError::Http(_)));
        assert!(err.is_transient());
    }
}
