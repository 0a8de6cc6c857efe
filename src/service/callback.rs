//! Result delivery to the caller's evaluation URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

use super::models::CallbackPayload;
use crate::errors::CallbackError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts one result payload. Implementations make exactly one attempt.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError>;
}

/// Single-attempt JSON POST; only `200 OK` counts as delivered.
pub struct HttpCallbackNotifier {
    client: Client,
}

impl HttpCallbackNotifier {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CallbackError::Transport)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError> {
        if url.trim().is_empty() {
            return Err(CallbackError::MissingUrl);
        }

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(CallbackError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(url, status = status.as_u16(), "callback rejected");
            return Err(CallbackError::Rejected {
                status: status.as_u16(),
            });
        }
        info!(url, status = payload.status.as_str(), "callback delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::models::RunStatus;

    fn payload() -> CallbackPayload {
        CallbackPayload {
            email: "a@b.io".into(),
            task: "t".into(),
            round: 1,
            nonce: "n".into(),
            repo_url: String::new(),
            commit_sha: String::new(),
            pages_url: String::new(),
            status: RunStatus::Failed,
            error: Some("x".into()),
        }
    }

    #[tokio::test]
    async fn empty_url_is_rejected_without_network() {
        let notifier = HttpCallbackNotifier::new(DEFAULT_TIMEOUT).unwrap();
        let err = notifier.deliver("  ", &payload()).await.unwrap_err();
        assert!(matches!(err, CallbackError::MissingUrl));
    }

    #[tokio::test]
    async fn unreachable_url_is_a_transport_error() {
        let notifier = HttpCallbackNotifier::new(Duration::from_secs(2)).unwrap();
        let err = notifier
            .deliver("http://127.0.0.1:9/notify", &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackError::Transport(_)));
    }
}
