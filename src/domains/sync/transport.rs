use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::domains::sync::config::SyncQueueConfig;
use crate::domains::sync::types::OutboundMutation;
use crate::errors::{ServiceError, ServiceResult, SyncError, SyncResult};

/// Delivers queued mutations to the remote endpoint
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send one mutation. Resolves to the number of response bytes received;
    /// any failure (network, non-2xx, timeout) is an error.
    async fn send(&self, mutation: &OutboundMutation) -> SyncResult<u64>;
}

/// Implementation of SyncTransport that posts to the sync API over HTTP
pub struct HttpSyncTransport {
    client: Client,
    endpoint_url: String,
    api_token: Option<String>,
    timeout_secs: u64,
}

impl HttpSyncTransport {
    pub fn new(config: &SyncQueueConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.transport_timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url(),
            api_token: config.api_token.clone(),
            timeout_secs: config.transport_timeout_secs,
        })
    }

    fn map_request_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout_secs)
        } else {
            SyncError::Network(format!("Failed to send mutation: {}", err))
        }
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn send(&self, mutation: &OutboundMutation) -> SyncResult<u64> {
        debug!(
            "Posting {} {} {} ({} bytes, {})",
            mutation.operation.as_str(),
            mutation.kind.as_str(),
            mutation.id,
            mutation.body.len(),
            mutation.encoding.as_str()
        );

        let mut request = self.client.post(&self.endpoint_url)
            .header("X-Sync-Item-Id", &mutation.id)
            .json(mutation);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if status.is_success() {
            let bytes = response.bytes()
                .await
                .map_err(|e| self.map_request_error(e))?;
            Ok(bytes.len() as u64)
        } else {
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(SyncError::ServerError {
                status: status.as_u16(),
                message: error_text,
            })
        }
    }
}

#[cfg(test)]
pub use mock::{MockOutcome, MockSyncTransport};


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sync::compression::PayloadEncoding;
    use crate::domains::sync::types::{SyncItemKind, SyncOperation};
    use chrono::Utc;

    fn mutation(id: &str) -> OutboundMutation {
        OutboundMutation {
            id: id.to_string(),
            kind: SyncItemKind::Message,
            operation: SyncOperation::Create,
            created_at: Utc::now(),
            encoding: PayloadEncoding::Json,
            body: "{\"text\":\"hi\"}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_follows_script_then_fallback() {
        let mock = MockSyncTransport::scripted(vec![MockOutcome::Fail, MockOutcome::Succeed], MockOutcome::Fail);
        assert!(mock.send(&mutation("a")).await.is_err());
        assert_eq!(mock.send(&mutation("b")).await.unwrap(), 16);
        assert!(mock.send(&mutation("c")).await.is_err());
        assert_eq!(mock.called_ids(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_http_transport_reports_unreachable_endpoint() {
        let config = SyncQueueConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            transport_timeout_secs: 2,
            ..SyncQueueConfig::default()
        };
        let transport = HttpSyncTransport::new(&config).unwrap();
        let err = transport.send(&mutation("offline")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_envelope_serialization() {
        let value = serde_json::to_value(mutation("sync_1_x")).unwrap();
        assert_eq!(value["kind"], "message");
        assert_eq!(value["operation"], "create");
        assert_eq!(value["encoding"], "json");
        assert_eq!(value["body"], "{\"text\":\"hi\"}");
    }
}
