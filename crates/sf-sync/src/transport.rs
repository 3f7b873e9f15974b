use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sf_core::StoryForgeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateStatus {
    pub has_updates: bool,
    pub checksum: Option<String>,
    pub updated_at: Option<String>,
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Asks the server whether a bundle newer than `checksum` exists.
    async fn check(&self, stack_id: &str, checksum: &str) -> Result<UpdateStatus, StoryForgeError>;

    /// Downloads the full bundle (envelope or plain JSON bytes).
    async fn fetch_full(&self, stack_id: &str) -> Result<Vec<u8>, StoryForgeError>;
}

fn map_http(error: reqwest::Error) -> StoryForgeError {
    if error.is_timeout() {
        return StoryForgeError::new("SYNC_TIMEOUT", "Sync request timed out.");
    }
    StoryForgeError::from_display("SYNC_HTTP", error)
}

fn check_status(response: &reqwest::Response) -> Result<(), StoryForgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(StoryForgeError::new(
        "SYNC_HTTP_STATUS",
        format!("Sync endpoint answered HTTP {}.", status),
    ))
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StoryForgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_http)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn check(&self, stack_id: &str, checksum: &str) -> Result<UpdateStatus, StoryForgeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("stackId", stack_id), ("checksum", checksum)])
            .send()
            .await
            .map_err(map_http)?;
        check_status(&response)?;
        response.json::<UpdateStatus>().await.map_err(map_http)
    }

    async fn fetch_full(&self, stack_id: &str) -> Result<Vec<u8>, StoryForgeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("stackId", stack_id), ("full", "true")])
            .send()
            .await
            .map_err(map_http)?;
        check_status(&response)?;
        let body = response.bytes().await.map_err(map_http)?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    #[test]
    fn update_status_reads_server_json() {
        let status: UpdateStatus = serde_json::from_str(
            r#"{"hasUpdates": true, "checksum": "abc", "updatedAt": "2026-01-02T03:04:05Z"}"#,
        )
        .expect("status should parse");
        assert!(status.has_updates);
        assert_eq!(status.checksum.as_deref(), Some("abc"));

        let empty: UpdateStatus = serde_json::from_str("{}").expect("empty status");
        assert!(!empty.has_updates);
    }

    #[test]
    fn http_transport_builds_with_timeout() {
        let transport = HttpTransport::new("http://localhost:9/sync", Duration::from_secs(2))
            .expect("client should build");
        assert_eq!(transport.endpoint(), "http://localhost:9/sync");
    }
}
