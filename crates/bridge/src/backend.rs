//! HTTP client for the TradeTrack backend's bridge endpoints.

use crate::config::BridgeConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use tradetrack_core::{DealRecord, SyncState, SyncWindow};
use zeroize::Zeroizing;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl BackendError {
    /// Whether repeating the same request later may succeed. Nothing is lost
    /// by retrying: the backend only advances its watermark after an ingest.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Http(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Ingest result returned by `POST /api/mt5/sync/deals`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub success: bool,
    pub synced: usize,
    pub skipped: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    pub total: usize,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DealPush<'a> {
    trading_account_id: &'a str,
    window_from: DateTime<Utc>,
    window_to: DateTime<Utc>,
    deals: &'a [DealRecord],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedNotice<'a> {
    trading_account_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedReply {
    sync_state: SyncState,
}

/// The backend operations a bridge sync cycle needs.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Tell the backend the bridge is connected. Returns the sync cursor.
    async fn bridge_connected(&self) -> Result<SyncState, BackendError>;

    /// Current server-side sync cursor.
    async fn sync_state(&self) -> Result<SyncState, BackendError>;

    /// Hand deals fetched for `window` to the backend for ingestion.
    async fn push_deals(
        &self,
        window: SyncWindow,
        deals: &[DealRecord],
    ) -> Result<PushResult, BackendError>;
}

pub struct BackendClient {
    http: Client,
    base_url: String,
    token: Zeroizing<String>,
    trading_account_id: String,
}

impl BackendClient {
    pub fn new(config: &BridgeConfig) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(PUSH_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: Zeroizing::new(config.sync_token.clone()),
            trading_account_id: config.trading_account_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/mt5{}", self.base_url, path)
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl SyncBackend for BackendClient {
    async fn bridge_connected(&self) -> Result<SyncState, BackendError> {
        let response = self
            .http
            .post(self.url("/bridge/connected"))
            .bearer_auth(self.token.as_str())
            .timeout(CONNECT_TIMEOUT)
            .json(&ConnectedNotice {
                trading_account_id: &self.trading_account_id,
            })
            .send()
            .await?;
        let reply: ConnectedReply = parse(response).await?;
        Ok(reply.sync_state)
    }

    async fn sync_state(&self) -> Result<SyncState, BackendError> {
        let url = self.url(&format!("/bridge/sync-state/{}", self.trading_account_id));
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.as_str())
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await?;
        parse(response).await
    }

    async fn push_deals(
        &self,
        window: SyncWindow,
        deals: &[DealRecord],
    ) -> Result<PushResult, BackendError> {
        debug!(deals = deals.len(), from = %window.from, to = %window.to, "Pushing deals");
        let response = self
            .http
            .post(self.url("/sync/deals"))
            .bearer_auth(self.token.as_str())
            .json(&DealPush {
                trading_account_id: &self.trading_account_id,
                window_from: window.from,
                window_to: window.to,
                deals,
            })
            .send()
            .await?;
        parse(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::posted_config;

    #[test]
    fn test_urls_join_base_and_prefix() {
        let config = BridgeConfig::from_value(&posted_config()).unwrap();
        let client = BackendClient::new(&config).unwrap();
        assert_eq!(
            client.url("/bridge/connected"),
            "https://journal.example.com/api/mt5/bridge/connected"
        );
    }

    #[test]
    fn test_retryable_errors() {
        let status = |status| BackendError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(400).is_retryable());
    }

    #[test]
    fn test_push_body_shape() {
        let window = SyncWindow {
            from: DateTime::from_timestamp(0, 0).unwrap(),
            to: DateTime::from_timestamp(60, 0).unwrap(),
        };
        let body = serde_json::to_value(DealPush {
            trading_account_id: "1",
            window_from: window.from,
            window_to: window.to,
            deals: &[],
        })
        .unwrap();
        assert_eq!(body["tradingAccountId"], "1");
        assert_eq!(body["windowTo"], "1970-01-01T00:01:00Z");
        assert!(body["deals"].as_array().unwrap().is_empty());
    }
}
