//! One bridge sync cycle: read the backend cursor, fetch the window from the
//! local terminal, push the deals.

use crate::backend::{BackendClient, BackendError, SyncBackend};
use crate::config::{BridgeConfig, BridgeFiles};
use crate::i18n::{Language, Text};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tradetrack_core::{Terminal, TerminalError};
use tradetrack_engine::{SessionManager, WatermarkTracker};
use tradetrack_terminals_metatrader::{MetaTraderConfig, MetaTraderTerminal};

/// Builds the terminal and backend client for a saved config.
pub trait Connector: Send + Sync {
    fn terminal(&self, config: &BridgeConfig) -> Box<dyn Terminal>;
    fn backend(&self, config: &BridgeConfig) -> Result<Arc<dyn SyncBackend>, BackendError>;
    fn terminal_timeout(&self) -> Duration;

    fn sessions(&self, config: &BridgeConfig) -> SessionManager {
        SessionManager::new(self.terminal(config), self.terminal_timeout())
    }
}

/// Connects to the MT5-side script over TCP and to the backend over HTTP.
#[derive(Debug, Clone)]
pub struct LiveConnector {
    pub terminal_host: String,
    pub terminal_port: u16,
    pub timeout: Duration,
}

impl Connector for LiveConnector {
    fn terminal(&self, config: &BridgeConfig) -> Box<dyn Terminal> {
        Box::new(MetaTraderTerminal::new(MetaTraderConfig {
            host: self.terminal_host.clone(),
            port: self.terminal_port,
            mt5_path: config.mt5_path().map(str::to_string),
            timeout_ms: self.timeout.as_millis() as u64,
        }))
    }

    fn backend(&self, config: &BridgeConfig) -> Result<Arc<dyn SyncBackend>, BackendError> {
        Ok(Arc::new(BackendClient::new(config)?))
    }

    fn terminal_timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeSyncError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl BridgeSyncError {
    /// Localized text for the web app and the event log.
    pub fn user_message(&self, lang: Language) -> String {
        match self {
            BridgeSyncError::Terminal(e) => terminal_failure(e, lang),
            BridgeSyncError::Backend(e) => {
                format!("{} ({})", Text::MsgSendDealsFailed.get(lang), e)
            }
        }
    }
}

/// "MT5 connection failed: ..." with the authorization hint where it applies.
pub fn terminal_failure(err: &TerminalError, lang: Language) -> String {
    let mut message = Text::MsgMt5ConnectFailed.format(lang, err);
    if err.is_authorization_failure() {
        message.push_str(Text::MsgMt5Hint.get(lang));
    }
    message
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub deals: usize,
    pub synced: usize,
    pub skipped: usize,
    pub message: String,
}

/// Run one sync cycle. The backend advances its watermark when it ingests the
/// push; a failure anywhere leaves it unchanged, so the next cycle refetches.
pub async fn run_cycle(
    sessions: &SessionManager,
    backend: &dyn SyncBackend,
    files: &BridgeFiles,
    config: &BridgeConfig,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, BridgeSyncError> {
    let lang = files.language();
    let cursor = backend.sync_state().await?;
    let window = WatermarkTracker::default().window(cursor.last_sync_at, now);

    let deals = if window.is_empty() {
        Vec::new()
    } else {
        sessions
            .fetch_deals(config.terminal_credentials(), window)
            .await?
    };

    let result = backend.push_deals(window, &deals).await?;
    if let Err(e) = files.save_last_sync(window.to) {
        warn!(error = %e, "Could not record last sync time");
    }

    info!(
        deals = deals.len(),
        synced = result.synced,
        skipped = result.skipped,
        "Bridge sync complete"
    );
    let message = if deals.is_empty() {
        Text::MsgNoNewDeals.get(lang).to_string()
    } else {
        Text::MsgSyncedNDeals.format(lang, deals.len())
    };
    Ok(SyncOutcome {
        deals: deals.len(),
        synced: result.synced,
        skipped: result.skipped,
        message,
    })
}
