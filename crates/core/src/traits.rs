use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Terminal Trait
// ---------------------------------------------------------------------------

/// MT5 `last_error()` code for a rejected login.
pub const AUTHORIZATION_FAILED_CODE: i32 = -6;

/// Errors reported by the trading terminal or the transport in front of it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TerminalError {
    #[error("MT5 terminal unavailable: {0}")]
    Unavailable(String),
    #[error("MT5 initialization failed: ({code}, {message})")]
    InitFailed { code: i32, message: String },
    #[error("MT5 login failed: ({code}, {message})")]
    LoginFailed { code: i32, message: String },
    #[error("MT5 terminal did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Not connected to the MT5 terminal")]
    NotConnected,
    #[error("MT5 protocol error: {0}")]
    Protocol(String),
}

impl TerminalError {
    /// Terminal diagnostic code, when the terminal supplied one.
    pub fn diagnostic_code(&self) -> Option<i32> {
        match self {
            TerminalError::InitFailed { code, .. } | TerminalError::LoginFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// True for rejected investor credentials (wrong login, password or server).
    pub fn is_authorization_failure(&self) -> bool {
        self.diagnostic_code() == Some(AUTHORIZATION_FAILED_CODE)
            || self.to_string().contains("Authorization failed")
    }
}

/// The MT5 terminal, seen as an opaque collaborator.
///
/// A terminal process supports a single logged-in session at a time; callers
/// must pair every `connect` with a `disconnect`.
#[async_trait]
pub trait Terminal: Send {
    /// Initialise the terminal and log in with investor credentials.
    async fn connect(&mut self, credentials: &TerminalCredentials) -> Result<(), TerminalError>;

    /// Shut the session down. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// Account summary for the logged-in account, if the terminal has one.
    async fn account_info(&mut self) -> Result<Option<AccountInfo>, TerminalError>;

    /// Deal history in `[from, to)`.
    async fn get_deals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, TerminalError>;
}

// ---------------------------------------------------------------------------
// Store Traits
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result of a single ledger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The unique key already existed; nothing was written.
    Duplicate,
}

/// The journal's trade ledger.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    async fn trade_exists(
        &self,
        trading_account_id: i64,
        terminal_trade_id: &str,
    ) -> Result<bool, StoreError>;

    /// Insert a trade. Must be a no-op returning [`InsertOutcome::Duplicate`]
    /// when `(trading_account_id, terminal_trade_id)` already exists.
    async fn insert_trade(
        &self,
        trading_account_id: i64,
        trade: &CompletedTrade,
    ) -> Result<InsertOutcome, StoreError>;
}

/// Persistence for the per-account sync cursor.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Current cursor; an account that never synced yields an empty state.
    async fn load_sync_state(&self, trading_account_id: i64) -> Result<SyncState, StoreError>;

    /// Move the watermark to `to` (never backwards) and record the latest
    /// closing deal. Returns the stored state.
    async fn advance_sync_state(
        &self,
        trading_account_id: i64,
        to: DateTime<Utc>,
        last_deal: Option<DealCursor>,
    ) -> Result<SyncState, StoreError>;
}

/// Trading accounts, their owners and stored investor credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Owning user of a trading account, `None` if the account does not exist.
    async fn account_owner(&self, trading_account_id: i64) -> Result<Option<i64>, StoreError>;

    async fn credential(
        &self,
        trading_account_id: i64,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert or replace credentials; the row ends up CONNECTED with no error.
    async fn upsert_credential(&self, new: NewCredential) -> Result<CredentialRecord, StoreError>;

    /// Serialized per-account status transition. Returns false when no
    /// credentials are stored for the account.
    async fn set_status(
        &self,
        trading_account_id: i64,
        status: AccountStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError>;

    async fn delete_credential(&self, trading_account_id: i64) -> Result<bool, StoreError>;
}

/// Everything the backend needs from persistence.
pub trait Store: TradeLedger + SyncStateStore + CredentialStore {}

impl<T: TradeLedger + SyncStateStore + CredentialStore> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_failure_detection() {
        let err = TerminalError::LoginFailed {
            code: -6,
            message: "Terminal: Authorization failed".to_string(),
        };
        assert!(err.is_authorization_failure());
        assert_eq!(
            err.to_string(),
            "MT5 login failed: (-6, Terminal: Authorization failed)"
        );

        let err = TerminalError::InitFailed {
            code: -10005,
            message: "IPC timeout".to_string(),
        };
        assert!(!err.is_authorization_failure());
        assert_eq!(err.diagnostic_code(), Some(-10005));
        assert_eq!(TerminalError::NotConnected.diagnostic_code(), None);
    }
}
