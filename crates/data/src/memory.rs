//! In-process store used by tests and by the backend's `--memory-store` mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tradetrack_core::*;

#[derive(Default)]
struct Inner {
    /// trading account id → owning user id
    accounts: HashMap<i64, i64>,
    credentials: HashMap<i64, CredentialRecord>,
    next_credential_id: i64,
    sync_states: HashMap<i64, SyncState>,
    trades: HashMap<i64, BTreeMap<String, CompletedTrade>>,
    failing_inserts: HashSet<String>,
    hidden_from_exists: HashSet<String>,
}

/// Store kept entirely in memory. Enforces the same uniqueness and
/// monotonicity rules as the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trading account owned by `user_id`.
    pub async fn add_trading_account(&self, trading_account_id: i64, user_id: i64) {
        self.inner
            .write()
            .await
            .accounts
            .insert(trading_account_id, user_id);
    }

    /// Make every insert of `terminal_trade_id` fail.
    pub async fn fail_inserts_for(&self, terminal_trade_id: &str) {
        self.inner
            .write()
            .await
            .failing_inserts
            .insert(terminal_trade_id.to_string());
    }

    /// Make the existence check miss `terminal_trade_id`, so only the insert's
    /// conflict handling can catch a duplicate.
    pub async fn hide_from_exists_checks(&self, terminal_trade_id: &str) {
        self.inner
            .write()
            .await
            .hidden_from_exists
            .insert(terminal_trade_id.to_string());
    }

    pub async fn trades(&self, trading_account_id: i64) -> Vec<CompletedTrade> {
        self.inner
            .read()
            .await
            .trades
            .get(&trading_account_id)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn trade_count(&self, trading_account_id: i64) -> usize {
        self.inner
            .read()
            .await
            .trades
            .get(&trading_account_id)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl TradeLedger for MemoryStore {
    async fn trade_exists(
        &self,
        trading_account_id: i64,
        terminal_trade_id: &str,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        if inner.hidden_from_exists.contains(terminal_trade_id) {
            return Ok(false);
        }
        Ok(inner
            .trades
            .get(&trading_account_id)
            .is_some_and(|t| t.contains_key(terminal_trade_id)))
    }

    async fn insert_trade(
        &self,
        trading_account_id: i64,
        trade: &CompletedTrade,
    ) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.failing_inserts.contains(&trade.terminal_trade_id) {
            return Err(StoreError::Database(format!(
                "insert rejected for {}",
                trade.terminal_trade_id
            )));
        }
        if !inner.accounts.contains_key(&trading_account_id) {
            return Err(StoreError::NotFound(format!(
                "trading account {}",
                trading_account_id
            )));
        }

        let ledger = inner.trades.entry(trading_account_id).or_default();
        if ledger.contains_key(&trade.terminal_trade_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        ledger.insert(trade.terminal_trade_id.clone(), trade.clone());
        Ok(InsertOutcome::Inserted)
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn load_sync_state(&self, trading_account_id: i64) -> Result<SyncState, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .sync_states
            .get(&trading_account_id)
            .cloned()
            .unwrap_or(SyncState {
                trading_account_id,
                ..Default::default()
            }))
    }

    async fn advance_sync_state(
        &self,
        trading_account_id: i64,
        to: DateTime<Utc>,
        last_deal: Option<DealCursor>,
    ) -> Result<SyncState, StoreError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .sync_states
            .entry(trading_account_id)
            .or_insert_with(|| SyncState {
                trading_account_id,
                ..Default::default()
            });

        state.advance(to, last_deal);
        Ok(state.clone())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn account_owner(&self, trading_account_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .get(&trading_account_id)
            .copied())
    }

    async fn credential(
        &self,
        trading_account_id: i64,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .credentials
            .get(&trading_account_id)
            .cloned())
    }

    async fn upsert_credential(&self, new: NewCredential) -> Result<CredentialRecord, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&new.trading_account_id) {
            return Err(StoreError::NotFound(format!(
                "trading account {}",
                new.trading_account_id
            )));
        }

        let now = Utc::now();
        let (id, created_at) = match inner.credentials.get(&new.trading_account_id) {
            Some(existing) => (existing.id, existing.created_at),
            None => {
                inner.next_credential_id += 1;
                (inner.next_credential_id, now)
            }
        };

        let record = CredentialRecord {
            id,
            trading_account_id: new.trading_account_id,
            login: new.login,
            server: new.server,
            encrypted_password: new.encrypted_password,
            status: AccountStatus::Connected,
            error_message: None,
            created_at,
            updated_at: now,
        };
        inner
            .credentials
            .insert(record.trading_account_id, record.clone());
        Ok(record)
    }

    async fn set_status(
        &self,
        trading_account_id: i64,
        status: AccountStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.credentials.get_mut(&trading_account_id) {
            Some(record) => {
                record.status = status;
                record.error_message = error_message;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_credential(&self, trading_account_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .write()
            .await
            .credentials
            .remove(&trading_account_id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let store = MemoryStore::new();
        store.add_trading_account(1, 10).await;

        let state = store.advance_sync_state(1, at(500), None).await.unwrap();
        assert_eq!(state.last_sync_at, Some(at(500)));

        let state = store.advance_sync_state(1, at(300), None).await.unwrap();
        assert_eq!(state.last_sync_at, Some(at(500)));
    }

    #[tokio::test]
    async fn test_deal_cursor_only_moves_forward() {
        let store = MemoryStore::new();
        let cursor = |t, ticket| Some(DealCursor { time: at(t), ticket });

        store.advance_sync_state(1, at(500), cursor(400, 9)).await.unwrap();
        let state = store.advance_sync_state(1, at(600), cursor(300, 12)).await.unwrap();

        assert_eq!(state.last_deal_at, Some(at(400)));
        assert_eq!(state.last_deal_ticket, Some(9));
    }

    #[tokio::test]
    async fn test_upsert_credential_keeps_id_and_resets_status() {
        let store = MemoryStore::new();
        store.add_trading_account(3, 10).await;
        let new = |login| NewCredential {
            trading_account_id: 3,
            login,
            server: "Broker-Demo".to_string(),
            encrypted_password: "gAAAA...".to_string(),
        };

        let first = store.upsert_credential(new(1)).await.unwrap();
        store
            .set_status(3, AccountStatus::Error, Some("boom".to_string()))
            .await
            .unwrap();
        let second = store.upsert_credential(new(2)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.login, 2);
        assert_eq!(second.status, AccountStatus::Connected);
        assert_eq!(second.error_message, None);
    }

    #[tokio::test]
    async fn test_unknown_account_has_no_owner() {
        let store = MemoryStore::new();
        assert_eq!(store.account_owner(99).await.unwrap(), None);
        assert!(!store
            .set_status(99, AccountStatus::Connected, None)
            .await
            .unwrap());
    }
}
