pub mod db;
pub mod memory;
pub mod vault;

pub use memory::MemoryStore;
pub use vault::{PasswordVault, VaultError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradetrack_core::*;

/// A PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pub pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(db::db_err)?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {}", e)))?;
        tracing::info!("Database ready");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl TradeLedger for PgStore {
    async fn trade_exists(
        &self,
        trading_account_id: i64,
        terminal_trade_id: &str,
    ) -> Result<bool, StoreError> {
        db::trade_exists(&self.pool, trading_account_id, terminal_trade_id).await
    }

    async fn insert_trade(
        &self,
        trading_account_id: i64,
        trade: &CompletedTrade,
    ) -> Result<InsertOutcome, StoreError> {
        db::insert_trade(&self.pool, trading_account_id, trade).await
    }
}

#[async_trait]
impl SyncStateStore for PgStore {
    async fn load_sync_state(&self, trading_account_id: i64) -> Result<SyncState, StoreError> {
        db::load_sync_state(&self.pool, trading_account_id).await
    }

    async fn advance_sync_state(
        &self,
        trading_account_id: i64,
        to: DateTime<Utc>,
        last_deal: Option<DealCursor>,
    ) -> Result<SyncState, StoreError> {
        db::advance_sync_state(&self.pool, trading_account_id, to, last_deal).await
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn account_owner(&self, trading_account_id: i64) -> Result<Option<i64>, StoreError> {
        db::account_owner(&self.pool, trading_account_id).await
    }

    async fn credential(
        &self,
        trading_account_id: i64,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        db::credential(&self.pool, trading_account_id).await
    }

    async fn upsert_credential(&self, new: NewCredential) -> Result<CredentialRecord, StoreError> {
        db::upsert_credential(&self.pool, &new).await
    }

    async fn set_status(
        &self,
        trading_account_id: i64,
        status: AccountStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        db::set_status(&self.pool, trading_account_id, status, error_message.as_deref()).await
    }

    async fn delete_credential(&self, trading_account_id: i64) -> Result<bool, StoreError> {
        db::delete_credential(&self.pool, trading_account_id).await
    }
}
