use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tradetrack_core::*;

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

// ---------------------------------------------------------------------------
// Trade ledger
// ---------------------------------------------------------------------------

pub async fn trade_exists(
    pool: &PgPool,
    trading_account_id: i64,
    terminal_trade_id: &str,
) -> Result<bool, StoreError> {
    let row = sqlx::query(
        "SELECT 1 FROM trades
         WHERE trading_account_id = $1 AND terminal_trade_id = $2",
    )
    .bind(trading_account_id)
    .bind(terminal_trade_id)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;
    Ok(row.is_some())
}

/// Insert one trade. A conflicting `(trading_account_id, terminal_trade_id)`
/// inserts nothing and is reported as a duplicate.
pub async fn insert_trade(
    pool: &PgPool,
    trading_account_id: i64,
    trade: &CompletedTrade,
) -> Result<InsertOutcome, StoreError> {
    let result = sqlx::query(
        "INSERT INTO trades (
            trading_account_id, terminal_trade_id, terminal_name, from_terminal,
            position_id, symbol, type, quantity,
            entry_date, exit_date, entry_date_synthetic,
            entry_price, exit_price, profit, commission, swap, pnl
        ) VALUES (
            $1, $2, 'mt5', TRUE,
            $3, $4, $5, $6,
            $7, $8, $9,
            $10, $11, $12, $13, $14, $15
        )
        ON CONFLICT (trading_account_id, terminal_trade_id) DO NOTHING",
    )
    .bind(trading_account_id)
    .bind(&trade.terminal_trade_id)
    .bind(trade.position_id)
    .bind(&trade.symbol)
    .bind(trade.direction.as_str())
    .bind(trade.quantity)
    .bind(trade.entry_time)
    .bind(trade.exit_time)
    .bind(trade.entry_time_synthetic)
    .bind(trade.entry_price)
    .bind(trade.exit_price)
    .bind(trade.profit)
    .bind(trade.commission)
    .bind(trade.swap)
    .bind(trade.net_profit())
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(if result.rows_affected() == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    })
}

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

fn sync_state_from_row(r: &PgRow) -> SyncState {
    SyncState {
        trading_account_id: r.get("trading_account_id"),
        last_sync_at: r.get("last_sync_at"),
        last_deal_at: r.get("last_deal_at"),
        last_deal_ticket: r.get("last_deal_ticket"),
    }
}

pub async fn load_sync_state(pool: &PgPool, trading_account_id: i64) -> Result<SyncState, StoreError> {
    let row = sqlx::query(
        "SELECT trading_account_id, last_sync_at, last_deal_at, last_deal_ticket
         FROM mt5_sync_states
         WHERE trading_account_id = $1",
    )
    .bind(trading_account_id)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;

    Ok(row.as_ref().map(sync_state_from_row).unwrap_or(SyncState {
        trading_account_id,
        ..Default::default()
    }))
}

/// Upsert the cursor. `GREATEST` keeps the watermark monotonic even when two
/// runs race; the deal cursor only moves to a later `(time, ticket)`.
pub async fn advance_sync_state(
    pool: &PgPool,
    trading_account_id: i64,
    to: DateTime<Utc>,
    last_deal: Option<DealCursor>,
) -> Result<SyncState, StoreError> {
    let row = sqlx::query(
        "INSERT INTO mt5_sync_states
            (trading_account_id, last_sync_at, last_deal_at, last_deal_ticket, updated_at)
         VALUES ($1, $2, $3, $4, NOW())
         ON CONFLICT (trading_account_id) DO UPDATE SET
            last_sync_at = GREATEST(mt5_sync_states.last_sync_at, EXCLUDED.last_sync_at),
            last_deal_at = CASE
                WHEN EXCLUDED.last_deal_at IS NOT NULL AND (
                    mt5_sync_states.last_deal_at IS NULL
                    OR (EXCLUDED.last_deal_at, EXCLUDED.last_deal_ticket)
                       > (mt5_sync_states.last_deal_at, mt5_sync_states.last_deal_ticket))
                THEN EXCLUDED.last_deal_at
                ELSE mt5_sync_states.last_deal_at END,
            last_deal_ticket = CASE
                WHEN EXCLUDED.last_deal_at IS NOT NULL AND (
                    mt5_sync_states.last_deal_at IS NULL
                    OR (EXCLUDED.last_deal_at, EXCLUDED.last_deal_ticket)
                       > (mt5_sync_states.last_deal_at, mt5_sync_states.last_deal_ticket))
                THEN EXCLUDED.last_deal_ticket
                ELSE mt5_sync_states.last_deal_ticket END,
            updated_at = NOW()
         RETURNING trading_account_id, last_sync_at, last_deal_at, last_deal_ticket",
    )
    .bind(trading_account_id)
    .bind(to)
    .bind(last_deal.map(|c| c.time))
    .bind(last_deal.map(|c| c.ticket))
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    Ok(sync_state_from_row(&row))
}

// ---------------------------------------------------------------------------
// Accounts & credentials
// ---------------------------------------------------------------------------

const CREDENTIAL_COLUMNS: &str = "id, trading_account_id, mt5_login, mt5_server,
    encrypted_investor_password, status, error_message, created_at, updated_at";

fn credential_from_row(r: &PgRow) -> Result<CredentialRecord, StoreError> {
    let status: String = r.get("status");
    Ok(CredentialRecord {
        id: r.get("id"),
        trading_account_id: r.get("trading_account_id"),
        login: r.get("mt5_login"),
        server: r.get("mt5_server"),
        encrypted_password: r.get("encrypted_investor_password"),
        status: status.parse().map_err(StoreError::Corrupt)?,
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

pub async fn account_owner(pool: &PgPool, trading_account_id: i64) -> Result<Option<i64>, StoreError> {
    let row = sqlx::query("SELECT user_id FROM trading_accounts WHERE id = $1")
        .bind(trading_account_id)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
    Ok(row.map(|r| r.get("user_id")))
}

pub async fn credential(
    pool: &PgPool,
    trading_account_id: i64,
) -> Result<Option<CredentialRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM mt5_investor_accounts WHERE trading_account_id = $1",
        CREDENTIAL_COLUMNS
    ))
    .bind(trading_account_id)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;

    row.as_ref().map(credential_from_row).transpose()
}

pub async fn upsert_credential(pool: &PgPool, new: &NewCredential) -> Result<CredentialRecord, StoreError> {
    let row = sqlx::query(&format!(
        "INSERT INTO mt5_investor_accounts
            (trading_account_id, mt5_login, mt5_server, encrypted_investor_password,
             status, error_message, created_at, updated_at)
         VALUES ($1, $2, $3, $4, 'CONNECTED', NULL, NOW(), NOW())
         ON CONFLICT (trading_account_id) DO UPDATE SET
            mt5_login = EXCLUDED.mt5_login,
            mt5_server = EXCLUDED.mt5_server,
            encrypted_investor_password = EXCLUDED.encrypted_investor_password,
            status = 'CONNECTED',
            error_message = NULL,
            updated_at = NOW()
         RETURNING {}",
        CREDENTIAL_COLUMNS
    ))
    .bind(new.trading_account_id)
    .bind(new.login)
    .bind(&new.server)
    .bind(&new.encrypted_password)
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    credential_from_row(&row)
}

/// Status change under a row lock, so concurrent transitions for one account
/// apply one after the other.
pub async fn set_status(
    pool: &PgPool,
    trading_account_id: i64,
    status: AccountStatus,
    error_message: Option<&str>,
) -> Result<bool, StoreError> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    let locked = sqlx::query(
        "SELECT id FROM mt5_investor_accounts
         WHERE trading_account_id = $1
         FOR UPDATE",
    )
    .bind(trading_account_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_err)?;

    if locked.is_none() {
        tx.rollback().await.map_err(db_err)?;
        return Ok(false);
    }

    sqlx::query(
        "UPDATE mt5_investor_accounts
         SET status = $2, error_message = $3, updated_at = NOW()
         WHERE trading_account_id = $1",
    )
    .bind(trading_account_id)
    .bind(status.as_str())
    .bind(error_message)
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;
    Ok(true)
}

pub async fn delete_credential(pool: &PgPool, trading_account_id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM mt5_investor_accounts WHERE trading_account_id = $1")
        .bind(trading_account_id)
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}
