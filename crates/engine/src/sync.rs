//! One incremental sync run: fetch → normalize → reconcile → write → advance.

use crate::normalizer::{normalize_deals, DealParseError};
use crate::reconciler::reconcile;
use crate::session::SessionManager;
use crate::watermark::{latest_exit, WatermarkTracker};
use crate::writer::write_trades;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use tradetrack_core::*;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a sync run did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub window: SyncWindow,
    pub deals_fetched: usize,
    pub filtered: usize,
    pub rejected: Vec<DealParseError>,
    pub trades: usize,
    pub stats: WriteStats,
    pub state: SyncState,
}

impl SyncReport {
    /// Per-trade write failures followed by rejected deal records.
    pub fn error_messages(&self) -> Vec<String> {
        self.stats
            .errors
            .iter()
            .map(ToString::to_string)
            .chain(self.rejected.iter().map(ToString::to_string))
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Synced {} trades, skipped {} duplicates",
            self.stats.synced, self.stats.skipped
        )
    }
}

/// Ingest deal records already fetched for `window` and advance the
/// watermark to `window.to`.
///
/// Per-trade write failures do not stop the run; they are reported in the
/// returned stats and the watermark still advances. A store failure while
/// advancing is returned as an error and leaves the watermark untouched.
pub async fn ingest_deals<S>(
    store: &S,
    trading_account_id: i64,
    window: SyncWindow,
    records: &[DealRecord],
) -> Result<SyncReport, SyncError>
where
    S: TradeLedger + SyncStateStore + ?Sized,
{
    let normalized = normalize_deals(records);
    let trades = reconcile(&normalized.deals);
    let stats = write_trades(store, trading_account_id, &trades).await;

    let state = store
        .advance_sync_state(trading_account_id, window.to, latest_exit(&trades))
        .await?;

    Ok(SyncReport {
        window,
        deals_fetched: records.len(),
        filtered: normalized.filtered,
        rejected: normalized.rejected,
        trades: trades.len(),
        stats,
        state,
    })
}

/// Full server-driven sync for one account through the session manager.
///
/// `now` is captured once by the caller and closes the fetch window.
pub async fn sync_account<S>(
    sessions: &SessionManager,
    store: &S,
    trading_account_id: i64,
    credentials: TerminalCredentials,
    now: DateTime<Utc>,
) -> Result<SyncReport, SyncError>
where
    S: TradeLedger + SyncStateStore + ?Sized,
{
    let run_id = Uuid::new_v4();
    let previous = store.load_sync_state(trading_account_id).await?;
    let window = WatermarkTracker::default().window(previous.last_sync_at, now);

    info!(
        %run_id,
        trading_account_id,
        from = %window.from,
        to = %window.to,
        "Starting sync"
    );

    let records = if window.is_empty() {
        Vec::new()
    } else {
        match sessions.fetch_deals(credentials, window).await {
            Ok(records) => records,
            Err(e) => {
                error!(%run_id, trading_account_id, error = %e, "Sync aborted; watermark unchanged");
                return Err(e.into());
            }
        }
    };

    let report = ingest_deals(store, trading_account_id, window, &records).await?;
    info!(
        %run_id,
        trading_account_id,
        fetched = report.deals_fetched,
        trades = report.trades,
        synced = report.stats.synced,
        skipped = report.stats.skipped,
        errors = report.stats.errors.len(),
        "Sync complete"
    );
    Ok(report)
}
