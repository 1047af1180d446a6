use tracing::{debug, info, warn};
use tradetrack_core::*;

/// Write completed trades to the ledger, one at a time.
///
/// Trades already present are skipped. A failure on one trade is recorded in
/// [`WriteStats::errors`] and the batch carries on with the next.
pub async fn write_trades<L>(
    ledger: &L,
    trading_account_id: i64,
    trades: &[CompletedTrade],
) -> WriteStats
where
    L: TradeLedger + ?Sized,
{
    let mut stats = WriteStats {
        total: trades.len(),
        ..Default::default()
    };

    for trade in trades {
        match write_one(ledger, trading_account_id, trade).await {
            Ok(InsertOutcome::Inserted) => stats.synced += 1,
            Ok(InsertOutcome::Duplicate) => {
                debug!(terminal_trade_id = %trade.terminal_trade_id, "Trade already recorded");
                stats.skipped += 1;
            }
            Err(e) => {
                warn!(
                    trading_account_id,
                    position_id = trade.position_id,
                    error = %e,
                    "Failed to record trade"
                );
                stats.errors.push(TradeWriteError {
                    position_id: trade.position_id,
                    terminal_trade_id: trade.terminal_trade_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        trading_account_id,
        synced = stats.synced,
        skipped = stats.skipped,
        errors = stats.errors.len(),
        "Trade write complete"
    );
    stats
}

async fn write_one<L>(
    ledger: &L,
    trading_account_id: i64,
    trade: &CompletedTrade,
) -> Result<InsertOutcome, StoreError>
where
    L: TradeLedger + ?Sized,
{
    if ledger
        .trade_exists(trading_account_id, &trade.terminal_trade_id)
        .await?
    {
        return Ok(InsertOutcome::Duplicate);
    }
    // The store's unique constraint settles races with a concurrent sync.
    ledger.insert_trade(trading_account_id, trade).await
}
