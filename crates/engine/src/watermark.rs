use chrono::{DateTime, Duration, Utc};
use tradetrack_core::*;

/// History fetched on an account's first sync.
pub const BOOTSTRAP_DAYS: i64 = 30;

/// Decides which window to fetch next and how the watermark moves.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkTracker {
    bootstrap: Duration,
}

impl Default for WatermarkTracker {
    fn default() -> Self {
        Self {
            bootstrap: Duration::days(BOOTSTRAP_DAYS),
        }
    }
}

impl WatermarkTracker {
    pub fn new(bootstrap: Duration) -> Self {
        Self { bootstrap }
    }

    /// Window `[from, to)` for a run starting at `now`.
    ///
    /// `now` is captured once by the caller and used for the whole run. A
    /// watermark ahead of `now` (clock skew) yields an empty window rather
    /// than a reversed one.
    pub fn window(&self, previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SyncWindow {
        let from = previous.unwrap_or(now - self.bootstrap).min(now);
        SyncWindow { from, to: now }
    }
}

/// Latest closing leg among the trades of a run.
pub fn latest_exit(trades: &[CompletedTrade]) -> Option<DealCursor> {
    trades
        .iter()
        .max_by_key(|t| (t.exit_time, t.exit_ticket))
        .map(|t| DealCursor {
            time: t.exit_time,
            ticket: t.exit_ticket,
        })
}
