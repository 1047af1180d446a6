pub mod normalizer;
pub mod reconciler;
pub mod session;
pub mod sync;
pub mod watermark;
pub mod writer;

pub use normalizer::{normalize_deals, DealParseError, NormalizedDeals};
pub use reconciler::reconcile;
pub use session::{SessionManager, SessionState, DEFAULT_TERMINAL_TIMEOUT};
pub use sync::{ingest_deals, sync_account, SyncError, SyncReport};
pub use watermark::WatermarkTracker;
pub use writer::write_trades;
