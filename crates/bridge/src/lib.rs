//! Desktop bridge between a local MT5 terminal and the TradeTrack backend.
//!
//! The web app configures the bridge through a loopback server and asks it
//! to sync on demand. Each sync reads the backend's cursor, fetches that
//! window from the terminal and pushes the raw deals for ingestion.

pub mod backend;
pub mod config;
pub mod i18n;
pub mod server;
pub mod sync;

pub use backend::{BackendClient, BackendError, PushResult, SyncBackend};
pub use config::{BridgeConfig, BridgeFiles, ConfigError, LocalState};
pub use i18n::{Language, Text};
pub use server::{BridgeState, DEFAULT_BIND};
pub use sync::{run_cycle, terminal_failure, BridgeSyncError, Connector, LiveConnector, SyncOutcome};
