use crate::auth::TokenVerifier;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tradetrack_core::Store;
use tradetrack_data::PasswordVault;
use tradetrack_engine::SessionManager;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub vault: PasswordVault,
    pub auth: TokenVerifier,
    /// Per trading account: serializes status transitions and syncs.
    account_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        vault: PasswordVault,
        auth: TokenVerifier,
    ) -> Self {
        Self {
            store,
            sessions,
            vault,
            auth,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Hold the returned guard while reading and changing one account.
    pub async fn lock_account(&self, trading_account_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.account_locks.lock().await;
            Arc::clone(locks.entry(trading_account_id).or_default())
        };
        lock.lock_owned().await
    }
}
