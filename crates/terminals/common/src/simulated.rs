use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use tradetrack_core::*;

#[derive(Debug, Clone)]
struct SimulatedAccount {
    server: String,
    password: String,
    info: AccountInfo,
    deals: Vec<DealRecord>,
}

#[derive(Default)]
struct Shared {
    accounts: HashMap<i64, SimulatedAccount>,
    connect_error: Option<TerminalError>,
    fetch_error: Option<TerminalError>,
    delay: Option<Duration>,
    connects: usize,
    disconnects: usize,
    logged_in: Option<i64>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An in-memory terminal for development and tests.
///
/// Holds investor accounts with their deal history and behaves like the MT5
/// terminal: one login at a time (a second `connect` before `disconnect`
/// fails), `-6 Authorization failed` on bad credentials, deal history
/// filtered to the requested window.
pub struct SimulatedTerminal {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side control over a [`SimulatedTerminal`] that has been handed to a
/// session manager.
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedTerminal {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    async fn pause(&self) {
        let delay = lock(&self.shared).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for SimulatedTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHandle {
    /// Another terminal over the same accounts and counters, for callers that
    /// build a fresh terminal per session.
    pub fn terminal(&self) -> SimulatedTerminal {
        SimulatedTerminal {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn add_account(&self, login: i64, server: &str, password: &str) {
        let info = AccountInfo {
            login,
            server: server.to_string(),
            name: Some(format!("Investor {}", login)),
            currency: Some("USD".to_string()),
            balance: Decimal::new(10_000, 0),
            equity: Decimal::new(10_000, 0),
        };
        lock(&self.shared).accounts.insert(
            login,
            SimulatedAccount {
                server: server.to_string(),
                password: password.to_string(),
                info,
                deals: Vec::new(),
            },
        );
    }

    /// Append a raw deal record to an account's history. Non-object values
    /// are ignored.
    pub fn add_deal(&self, login: i64, deal: Value) {
        let Value::Object(record) = deal else {
            return;
        };
        if let Some(account) = lock(&self.shared).accounts.get_mut(&login) {
            account.deals.push(record);
        }
    }

    pub fn fail_connect(&self, error: Option<TerminalError>) {
        lock(&self.shared).connect_error = error;
    }

    pub fn fail_fetch(&self, error: Option<TerminalError>) {
        lock(&self.shared).fetch_error = error;
    }

    /// Delay applied to every connect and fetch.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.shared).delay = Some(delay);
    }

    pub fn connects(&self) -> usize {
        lock(&self.shared).connects
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.shared).disconnects
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).logged_in.is_some()
    }
}

#[async_trait]
impl Terminal for SimulatedTerminal {
    async fn connect(&mut self, credentials: &TerminalCredentials) -> Result<(), TerminalError> {
        self.pause().await;
        let mut shared = lock(&self.shared);
        shared.connects += 1;

        if let Some(err) = shared.connect_error.clone() {
            return Err(err);
        }
        if let Some(active) = shared.logged_in {
            return Err(TerminalError::Protocol(format!(
                "terminal already logged in as {}",
                active
            )));
        }

        let authorized = shared.accounts.get(&credentials.login).is_some_and(|a| {
            a.server == credentials.server && a.password == credentials.password.as_str()
        });
        if !authorized {
            return Err(TerminalError::LoginFailed {
                code: AUTHORIZATION_FAILED_CODE,
                message: "Authorization failed".to_string(),
            });
        }

        shared.logged_in = Some(credentials.login);
        debug!(login = credentials.login, "Simulated terminal login");
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut shared = lock(&self.shared);
        shared.disconnects += 1;
        shared.logged_in = None;
    }

    async fn account_info(&mut self) -> Result<Option<AccountInfo>, TerminalError> {
        let shared = lock(&self.shared);
        let login = shared.logged_in.ok_or(TerminalError::NotConnected)?;
        Ok(shared.accounts.get(&login).map(|a| a.info.clone()))
    }

    async fn get_deals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, TerminalError> {
        self.pause().await;
        let shared = lock(&self.shared);
        if let Some(err) = shared.fetch_error.clone() {
            return Err(err);
        }
        let login = shared.logged_in.ok_or(TerminalError::NotConnected)?;

        let window = SyncWindow { from, to };
        let deals = shared
            .accounts
            .get(&login)
            .map(|a| {
                a.deals
                    .iter()
                    .filter(|d| {
                        d.get("time")
                            .and_then(Value::as_i64)
                            .and_then(|t| DateTime::from_timestamp(t, 0))
                            .is_some_and(|t| window.contains(t))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(deals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zeroize::Zeroizing;

    fn creds(server: &str, password: &str) -> TerminalCredentials {
        TerminalCredentials::new(42, server, Zeroizing::new(password.to_string()))
    }

    #[tokio::test]
    async fn test_login_requires_matching_server_and_password() {
        let mut terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(42, "Demo", "pw");

        let err = terminal.connect(&creds("Other", "pw")).await.unwrap_err();
        assert!(err.is_authorization_failure());
        assert!(terminal.connect(&creds("Demo", "pw")).await.is_ok());
        assert!(handle.is_connected());
        assert_eq!(handle.connects(), 2);
    }

    #[tokio::test]
    async fn test_calls_before_login_fail() {
        let mut terminal = SimulatedTerminal::new();
        assert!(matches!(
            terminal.account_info().await,
            Err(TerminalError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_deals_filtered_to_half_open_window() {
        let mut terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(42, "Demo", "pw");
        for t in [99, 100, 150, 200] {
            handle.add_deal(42, json!({"ticket": t, "time": t}));
        }
        terminal.connect(&creds("Demo", "pw")).await.unwrap();

        let from = DateTime::from_timestamp(100, 0).unwrap();
        let to = DateTime::from_timestamp(200, 0).unwrap();
        let deals = terminal.get_deals(from, to).await.unwrap();

        let tickets: Vec<_> = deals.iter().map(|d| d["ticket"].clone()).collect();
        assert_eq!(tickets, vec![json!(100), json!(150)]);
    }

    #[tokio::test]
    async fn test_second_login_rejected_until_disconnect() {
        let mut first = SimulatedTerminal::new();
        let handle = first.handle();
        handle.add_account(42, "Demo", "pw");
        let mut second = handle.terminal();

        first.connect(&creds("Demo", "pw")).await.unwrap();
        let err = second.connect(&creds("Demo", "pw")).await.unwrap_err();
        assert!(matches!(err, TerminalError::Protocol(_)));

        first.disconnect().await;
        assert!(second.connect(&creds("Demo", "pw")).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_connect_error() {
        let mut terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.fail_connect(Some(TerminalError::InitFailed {
            code: -10003,
            message: "IPC initialize failed".to_string(),
        }));

        let err = terminal.connect(&creds("Demo", "pw")).await.unwrap_err();
        assert_eq!(err.diagnostic_code(), Some(-10003));
    }
}
