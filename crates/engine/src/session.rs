//! Connect / fetch / disconnect lifecycle against the trading terminal.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use tradetrack_core::*;

/// Upper bound for a single terminal call unless configured otherwise.
pub const DEFAULT_TERMINAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the terminal session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Fetching,
    Error,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Error, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Fetching)
                | (Connected, Disconnected)
                | (Fetching, Disconnected)
                | (Fetching, Error)
                | (Error, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Fetching => "FETCHING",
            SessionState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Owns the terminal and serializes every session against it.
///
/// The terminal holds one login at a time, so the whole
/// connect → call → disconnect sequence runs under a single lock.
pub struct SessionManager {
    terminal: Mutex<Box<dyn Terminal>>,
    state: RwLock<SessionState>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(terminal: Box<dyn Terminal>, timeout: Duration) -> Self {
        Self {
            terminal: Mutex::new(terminal),
            state: RwLock::new(SessionState::Disconnected),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Log in, read the account summary and log out again.
    pub async fn probe(
        &self,
        credentials: TerminalCredentials,
    ) -> Result<Option<AccountInfo>, TerminalError> {
        let mut terminal = self.terminal.lock().await;
        self.open(&mut **terminal, credentials).await?;

        self.transition(SessionState::Fetching).await;
        let result = self.bounded(terminal.account_info()).await;
        self.close(&mut **terminal, result.is_err()).await;
        result
    }

    /// Log in, pull deal history for `[from, to)` and log out again.
    pub async fn fetch_deals(
        &self,
        credentials: TerminalCredentials,
        window: SyncWindow,
    ) -> Result<Vec<DealRecord>, TerminalError> {
        let mut terminal = self.terminal.lock().await;
        self.open(&mut **terminal, credentials).await?;

        self.transition(SessionState::Fetching).await;
        let result = self
            .bounded(terminal.get_deals(window.from, window.to))
            .await;
        self.close(&mut **terminal, result.is_err()).await;

        if let Ok(records) = &result {
            debug!(
                records = records.len(),
                from = %window.from,
                to = %window.to,
                "Fetched terminal deal history"
            );
        }
        result
    }

    async fn open(
        &self,
        terminal: &mut dyn Terminal,
        credentials: TerminalCredentials,
    ) -> Result<(), TerminalError> {
        self.transition(SessionState::Connecting).await;
        let login = credentials.login;
        let result = self.bounded(terminal.connect(&credentials)).await;
        drop(credentials);

        match result {
            Ok(()) => {
                info!(login, "Terminal session opened");
                self.transition(SessionState::Connected).await;
                Ok(())
            }
            Err(e) => {
                warn!(login, error = %e, "Terminal connect failed");
                self.transition(SessionState::Error).await;
                self.shutdown(terminal).await;
                self.transition(SessionState::Disconnected).await;
                Err(e)
            }
        }
    }

    async fn close(&self, terminal: &mut dyn Terminal, failed: bool) {
        if failed {
            self.transition(SessionState::Error).await;
        }
        self.shutdown(terminal).await;
        self.transition(SessionState::Disconnected).await;
    }

    async fn shutdown(&self, terminal: &mut dyn Terminal) {
        if tokio::time::timeout(self.timeout, terminal.disconnect())
            .await
            .is_err()
        {
            warn!(timeout = ?self.timeout, "Terminal disconnect timed out");
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, TerminalError>
    where
        F: Future<Output = Result<T, TerminalError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| TerminalError::Timeout(self.timeout))?
    }

    async fn transition(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            warn!(from = %*state, to = %next, "Unexpected session transition");
        }
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use tradetrack_terminals_common::SimulatedTerminal;
    use zeroize::Zeroizing;

    fn creds(password: &str) -> TerminalCredentials {
        TerminalCredentials::new(5_001, "Demo-Server", Zeroizing::new(password.to_string()))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn window(from: DateTime<Utc>, to: DateTime<Utc>) -> SyncWindow {
        SyncWindow { from, to }
    }

    #[test]
    fn test_state_machine_transitions() {
        use SessionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Error));
        assert!(Fetching.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Fetching));
        assert!(!Connected.can_transition_to(Error));
    }

    #[tokio::test]
    async fn test_probe_returns_account_and_disconnects() {
        let terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(5_001, "Demo-Server", "secret");
        let sessions = SessionManager::new(Box::new(terminal), DEFAULT_TERMINAL_TIMEOUT);

        let info = sessions.probe(creds("secret")).await.unwrap().unwrap();

        assert_eq!(info.login, 5_001);
        assert_eq!(handle.connects(), 1);
        assert_eq!(handle.disconnects(), 1);
        assert_eq!(sessions.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_login_still_disconnects() {
        let terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(5_001, "Demo-Server", "secret");
        let sessions = SessionManager::new(Box::new(terminal), DEFAULT_TERMINAL_TIMEOUT);

        let err = sessions.probe(creds("wrong")).await.unwrap_err();

        assert!(err.is_authorization_failure());
        assert_eq!(handle.disconnects(), 1);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_fetch_failure_still_disconnects() {
        let terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(5_001, "Demo-Server", "secret");
        handle.fail_fetch(Some(TerminalError::Protocol("history unavailable".into())));
        let sessions = SessionManager::new(Box::new(terminal), DEFAULT_TERMINAL_TIMEOUT);

        let result = sessions
            .fetch_deals(creds("secret"), window(at(0), at(1_000)))
            .await;

        assert!(matches!(result, Err(TerminalError::Protocol(_))));
        assert_eq!(handle.connects(), 1);
        assert_eq!(handle.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_fetch_returns_deals_in_window() {
        let terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(5_001, "Demo-Server", "secret");
        handle.add_deal(5_001, json!({"ticket": 1, "type": 0, "time": 100}));
        handle.add_deal(5_001, json!({"ticket": 2, "type": 1, "time": 2_000}));
        let sessions = SessionManager::new(Box::new(terminal), DEFAULT_TERMINAL_TIMEOUT);

        let records = sessions
            .fetch_deals(creds("secret"), window(at(0), at(1_000)))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["ticket"], json!(1));
    }

    #[tokio::test]
    async fn test_concurrent_calls_take_turns_on_the_terminal() {
        let terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(5_001, "Demo-Server", "secret");
        handle.add_deal(5_001, json!({"ticket": 1, "type": 0, "time": 100}));
        handle.set_delay(Duration::from_millis(30));
        let sessions = SessionManager::new(Box::new(terminal), DEFAULT_TERMINAL_TIMEOUT);

        // The simulated terminal refuses a login while another is open, so
        // overlapping sessions would fail one of these.
        let (info, records) = tokio::join!(
            sessions.probe(creds("secret")),
            sessions.fetch_deals(creds("secret"), window(at(0), at(1_000))),
        );

        assert_eq!(info.unwrap().unwrap().login, 5_001);
        assert_eq!(records.unwrap().len(), 1);
        assert_eq!(handle.connects(), 2);
        assert_eq!(handle.disconnects(), 2);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_slow_terminal_times_out() {
        let terminal = SimulatedTerminal::new();
        let handle = terminal.handle();
        handle.add_account(5_001, "Demo-Server", "secret");
        handle.set_delay(Duration::from_millis(200));
        let sessions = SessionManager::new(Box::new(terminal), Duration::from_millis(20));

        let err = sessions.probe(creds("secret")).await.unwrap_err();

        assert!(matches!(err, TerminalError::Timeout(_)));
        assert_eq!(sessions.state().await, SessionState::Disconnected);
    }
}
