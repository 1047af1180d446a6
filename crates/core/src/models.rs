use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Terminal records
// ---------------------------------------------------------------------------

/// A deal exactly as the terminal reports it: field name → loosely typed value.
///
/// Only the deal normalizer looks inside these maps.
pub type DealRecord = serde_json::Map<String, serde_json::Value>;

/// Trade direction of a deal (terminal type code 0 = buy, 1 = sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Map a terminal deal type code. Balance, credit, correction and every
    /// other non-trade code yield `None`.
    pub fn from_type_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Direction::Buy),
            1 => Some(Direction::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a deal opens or closes its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Entry,
    Exit,
    Other,
}

impl EntryType {
    /// Map a terminal `DEAL_ENTRY_*` code: IN (0) opens, OUT (1) and
    /// OUT_BY (3) close. Reversals (INOUT, 2) are neither.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => EntryType::Entry,
            1 | 3 => EntryType::Exit,
            _ => EntryType::Other,
        }
    }
}

/// A single normalized terminal execution (one leg of a round trip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeal {
    pub ticket: i64,
    /// Terminal position identifier; `None` when the terminal reported 0 or
    /// nothing at all.
    pub position_id: Option<i64>,
    pub entry_type: EntryType,
    pub direction: Direction,
    pub symbol: String,
    /// Absolute traded volume.
    pub volume: Decimal,
    pub price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub time: DateTime<Utc>,
}

impl RawDeal {
    /// Key used to group legs into positions. Standalone records fall back to
    /// their own ticket so they are never silently lost.
    pub fn position_key(&self) -> i64 {
        self.position_id.unwrap_or(self.ticket)
    }
}

// ---------------------------------------------------------------------------
// Completed trades
// ---------------------------------------------------------------------------

/// A reconciled round-trip trade, ready to be written to the journal ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTrade {
    /// Deterministic ledger key, see [`CompletedTrade::trade_id_for`].
    pub terminal_trade_id: String,
    pub position_id: i64,
    pub exit_ticket: i64,
    pub symbol: String,
    /// Direction of the closing leg.
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// True when no opening leg was seen and `entry_time` is the
    /// `exit_time - 1h` approximation.
    pub entry_time_synthetic: bool,
    pub entry_price: Option<Decimal>,
    pub exit_price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
}

impl CompletedTrade {
    /// Offset used for the entry time when the opening leg is unknown.
    pub fn synthetic_entry_offset() -> Duration {
        Duration::hours(1)
    }

    pub fn trade_id_for(position_id: i64, exit_ticket: i64) -> String {
        format!("mt5_{}_{}", position_id, exit_ticket)
    }

    pub fn net_profit(&self) -> Decimal {
        self.profit + self.commission + self.swap
    }
}

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Half-open time range `[from, to)` fetched from the terminal in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.from && t < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

/// Server-side sync cursor for one trading account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub trading_account_id: i64,
    /// Watermark: end of the last successfully ingested window.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_deal_at: Option<DateTime<Utc>>,
    pub last_deal_ticket: Option<i64>,
}

impl SyncState {
    /// Move the watermark to `to` and record `last_deal` if it is newer than
    /// the stored cursor. Neither ever moves backwards.
    pub fn advance(&mut self, to: DateTime<Utc>, last_deal: Option<DealCursor>) {
        self.last_sync_at = Some(self.last_sync_at.map_or(to, |current| current.max(to)));

        if let Some(cursor) = last_deal {
            let newer = match (self.last_deal_at, self.last_deal_ticket) {
                (Some(at), Some(ticket)) => (cursor.time, cursor.ticket) > (at, ticket),
                _ => true,
            };
            if newer {
                self.last_deal_at = Some(cursor.time);
                self.last_deal_ticket = Some(cursor.ticket);
            }
        }
    }
}

/// Latest closing leg seen during a run, recorded alongside the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DealCursor {
    pub time: DateTime<Utc>,
    pub ticket: i64,
}

// ---------------------------------------------------------------------------
// Write statistics
// ---------------------------------------------------------------------------

/// A single trade that could not be written. The batch continues past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeWriteError {
    pub position_id: i64,
    pub terminal_trade_id: String,
    pub message: String,
}

impl fmt::Display for TradeWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error processing position {}: {}",
            self.position_id, self.message
        )
    }
}

/// Outcome of writing a batch of trades to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub synced: usize,
    pub skipped: usize,
    pub errors: Vec<TradeWriteError>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Credentials & account status
// ---------------------------------------------------------------------------

/// Connection status of a stored MT5 investor account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Disconnected,
    Connected,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Disconnected => "DISCONNECTED",
            AccountStatus::Connected => "CONNECTED",
            AccountStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISCONNECTED" => Ok(AccountStatus::Disconnected),
            "CONNECTED" => Ok(AccountStatus::Connected),
            "ERROR" => Ok(AccountStatus::Error),
            other => Err(format!("unknown account status '{}'", other)),
        }
    }
}

/// Stored investor credentials for one trading account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: i64,
    pub trading_account_id: i64,
    pub login: i64,
    pub server: String,
    /// Fernet ciphertext; the plaintext never reaches the store.
    pub encrypted_password: String,
    pub status: AccountStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert-or-replace payload for [`CredentialRecord`].
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub trading_account_id: i64,
    pub login: i64,
    pub server: String,
    pub encrypted_password: String,
}

/// Plaintext credentials for one terminal login.
///
/// The password lives in a zeroizing buffer and is wiped when the value is
/// dropped. `Debug` never prints it.
#[derive(Clone)]
pub struct TerminalCredentials {
    pub login: i64,
    pub server: String,
    pub password: Zeroizing<String>,
}

impl TerminalCredentials {
    pub fn new(login: i64, server: impl Into<String>, password: Zeroizing<String>) -> Self {
        Self {
            login,
            server: server.into(),
            password,
        }
    }
}

impl fmt::Debug for TerminalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalCredentials")
            .field("login", &self.login)
            .field("server", &self.server)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Account summary reported by the terminal after login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: i64,
    pub server: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub balance: Decimal,
    pub equity: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deal(ticket: i64, position_id: Option<i64>) -> RawDeal {
        RawDeal {
            ticket,
            position_id,
            entry_type: EntryType::Exit,
            direction: Direction::Sell,
            symbol: "EURUSD".to_string(),
            volume: dec!(0.10),
            price: dec!(1.0850),
            profit: dec!(12.5),
            commission: dec!(-0.7),
            swap: Decimal::ZERO,
            time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_position_key_falls_back_to_ticket() {
        assert_eq!(deal(77, Some(5)).position_key(), 5);
        assert_eq!(deal(77, None).position_key(), 77);
    }

    #[test]
    fn test_type_and_entry_codes() {
        assert_eq!(Direction::from_type_code(0), Some(Direction::Buy));
        assert_eq!(Direction::from_type_code(1), Some(Direction::Sell));
        assert_eq!(Direction::from_type_code(2), None); // balance
        assert_eq!(EntryType::from_code(0), EntryType::Entry);
        assert_eq!(EntryType::from_code(1), EntryType::Exit);
        assert_eq!(EntryType::from_code(3), EntryType::Exit);
        assert_eq!(EntryType::from_code(2), EntryType::Other);
    }

    #[test]
    fn test_account_status_round_trip() {
        for status in [
            AccountStatus::Disconnected,
            AccountStatus::Connected,
            AccountStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<AccountStatus>(), Ok(status));
        }
        assert!("PAUSED".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = TerminalCredentials::new(
            5_001_234,
            "MetaQuotes-Demo",
            Zeroizing::new("investor-secret".to_string()),
        );
        let printed = format!("{:?}", creds);
        assert!(printed.contains("MetaQuotes-Demo"));
        assert!(!printed.contains("investor-secret"));
    }

    #[test]
    fn test_sync_state_advance_never_regresses() {
        let at = |secs| DateTime::from_timestamp(secs, 0).unwrap();
        let cursor = |secs, ticket| Some(DealCursor { time: at(secs), ticket });
        let mut state = SyncState::default();

        state.advance(at(10), None);
        assert_eq!(state.last_sync_at, Some(at(10)));

        state.advance(at(20), cursor(15, 7));
        state.advance(at(5), cursor(12, 9));
        assert_eq!(state.last_sync_at, Some(at(20)));
        assert_eq!(state.last_deal_at, Some(at(15)));
        assert_eq!(state.last_deal_ticket, Some(7));

        // Same time, higher ticket wins.
        state.advance(at(20), cursor(15, 8));
        assert_eq!(state.last_deal_ticket, Some(8));
    }

    #[test]
    fn test_trade_write_error_display() {
        let err = TradeWriteError {
            position_id: 42,
            terminal_trade_id: "mt5_42_43".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error processing position 42: connection reset"
        );
    }
}
