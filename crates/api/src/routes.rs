use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use tradetrack_core::*;
use tradetrack_engine::{ingest_deals, sync_account, SyncError, SyncReport};
use zeroize::Zeroizing;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Account connection
        .route("/mt5/connect", post(connect))
        .route("/mt5/test-connection", post(test_connection))
        .route("/mt5/status/{trading_account_id}", get(status))
        .route("/mt5/disconnect/{trading_account_id}", delete(disconnect))
        // Sync
        .route("/mt5/sync/{trading_account_id}", post(sync))
        .route("/mt5/sync/deals", post(sync_deals))
        // Desktop bridge
        .route("/mt5/bridge/connected", post(bridge_connected))
        .route("/mt5/bridge/sync-state/{trading_account_id}", get(bridge_sync_state))
}

// ---------------------------------------------------------------------------
// Service info
// ---------------------------------------------------------------------------

pub(crate) async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "TradeTrack MT5 Integration API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(crate) async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The caller must own the trading account. Unknown accounts are reported
/// the same way as foreign ones.
async fn ensure_owner(state: &AppState, user: AuthUser, trading_account_id: i64) -> Result<(), ApiError> {
    match state.store.account_owner(trading_account_id).await? {
        Some(owner) if owner == user.user_id => Ok(()),
        _ => {
            warn!(
                user_id = user.user_id,
                trading_account_id, "Access denied to trading account"
            );
            Err(ApiError::Forbidden)
        }
    }
}

async fn stored_credential(state: &AppState, trading_account_id: i64) -> Result<CredentialRecord, ApiError> {
    state
        .store
        .credential(trading_account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("MT5 account not found".to_string()))
}

/// Terminal error text shown to the user, with a hint for rejected logins.
pub fn terminal_message(err: &TerminalError) -> String {
    if err.is_authorization_failure() {
        format!(
            "{} (check that the investor password, login and server are correct \
             and that algorithmic trading is allowed in MT5)",
            err
        )
    } else {
        err.to_string()
    }
}

/// Trading account ids arrive as numbers from the web app and as strings
/// from the desktop bridge.
fn account_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("trading account id must be an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom("trading account id must be numeric")),
        _ => Err(serde::de::Error::custom("trading account id must be a number")),
    }
}

fn validate_login(login: i64, server: &str) -> Result<(), ApiError> {
    if login <= 0 {
        return Err(ApiError::BadRequest("MT5 login must be a positive number".to_string()));
    }
    if server.trim().is_empty() {
        return Err(ApiError::BadRequest("MT5 server is required".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Connect / test / status / disconnect
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    #[serde(alias = "trading_account_id", deserialize_with = "account_id")]
    trading_account_id: i64,
    #[serde(alias = "mt5Login", alias = "mt5_login")]
    login: i64,
    #[serde(alias = "mt5Server", alias = "mt5_server")]
    server: String,
    #[serde(alias = "investor_password")]
    investor_password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_id: Option<i64>,
    status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn connect(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    ensure_owner(&state, user, req.trading_account_id).await?;
    validate_login(req.login, &req.server)?;
    let _guard = state.lock_account(req.trading_account_id).await;

    let server = req.server.trim().to_string();
    let password = Zeroizing::new(req.investor_password);
    let encrypted_password = state.vault.encrypt(&password);
    let credentials = TerminalCredentials::new(req.login, server.clone(), password);

    if let Err(e) = state.sessions.probe(credentials).await {
        info!(trading_account_id = req.trading_account_id, error = %e, "MT5 connect rejected");
        return Ok(Json(ConnectResponse {
            success: false,
            account_id: None,
            status: AccountStatus::Error,
            message: Some(terminal_message(&e)),
        }));
    }

    let record = state
        .store
        .upsert_credential(NewCredential {
            trading_account_id: req.trading_account_id,
            login: req.login,
            server,
            encrypted_password,
        })
        .await?;

    info!(
        trading_account_id = record.trading_account_id,
        login = record.login,
        "MT5 account connected"
    );
    Ok(Json(ConnectResponse {
        success: true,
        account_id: Some(record.id),
        status: record.status,
        message: Some("Successfully connected to MT5".to_string()),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestConnectionRequest {
    #[serde(alias = "mt5Login", alias = "mt5_login")]
    login: i64,
    #[serde(alias = "mt5Server", alias = "mt5_server")]
    server: String,
    #[serde(alias = "investor_password")]
    investor_password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummary {
    login: i64,
    server: String,
    balance: Decimal,
    equity: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestConnectionResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_info: Option<AccountSummary>,
}

async fn test_connection(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(req): Json<TestConnectionRequest>,
) -> Result<Json<TestConnectionResponse>, ApiError> {
    validate_login(req.login, &req.server)?;
    let credentials = TerminalCredentials::new(
        req.login,
        req.server.trim(),
        Zeroizing::new(req.investor_password),
    );

    let response = match state.sessions.probe(credentials).await {
        Ok(Some(info)) => TestConnectionResponse {
            success: true,
            message: "Connection successful".to_string(),
            account_info: Some(AccountSummary {
                login: info.login,
                server: info.server,
                balance: info.balance,
                equity: info.equity,
            }),
        },
        Ok(None) => TestConnectionResponse {
            success: true,
            message: "Connection successful, but could not retrieve account info".to_string(),
            account_info: None,
        },
        Err(e) => TestConnectionResponse {
            success: false,
            message: terminal_message(&e),
            account_info: None,
        },
    };
    Ok(Json(response))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    trading_account_id: i64,
    status: AccountStatus,
    login: Option<i64>,
    server: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

async fn status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(trading_account_id): Path<i64>,
) -> Result<Json<StatusResponse>, ApiError> {
    ensure_owner(&state, user, trading_account_id).await?;
    let record = stored_credential(&state, trading_account_id).await?;
    let sync_state = state.store.load_sync_state(trading_account_id).await?;

    Ok(Json(StatusResponse {
        trading_account_id,
        status: record.status,
        login: Some(record.login),
        server: Some(record.server),
        last_sync_at: sync_state.last_sync_at,
        error_message: record.error_message,
    }))
}

#[derive(Serialize)]
struct DisconnectResponse {
    success: bool,
    message: String,
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(trading_account_id): Path<i64>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    ensure_owner(&state, user, trading_account_id).await?;
    let _guard = state.lock_account(trading_account_id).await;

    if !state.store.delete_credential(trading_account_id).await? {
        return Err(ApiError::NotFound("MT5 account not found".to_string()));
    }
    info!(trading_account_id, "MT5 account disconnected");
    Ok(Json(DisconnectResponse {
        success: true,
        message: "MT5 account disconnected and removed".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    success: bool,
    synced: usize,
    skipped: usize,
    errors: Vec<String>,
    total: usize,
    message: String,
}

impl SyncResponse {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            synced: 0,
            skipped: 0,
            errors: Vec::new(),
            total: 0,
            message,
        }
    }
}

impl From<&SyncReport> for SyncResponse {
    fn from(report: &SyncReport) -> Self {
        Self {
            success: true,
            synced: report.stats.synced,
            skipped: report.stats.skipped,
            errors: report.error_messages(),
            total: report.stats.total,
            message: report.summary(),
        }
    }
}

async fn sync(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(trading_account_id): Path<i64>,
) -> Result<Json<SyncResponse>, ApiError> {
    ensure_owner(&state, user, trading_account_id).await?;
    let _guard = state.lock_account(trading_account_id).await;

    let record = stored_credential(&state, trading_account_id).await?;
    if record.status != AccountStatus::Connected {
        return Ok(Json(SyncResponse::failed(format!(
            "Account is not connected. Status: {}",
            record.status
        ))));
    }

    let password = state.vault.decrypt(&record.encrypted_password)?;
    let credentials = TerminalCredentials::new(record.login, record.server, password);

    match sync_account(
        state.sessions.as_ref(),
        state.store.as_ref(),
        trading_account_id,
        credentials,
        Utc::now(),
    )
    .await
    {
        Ok(report) => {
            state
                .store
                .set_status(trading_account_id, AccountStatus::Connected, None)
                .await?;
            Ok(Json(SyncResponse::from(&report)))
        }
        Err(SyncError::Terminal(e)) => {
            let message = terminal_message(&e);
            state
                .store
                .set_status(trading_account_id, AccountStatus::Error, Some(message.clone()))
                .await?;
            Ok(Json(SyncResponse::failed(format!(
                "Failed to connect to MT5: {}",
                message
            ))))
        }
        Err(SyncError::Store(e)) => Err(e.into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncDealsRequest {
    #[serde(alias = "trading_account_id", deserialize_with = "account_id")]
    trading_account_id: i64,
    #[serde(alias = "window_from")]
    window_from: DateTime<Utc>,
    #[serde(alias = "window_to")]
    window_to: DateTime<Utc>,
    #[serde(default)]
    deals: Vec<DealRecord>,
}

/// Ingest deals the desktop bridge fetched from its local terminal.
async fn sync_deals(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SyncDealsRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    ensure_owner(&state, user, req.trading_account_id).await?;
    let _guard = state.lock_account(req.trading_account_id).await;

    // A bridge clock running ahead must not push the watermark into the future.
    let window = SyncWindow {
        from: req.window_from,
        to: req.window_to.min(Utc::now()),
    };
    if window.from > window.to {
        return Err(ApiError::BadRequest(
            "windowFrom must not be later than windowTo".to_string(),
        ));
    }
    let previous = state.store.load_sync_state(req.trading_account_id).await?;
    if let Some(watermark) = previous.last_sync_at {
        if window.from > watermark {
            return Err(ApiError::BadRequest(format!(
                "windowFrom is later than the sync watermark {}",
                watermark.to_rfc3339()
            )));
        }
    }

    let report = ingest_deals(
        state.store.as_ref(),
        req.trading_account_id,
        window,
        &req.deals,
    )
    .await
    .map_err(|e| match e {
        SyncError::Store(e) => ApiError::Store(e),
        SyncError::Terminal(e) => ApiError::BadRequest(e.to_string()),
    })?;

    info!(
        trading_account_id = req.trading_account_id,
        deals = req.deals.len(),
        synced = report.stats.synced,
        skipped = report.stats.skipped,
        "Bridge deals ingested"
    );
    Ok(Json(SyncResponse::from(&report)))
}

// ---------------------------------------------------------------------------
// Desktop bridge
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeConnectedRequest {
    #[serde(alias = "trading_account_id", deserialize_with = "account_id")]
    trading_account_id: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BridgeConnectedResponse {
    success: bool,
    trading_account_id: i64,
    sync_state: SyncState,
}

async fn bridge_connected(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<BridgeConnectedRequest>,
) -> Result<Json<BridgeConnectedResponse>, ApiError> {
    ensure_owner(&state, user, req.trading_account_id).await?;
    let _guard = state.lock_account(req.trading_account_id).await;

    // Accounts connected only through the bridge have no stored credentials.
    state
        .store
        .set_status(req.trading_account_id, AccountStatus::Connected, None)
        .await?;
    let sync_state = state.store.load_sync_state(req.trading_account_id).await?;

    info!(trading_account_id = req.trading_account_id, "Bridge connected");
    Ok(Json(BridgeConnectedResponse {
        success: true,
        trading_account_id: req.trading_account_id,
        sync_state,
    }))
}

async fn bridge_sync_state(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(trading_account_id): Path<i64>,
) -> Result<Json<SyncState>, ApiError> {
    ensure_owner(&state, user, trading_account_id).await?;
    Ok(Json(state.store.load_sync_state(trading_account_id).await?))
}
