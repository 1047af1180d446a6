//! Loopback HTTP server the web app talks to: `POST /config` to connect and
//! `GET|POST /sync-request` to pull deals on demand.

use crate::config::{BridgeConfig, BridgeFiles, ConfigError};
use crate::i18n::Text;
use crate::sync::{run_cycle, Connector};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:8765";

pub struct BridgeState {
    pub files: BridgeFiles,
    pub connector: Arc<dyn Connector>,
    /// One sync cycle at a time; the terminal holds a single session.
    sync_gate: Mutex<()>,
    config_received: Notify,
}

impl BridgeState {
    pub fn new(files: BridgeFiles, connector: Arc<dyn Connector>) -> Self {
        Self {
            files,
            connector,
            sync_gate: Mutex::new(()),
            config_received: Notify::new(),
        }
    }

    /// Resolves once a config has been accepted by `POST /config`.
    pub async fn config_received(&self) {
        self.config_received.notified().await
    }
}

pub fn build_router(state: Arc<BridgeState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86_400));

    Router::new()
        .route("/", get(status))
        .route("/status", get(status))
        .route("/config", post(receive_config))
        .route("/sync-request", get(sync_request).post(sync_request))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: Arc<BridgeState>,
    bind_addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Bridge listening on {}", bind_addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn status(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let lang = state.files.language();
    let connected = state.files.has_config();
    Json(json!({
        "app": Text::AppTitle.get(lang),
        "description": Text::ApiDescription.get(lang),
        "endpoints": {
            "config": Text::ApiConfigEndpoint.get(lang),
            "sync": Text::ApiSyncEndpoint.get(lang),
        },
        "connected": connected,
        "status": if connected {
            Text::ApiStatusConnected.get(lang)
        } else {
            Text::ApiStatusNotConnected.get(lang)
        },
    }))
}

async fn receive_config(State(state): State<Arc<BridgeState>>, body: Bytes) -> Response {
    if body.is_empty() {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "Empty body" }));
    }
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return reply(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
    };
    let config = match BridgeConfig::from_value(&value) {
        Ok(c) => c,
        Err(e) => return reply(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
    };
    if let Err(e) = state.files.save_config(&config) {
        error!(error = %e, "Could not save bridge config");
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": e.to_string() }),
        );
    }

    let lang = state.files.language();
    info!("{}", Text::LogConfigFromBrowser.get(lang));
    info!(
        login = config.mt5_login,
        trading_account_id = %config.trading_account_id,
        "{}",
        Text::LogConfigSaved.get(lang)
    );
    state.config_received.notify_one();

    let connector = state.connector.clone();
    tokio::spawn(async move {
        let notified = match connector.backend(&config) {
            Ok(backend) => backend.bridge_connected().await,
            Err(e) => Err(e),
        };
        match notified {
            Ok(_) => info!("{}", Text::LogServerNotified.get(lang)),
            Err(e) => warn!(error = %e, "{}", Text::LogServerNotifyFailed.get(lang)),
        }
    });

    reply(
        StatusCode::OK,
        json!({ "ok": true, "message": "Config saved. Connecting..." }),
    )
}

async fn sync_request(State(state): State<Arc<BridgeState>>) -> Response {
    // Queued callers wait here and get their own cycle's result.
    let _gate = state.sync_gate.lock().await;

    let config = match state.files.load_config() {
        Ok(c) => c,
        Err(ConfigError::NotFound(_)) => {
            return reply(
                StatusCode::BAD_REQUEST,
                json!({ "error": "No config. Connect from browser first." }),
            )
        }
        Err(e) => {
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }),
            )
        }
    };

    let lang = state.files.language();
    info!("{}", Text::LogSyncRequested.get(lang));
    info!("{}", Text::StatusSyncing.get(lang));

    let backend = match state.connector.backend(&config) {
        Ok(b) => b,
        Err(e) => {
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "ok": false, "error": e.to_string() }),
            )
        }
    };
    let sessions = state.connector.sessions(&config);

    match run_cycle(&sessions, backend.as_ref(), &state.files, &config, Utc::now()).await {
        Ok(outcome) => {
            if outcome.deals > 0 {
                info!("{}", Text::LogDealsSent.get(lang));
            } else {
                info!("{} {}", Text::LogSyncDone.get(lang), outcome.message);
            }
            info!("{}", Text::StatusConnected.get(lang));
            reply(
                StatusCode::OK,
                json!({
                    "ok": true,
                    "message": outcome.message,
                    "synced": outcome.synced,
                    "deals": outcome.deals,
                }),
            )
        }
        Err(e) => {
            let message = e.user_message(lang);
            error!("{} {}", Text::LogError.get(lang), message);
            warn!("{}", Text::StatusMt5Error.get(lang));
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "ok": false, "error": message }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{posted_config, scratch_dir};
    use crate::i18n::Language;
    use crate::sync::tests::{add_closed_position, MockBackend, TestConnector};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use tradetrack_core::TerminalError;
    use tradetrack_terminals_common::SimulatedHandle;

    fn bridge() -> (Router, Arc<BridgeState>, Arc<MockBackend>, SimulatedHandle) {
        let (connector, handle) = TestConnector::new();
        let backend = connector.backend.clone();
        let state = Arc::new(BridgeState::new(scratch_dir(), Arc::new(connector)));
        (build_router(state.clone()), state, backend, handle)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_status_reports_missing_config() {
        let (app, state, _, _) = bridge();
        state.files.save_language(Language::En).unwrap();

        let (status, body) = call(&app, "GET", "/status", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app"], "TradeTrack Sync");
        assert_eq!(body["connected"], false);
        assert_eq!(body["status"], "Not connected — send config from browser");

        std::fs::remove_dir_all(state.files.dir()).unwrap();
    }

    #[tokio::test]
    async fn test_config_validation_errors() {
        let (app, _, _, _) = bridge();
        let (status, body) = call(&app, "POST", "/config", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Empty body");

        let body = Body::from(r#"{"mt5_login": 1}"#);
        let (status, body) = call(&app, "POST", "/config", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Missing: api_base_url"));
    }

    #[tokio::test]
    async fn test_config_is_saved_and_backend_notified() {
        let (app, state, backend, _) = bridge();
        let (status, body) = call(
            &app,
            "POST",
            "/config",
            Body::from(posted_config().to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(state.files.has_config());

        // Setup mode waits on this.
        tokio::time::timeout(Duration::from_secs(1), state.config_received())
            .await
            .unwrap();

        for _ in 0..50 {
            if *backend.connected.lock().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*backend.connected.lock().unwrap(), 1);

        let (_, body) = call(&app, "GET", "/", Body::empty()).await;
        assert_eq!(body["connected"], true);

        std::fs::remove_dir_all(state.files.dir()).unwrap();
    }

    #[tokio::test]
    async fn test_sync_request_without_config() {
        let (app, _, _, _) = bridge();
        let (status, body) = call(&app, "POST", "/sync-request", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No config. Connect from browser first.");
    }

    #[tokio::test]
    async fn test_sync_request_pushes_deals() {
        let (app, state, backend, handle) = bridge();
        state.files.save_language(Language::En).unwrap();
        call(&app, "POST", "/config", Body::from(posted_config().to_string())).await;
        add_closed_position(&handle, 9, Utc::now() - chrono::Duration::hours(3));

        let (status, body) = call(&app, "GET", "/sync-request", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["deals"], 2);
        assert_eq!(body["message"], "Synced 2 deals.");
        assert_eq!(backend.pushes.lock().unwrap().len(), 1);

        let (_, body) = call(&app, "POST", "/sync-request", Body::empty()).await;
        assert_eq!(body["message"], "No new deals.");

        std::fs::remove_dir_all(state.files.dir()).unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_sync_requests_wait_their_turn() {
        let (app, state, backend, handle) = bridge();
        call(&app, "POST", "/config", Body::from(posted_config().to_string())).await;
        add_closed_position(&handle, 9, Utc::now() - chrono::Duration::hours(3));
        handle.set_delay(Duration::from_millis(30));

        let ((s1, b1), (s2, b2)) = tokio::join!(
            call(&app, "POST", "/sync-request", Body::empty()),
            call(&app, "GET", "/sync-request", Body::empty()),
        );

        assert_eq!((s1, s2), (StatusCode::OK, StatusCode::OK));
        assert_eq!(b1["ok"], true);
        assert_eq!(b2["ok"], true);
        let deals = b1["deals"].as_u64().unwrap() + b2["deals"].as_u64().unwrap();
        assert_eq!(deals, 2);
        assert_eq!(backend.pushes.lock().unwrap().len(), 2);
        assert_eq!(handle.connects(), handle.disconnects());

        std::fs::remove_dir_all(state.files.dir()).unwrap();
    }

    #[tokio::test]
    async fn test_sync_request_reports_terminal_failure() {
        let (app, state, _, handle) = bridge();
        call(&app, "POST", "/config", Body::from(posted_config().to_string())).await;
        handle.fail_connect(Some(TerminalError::Unavailable(
            "connection refused".to_string(),
        )));

        let (status, body) = call(&app, "POST", "/sync-request", Body::empty()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Помилка підключення MT5:"));

        std::fs::remove_dir_all(state.files.dir()).unwrap();
    }
}
