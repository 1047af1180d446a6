use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tradetrack_core::*;
use zeroize::Zeroizing;

use crate::protocol::*;

/// Configuration for reaching the MT5-side script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaTraderConfig {
    /// Host address (e.g. "127.0.0.1").
    pub host: String,
    /// Port the MT5 script is listening on.
    pub port: u16,
    /// Path to `terminal64.exe`, forwarded to terminal initialisation.
    pub mt5_path: Option<String>,
    /// Terminal initialisation timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for MetaTraderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            mt5_path: None,
            timeout_ms: 30_000,
        }
    }
}

/// MetaTrader 5 terminal adapter.
///
/// Talks to a script running next to the MT5 terminal over TCP using
/// length-prefixed JSON messages.
pub struct MetaTraderTerminal {
    config: MetaTraderConfig,
    stream: Option<TcpStream>,
}

impl MetaTraderTerminal {
    pub fn new(config: MetaTraderConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Send a message to the terminal script.
    async fn send(&mut self, msg: &OutboundMessage<'_>) -> Result<(), TerminalError> {
        let stream = self.stream.as_mut().ok_or(TerminalError::NotConnected)?;

        // Login frames carry the investor password.
        let json = Zeroizing::new(
            serde_json::to_vec(msg)
                .map_err(|e| TerminalError::Protocol(format!("Serialization error: {}", e)))?,
        );
        let framed = Zeroizing::new(frame_message(&json));

        stream
            .write_all(&framed)
            .await
            .map_err(|e| TerminalError::Unavailable(format!("Write error: {}", e)))
    }

    /// Read a single framed message from the terminal script.
    async fn recv(&mut self) -> Result<InboundMessage, TerminalError> {
        let stream = self.stream.as_mut().ok_or(TerminalError::NotConnected)?;

        let body = read_frame(stream, MAX_FRAME_LEN)
            .await
            .map_err(|e| TerminalError::Unavailable(format!("Read error: {}", e)))?;

        serde_json::from_slice(&body)
            .map_err(|e| TerminalError::Protocol(format!("Deserialization error: {}", e)))
    }

    async fn login(&mut self, credentials: &TerminalCredentials) -> Result<(), TerminalError> {
        let path = self.config.mt5_path.clone();
        let msg = OutboundMessage::Login {
            login: credentials.login,
            password: credentials.password.as_str(),
            server: &credentials.server,
            path: path.as_deref(),
            timeout_ms: self.config.timeout_ms,
        };
        self.send(&msg).await?;

        match self.recv().await? {
            InboundMessage::LoginResult { success: true, .. } => Ok(()),
            InboundMessage::LoginResult {
                stage,
                code,
                message,
                ..
            } => {
                let code = code.unwrap_or_default();
                let message = message.unwrap_or_else(|| "unknown error".to_string());
                Err(match stage {
                    Some(LoginStage::Initialize) => TerminalError::InitFailed { code, message },
                    _ => TerminalError::LoginFailed { code, message },
                })
            }
            InboundMessage::Error { message, code } => Err(TerminalError::LoginFailed {
                code: code.unwrap_or_default(),
                message,
            }),
            other => Err(unexpected("login_result", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &InboundMessage) -> TerminalError {
    TerminalError::Protocol(format!("expected {}, got {:?}", expected, got))
}

#[async_trait]
impl Terminal for MetaTraderTerminal {
    async fn connect(&mut self, credentials: &TerminalCredentials) -> Result<(), TerminalError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to MetaTrader at {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TerminalError::Unavailable(format!("TCP connect to {} failed: {}", addr, e)))?;
        self.stream = Some(stream);

        // Wait for Connected message
        match self.recv().await? {
            InboundMessage::Connected { version } => {
                debug!("MetaTrader script v{}", version);
            }
            InboundMessage::Error { message, code } => {
                return Err(TerminalError::InitFailed {
                    code: code.unwrap_or_default(),
                    message,
                });
            }
            other => return Err(unexpected("connected", &other)),
        }

        self.login(credentials).await?;
        info!(login = credentials.login, "Logged in to MetaTrader");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.stream.is_none() {
            return;
        }
        if let Err(e) = self.send(&OutboundMessage::Logout).await {
            warn!(error = %e, "Logout message not delivered");
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        info!("Disconnected from MetaTrader");
    }

    async fn account_info(&mut self) -> Result<Option<AccountInfo>, TerminalError> {
        self.send(&OutboundMessage::AccountRequest).await?;
        match self.recv().await? {
            InboundMessage::AccountInfo { account } => Ok(account),
            InboundMessage::Error { message, .. } => Err(TerminalError::Protocol(message)),
            other => Err(unexpected("account_info", &other)),
        }
    }

    async fn get_deals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, TerminalError> {
        self.send(&OutboundMessage::DealsRequest {
            from: from.timestamp(),
            to: to.timestamp(),
        })
        .await?;
        match self.recv().await? {
            InboundMessage::Deals { deals } => Ok(deals),
            InboundMessage::Error { message, .. } => Err(TerminalError::Protocol(message)),
            other => Err(unexpected("deals", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn write(stream: &mut TcpStream, value: Value) {
        let body = serde_json::to_vec(&value).unwrap();
        stream.write_all(&frame_message(&body)).await.unwrap();
    }

    async fn read(stream: &mut TcpStream) -> Value {
        let body = read_frame(stream, MAX_FRAME_LEN).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn terminal_for(listener: &TcpListener) -> MetaTraderTerminal {
        let port = listener.local_addr().unwrap().port();
        MetaTraderTerminal::new(MetaTraderConfig {
            port,
            mt5_path: Some("C:\\MT5\\terminal64.exe".to_string()),
            ..Default::default()
        })
    }

    fn creds() -> TerminalCredentials {
        TerminalCredentials::new(501, "Demo", Zeroizing::new("pw".to_string()))
    }

    #[tokio::test]
    async fn test_login_fetch_and_logout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut terminal = terminal_for(&listener).await;

        let script = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            write(&mut s, json!({"type": "connected", "version": "1.2"})).await;

            let login = read(&mut s).await;
            assert_eq!(login["type"], "login");
            assert_eq!(login["path"], "C:\\MT5\\terminal64.exe");
            assert_eq!(login["timeout_ms"], 30000);
            write(&mut s, json!({"type": "login_result", "success": true})).await;

            let req = read(&mut s).await;
            assert_eq!(req, json!({"type": "deals_request", "from": 100, "to": 200}));
            write(&mut s, json!({"type": "deals", "deals": [{"ticket": 7, "type": 0}]})).await;

            assert_eq!(read(&mut s).await["type"], "logout");
        });

        terminal.connect(&creds()).await.unwrap();
        let deals = terminal
            .get_deals(
                DateTime::from_timestamp(100, 0).unwrap(),
                DateTime::from_timestamp(200, 0).unwrap(),
            )
            .await
            .unwrap();
        terminal.disconnect().await;
        script.await.unwrap();

        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0]["ticket"], json!(7));
    }

    #[tokio::test]
    async fn test_login_failure_keeps_terminal_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut terminal = terminal_for(&listener).await;

        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            write(&mut s, json!({"type": "connected", "version": "1.2"})).await;
            read(&mut s).await;
            write(
                &mut s,
                json!({"type": "login_result", "success": false, "stage": "login",
                       "code": -6, "message": "Terminal: Authorization failed"}),
            )
            .await;
        });

        let err = terminal.connect(&creds()).await.unwrap_err();
        assert!(err.is_authorization_failure());
        assert_eq!(err.diagnostic_code(), Some(-6));
    }

    #[tokio::test]
    async fn test_initialize_failure_maps_to_init_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut terminal = terminal_for(&listener).await;

        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            write(&mut s, json!({"type": "connected", "version": "1.2"})).await;
            read(&mut s).await;
            write(
                &mut s,
                json!({"type": "login_result", "success": false, "stage": "initialize",
                       "code": -10005, "message": "IPC timeout"}),
            )
            .await;
        });

        let err = terminal.connect(&creds()).await.unwrap_err();
        assert!(matches!(err, TerminalError::InitFailed { code: -10005, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_script_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut terminal = terminal_for(&listener).await;
        drop(listener);

        let err = terminal.connect(&creds()).await.unwrap_err();
        assert!(matches!(err, TerminalError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_calls_without_session_fail() {
        let mut terminal = MetaTraderTerminal::new(MetaTraderConfig::default());
        assert!(matches!(
            terminal.account_info().await,
            Err(TerminalError::NotConnected)
        ));
    }
}
