use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tradetrack_core::{AccountInfo, DealRecord};

/// Largest frame accepted from the terminal script. A full month of deal
/// history is far below this.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

/// Messages sent from the Rust client TO the MT5-side script.
#[derive(Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage<'a> {
    /// Initialise the terminal and log in with investor credentials.
    #[serde(rename = "login")]
    Login {
        login: i64,
        password: &'a str,
        server: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<&'a str>,
        timeout_ms: u64,
    },
    /// Request the logged-in account summary.
    #[serde(rename = "account_request")]
    AccountRequest,
    /// Request deal history; bounds are epoch seconds.
    #[serde(rename = "deals_request")]
    DealsRequest { from: i64, to: i64 },
    /// Shut the terminal session down.
    #[serde(rename = "logout")]
    Logout,
}

/// Which step of a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStage {
    Initialize,
    Login,
}

/// Messages received FROM the MT5-side script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Sent once after the socket is accepted.
    #[serde(rename = "connected")]
    Connected { version: String },
    #[serde(rename = "login_result")]
    LoginResult {
        success: bool,
        #[serde(default)]
        stage: Option<LoginStage>,
        #[serde(default)]
        code: Option<i32>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "account_info")]
    AccountInfo { account: Option<AccountInfo> },
    /// Raw `history_deals_get` rows, one field map per deal.
    #[serde(rename = "deals")]
    Deals { deals: Vec<DealRecord> },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        code: Option<i32>,
    },
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

/// Read one length-prefixed frame body.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", len, max_len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_login_message_shape() {
        let msg = OutboundMessage::Login {
            login: 501,
            password: "pw",
            server: "Demo",
            path: None,
            timeout_ms: 30_000,
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "login", "login": 501, "password": "pw", "server": "Demo", "timeout_ms": 30000})
        );
    }

    #[test]
    fn test_login_result_defaults() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"login_result","success":true}"#).unwrap();
        assert!(matches!(
            msg,
            InboundMessage::LoginResult { success: true, code: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_round_trip_and_limit() {
        let framed = frame_message(br#"{"type":"logout"}"#);
        let mut reader = framed.as_slice();
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), br#"{"type":"logout"}"#);

        let mut reader = framed.as_slice();
        let err = read_frame(&mut reader, 4).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
