//! Gateway frame layout.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use guilder_core::{ClientResult, User};

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// A dispatch carrying a resume cursor.
    Missable = 0,
    Welcome = 1,
    Resumed = 2,
    /// The resume cursor was rejected.
    InvalidCursor = 8,
    InternalError = 9,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(op: u8) -> Result<Self, Self::Error> {
        match op {
            0 => Ok(Self::Missable),
            1 => Ok(Self::Welcome),
            2 => Ok(Self::Resumed),
            8 => Ok(Self::InvalidCursor),
            9 => Ok(Self::InternalError),
            other => Err(other),
        }
    }
}

/// A frame as received from the gateway: `{op, d, s, t}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    /// Resume cursor.
    #[serde(default)]
    pub s: Option<String>,
    /// Wire event name of a dispatch.
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn parse(text: &str) -> ClientResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The opcode, or `None` when unknown.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.op).ok()
    }

    /// The `message` field of error payloads.
    pub fn error_message(&self) -> &str {
        self.d
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Payload of [`Opcode::Welcome`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub last_message_id: Option<String>,
    pub user: User,
}

impl Welcome {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Returns `true` when a close reason is the JSON of an invalid-cursor frame.
pub fn close_invalidates_cursor(reason: &str) -> bool {
    serde_json::from_str::<Value>(reason)
        .ok()
        .and_then(|v| v.get("op").and_then(Value::as_u64))
        == Some(Opcode::InvalidCursor as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dispatch() {
        let frame = GatewayFrame::parse(
            r#"{"op":0,"t":"ChatMessageCreated","s":"cursor-1","d":{"serverId":"s1"}}"#,
        )
        .unwrap();
        assert_eq!(frame.opcode(), Some(Opcode::Missable));
        assert_eq!(frame.t.as_deref(), Some("ChatMessageCreated"));
        assert_eq!(frame.s.as_deref(), Some("cursor-1"));
        assert_eq!(frame.d["serverId"], "s1");
    }

    #[test]
    fn test_unknown_opcode() {
        let frame = GatewayFrame::parse(r#"{"op":42}"#).unwrap();
        assert_eq!(frame.opcode(), None);
        assert!(frame.d.is_null());
    }

    #[test]
    fn test_welcome() {
        let frame = GatewayFrame::parse(
            r#"{"op":1,"d":{"heartbeatIntervalMs":22500,"lastMessageId":"abc","user":{"id":"bot","name":"Bot","type":"bot"}}}"#,
        )
        .unwrap();
        let welcome: Welcome = serde_json::from_value(frame.d).unwrap();
        assert_eq!(welcome.heartbeat_interval(), Duration::from_millis(22500));
        assert_eq!(welcome.last_message_id.as_deref(), Some("abc"));
        assert!(welcome.user.is_bot());
    }

    #[test]
    fn test_close_reason_cursor() {
        assert!(close_invalidates_cursor(r#"{"op":8,"d":{"message":"bad cursor"}}"#));
        assert!(!close_invalidates_cursor(r#"{"op":9}"#));
        assert!(!close_invalidates_cursor("going away"));
    }

    #[test]
    fn test_error_message() {
        let frame = GatewayFrame::parse(r#"{"op":9,"d":{"message":"boom"}}"#).unwrap();
        assert_eq!(frame.opcode(), Some(Opcode::InternalError));
        assert_eq!(frame.error_message(), "boom");
    }
}
