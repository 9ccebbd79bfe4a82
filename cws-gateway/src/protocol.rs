//! JSON frames exchanged over `/terminal`.
//!
//! Every frame is `{"event": <name>, "data": {...}}`. Client frames are
//! parsed into [`ClientEvent`] and validated before anything is dispatched.

use cws_terminal::{SessionEvent, SessionEventKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_TERMINAL_ID_LEN: usize = 128;
pub const MAX_DIMENSION: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    TerminalConnect { terminal_id: String },
    #[serde(rename_all = "camelCase")]
    Input { terminal_id: String, data: String },
    #[serde(rename_all = "camelCase")]
    Resize {
        terminal_id: String,
        cols: u16,
        rows: u16,
    },
    #[serde(rename_all = "camelCase")]
    TerminalDisconnect { terminal_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    TerminalReady {
        id: String,
    },
    Output {
        id: String,
        data: String,
    },
    TerminalExit {
        id: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl From<SessionEvent> for ServerEvent {
    fn from(event: SessionEvent) -> Self {
        let id = event.session_id;
        match event.kind {
            SessionEventKind::Ready => Self::TerminalReady { id },
            SessionEventKind::Output(data) => Self::Output { id, data },
            SessionEventKind::Exited => Self::TerminalExit { id },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("terminalId must be 1-128 printable, non-whitespace characters")]
    InvalidTerminalId,

    #[error("cols and rows must be between 1 and 1000, got {cols}x{rows}")]
    InvalidDimensions { cols: u16, rows: u16 },
}

impl ClientEvent {
    pub fn terminal_id(&self) -> &str {
        match self {
            Self::TerminalConnect { terminal_id }
            | Self::Input { terminal_id, .. }
            | Self::Resize { terminal_id, .. }
            | Self::TerminalDisconnect { terminal_id } => terminal_id,
        }
    }

    fn validate(self) -> Result<Self, ProtocolError> {
        if !is_valid_terminal_id(self.terminal_id()) {
            return Err(ProtocolError::InvalidTerminalId);
        }
        if let Self::Resize { cols, rows, .. } = self {
            let in_range = |n: u16| (1..=MAX_DIMENSION).contains(&n);
            if !in_range(cols) || !in_range(rows) {
                return Err(ProtocolError::InvalidDimensions { cols, rows });
            }
        }
        Ok(self)
    }
}

fn is_valid_terminal_id(id: &str) -> bool {
    let len = id.chars().count();
    (1..=MAX_TERMINAL_ID_LEN).contains(&len)
        && id.chars().all(|c| !c.is_whitespace() && !c.is_control())
}

/// Decode and validate one text frame.
pub fn parse(text: &str) -> Result<ClientEvent, ProtocolError> {
    serde_json::from_str::<ClientEvent>(text)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?
        .validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_client_event() {
        assert_eq!(
            parse(r#"{"event":"terminal-connect","data":{"terminalId":"t1"}}"#),
            Ok(ClientEvent::TerminalConnect {
                terminal_id: "t1".into()
            })
        );
        assert_eq!(
            parse(r#"{"event":"input","data":{"terminalId":"t1","data":"ls\n"}}"#),
            Ok(ClientEvent::Input {
                terminal_id: "t1".into(),
                data: "ls\n".into()
            })
        );
        assert_eq!(
            parse(r#"{"event":"resize","data":{"terminalId":"t1","cols":120,"rows":40}}"#),
            Ok(ClientEvent::Resize {
                terminal_id: "t1".into(),
                cols: 120,
                rows: 40
            })
        );
        assert_eq!(
            parse(r#"{"event":"terminal-disconnect","data":{"terminalId":"t1"}}"#),
            Ok(ClientEvent::TerminalDisconnect {
                terminal_id: "t1".into()
            })
        );
    }

    #[test]
    fn rejects_unknown_events_and_bad_shapes() {
        for frame in [
            r#"{"event":"explode","data":{}}"#,
            r#"{"event":"input","data":{"terminalId":"t1"}}"#,
            r#"{"event":"resize","data":{"terminalId":"t1","cols":-1,"rows":10}}"#,
            "not json",
        ] {
            assert!(
                matches!(parse(frame), Err(ProtocolError::Malformed(_))),
                "{frame}"
            );
        }
    }

    #[test]
    fn validates_terminal_ids() {
        let longest = "t".repeat(MAX_TERMINAL_ID_LEN);
        let too_long = "t".repeat(MAX_TERMINAL_ID_LEN + 1);
        let frame = |id: &str| json!({"event": "terminal-connect", "data": {"terminalId": id}});

        assert!(parse(&frame(&longest).to_string()).is_ok());
        for bad in ["", "has space", "tab\there", too_long.as_str()] {
            assert_eq!(
                parse(&frame(bad).to_string()),
                Err(ProtocolError::InvalidTerminalId),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn validates_dimensions() {
        let frame = |cols: u16, rows: u16| {
            json!({"event": "resize", "data": {"terminalId": "t1", "cols": cols, "rows": rows}})
                .to_string()
        };
        assert!(parse(&frame(1, 1000)).is_ok());
        assert_eq!(
            parse(&frame(0, 24)),
            Err(ProtocolError::InvalidDimensions { cols: 0, rows: 24 })
        );
        assert_eq!(
            parse(&frame(80, 1001)),
            Err(ProtocolError::InvalidDimensions { cols: 80, rows: 1001 })
        );
    }

    #[test]
    fn server_events_use_the_wire_names() {
        let ready = ServerEvent::from(SessionEvent {
            session_id: "t1".into(),
            kind: SessionEventKind::Ready,
        });
        assert_eq!(
            serde_json::to_value(&ready).unwrap(),
            json!({"event": "terminal-ready", "data": {"id": "t1"}})
        );

        let exit = ServerEvent::TerminalExit { id: "t1".into() };
        assert_eq!(
            serde_json::to_value(&exit).unwrap(),
            json!({"event": "terminal-exit", "data": {"id": "t1"}})
        );

        let anonymous = ServerEvent::error(None, "bad frame");
        assert_eq!(
            serde_json::to_value(&anonymous).unwrap(),
            json!({"event": "error", "data": {"message": "bad frame"}})
        );
    }
}
