//! Wire protocol for the coldwire gateway.
//!
//! Every frame is a single JSON object. Inbound frames carry a `type`
//! discriminator (`command`, `claude_command`, `ping`); outbound frames
//! carry `type` plus an ISO-8601 UTC `timestamp` and variant-specific
//! fields. Decoding never panics: malformed input is returned as a
//! [`DecodeError`] value so the session can report it over the wire.

use std::fmt;

use {
    chrono::{SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Protocol revision announced by `/health`.
pub const PROTOCOL_VERSION: u16 = 2;

/// Inbound message types the gateway understands. `claude_command` is a
/// legacy alias of `command` kept for older clients.
pub const SUPPORTED_TYPES: &[&str] = &["command", "claude_command", "ping"];

// ── Command kind ─────────────────────────────────────────────────────────────

/// How a command is executed: through the system shell, or as a
/// natural-language instruction for the coding-agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Shell,
    Agent,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Shell => "shell",
            CommandKind::Agent => "agent",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Options attached to a `command` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandOptions {
    /// Bypass classification entirely: `"shell"` or `"agent"`.
    #[serde(rename = "forceType")]
    pub force_type: Option<String>,
}

/// A decoded inbound frame.
///
/// `command` is kept as a raw [`Value`] so that a missing or wrong-typed
/// field is a validation error at the session layer, not a decode error.
#[derive(Debug)]
pub enum Inbound {
    Command {
        command: Option<Value>,
        options: CommandOptions,
    },
    Ping {
        data: Option<Value>,
    },
    /// Any `type` outside [`SUPPORTED_TYPES`]; the session reports it and
    /// keeps the connection open.
    Unknown {
        kind: String,
    },
}

/// The raw input could not be parsed as a JSON object.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(String);

/// Decode one inbound frame.
pub fn decode(raw: &str) -> Result<Inbound, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match kind {
        "command" | "claude_command" => {
            let options = value
                .get("options")
                .and_then(|o| serde_json::from_value(o.clone()).ok())
                .unwrap_or_default();
            Ok(Inbound::Command {
                command: value.get("command").cloned(),
                options,
            })
        },
        "ping" => Ok(Inbound::Ping {
            data: value.get("data").cloned(),
        }),
        other => Ok(Inbound::Unknown {
            kind: other.to_string(),
        }),
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// OS-level detail attached to spawn-failure errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    /// Raw OS error code (e.g. 2 for ENOENT), when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

/// An outbound frame body. [`encode`] merges in the generation timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    System {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command_type: Option<CommandKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_root: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        features: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Stdout {
        message: String,
        command_type: CommandKind,
    },
    #[serde(rename_all = "camelCase")]
    Stderr {
        message: String,
        command_type: CommandKind,
    },
    #[serde(rename_all = "camelCase")]
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
        command_type: CommandKind,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command_type: Option<CommandKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<ErrorDetails>,
        #[serde(skip_serializing_if = "Option::is_none")]
        supported_types: Option<Vec<String>>,
    },
    Pong {
        message: String,
        echo: Value,
    },
}

impl Outbound {
    /// Plain `system` message (no command context).
    pub fn system(message: impl Into<String>) -> Self {
        Outbound::System {
            message: message.into(),
            command_type: None,
            client_id: None,
            project_root: None,
            version: None,
            features: None,
        }
    }

    /// `system` message tied to a command about to run.
    pub fn system_for(kind: CommandKind, message: impl Into<String>) -> Self {
        Outbound::System {
            message: message.into(),
            command_type: Some(kind),
            client_id: None,
            project_root: None,
            version: None,
            features: None,
        }
    }

    /// The connection acknowledgment sent immediately after accept.
    pub fn hello(
        message: impl Into<String>,
        client_id: impl Into<String>,
        project_root: impl Into<String>,
        version: impl Into<String>,
        features: &[&str],
    ) -> Self {
        Outbound::System {
            message: message.into(),
            command_type: None,
            client_id: Some(client_id.into()),
            project_root: Some(project_root.into()),
            version: Some(version.into()),
            features: Some(features.iter().map(|f| f.to_string()).collect()),
        }
    }

    pub fn stdout(kind: CommandKind, chunk: impl Into<String>) -> Self {
        Outbound::Stdout {
            message: chunk.into(),
            command_type: kind,
        }
    }

    pub fn stderr(kind: CommandKind, chunk: impl Into<String>) -> Self {
        Outbound::Stderr {
            message: chunk.into(),
            command_type: kind,
        }
    }

    /// Terminal report for a process, whatever its exit code. A non-zero
    /// code is a normal outcome here, never an `error` frame.
    pub fn exit(kind: CommandKind, code: Option<i32>, signal: Option<i32>) -> Self {
        let message = match (code, signal) {
            (Some(0), _) => "Command completed successfully".to_string(),
            (Some(c), _) => format!("Command exited with code {c}"),
            (None, Some(sig)) => format!("Command terminated by signal {sig}"),
            (None, None) => "Command exited with unknown status".to_string(),
        };
        Outbound::Exit {
            code,
            signal,
            command_type: kind,
            message,
        }
    }

    /// Generic error (protocol or validation failure).
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error {
            message: message.into(),
            command_type: None,
            details: None,
            supported_types: None,
        }
    }

    /// Spawn-failure error carrying the originating kind and OS detail.
    pub fn command_error(kind: CommandKind, message: impl Into<String>, os_code: Option<i32>) -> Self {
        Outbound::Error {
            message: message.into(),
            command_type: Some(kind),
            details: Some(ErrorDetails { code: os_code }),
            supported_types: None,
        }
    }

    /// Error for an unrecognized inbound `type`, listing what is supported.
    pub fn unknown_type(kind: &str) -> Self {
        Outbound::Error {
            message: format!("Unknown message type: {kind}"),
            command_type: None,
            details: None,
            supported_types: Some(SUPPORTED_TYPES.iter().map(|t| t.to_string()).collect()),
        }
    }

    pub fn pong(echo: Value) -> Self {
        Outbound::Pong {
            message: "pong".to_string(),
            echo,
        }
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    #[serde(flatten)]
    body: &'a Outbound,
    timestamp: String,
}

/// Serialize an outbound frame, stamping the generation time
/// (millisecond-precision ISO-8601 UTC).
pub fn encode(body: &Outbound) -> String {
    let frame = Frame {
        body,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    serde_json::to_string(&frame).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","message":"frame encoding failed: {e}"}}"#)
    })
}
