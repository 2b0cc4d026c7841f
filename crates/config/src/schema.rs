//! Config schema types (gateway transport, command execution).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub exec: ExecConfig,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind. Defaults to loopback; expose deliberately.
    pub bind: String,

    /// Listening port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 9999,
        }
    }
}

/// Command execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Fixed working directory for every spawned command. Defaults to
    /// the gateway's working directory at startup.
    pub project_root: Option<PathBuf>,

    /// Shell interpreter for `shell` commands.
    pub shell: String,

    /// Coding-agent CLI binary for `agent` commands.
    pub agent: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            shell: "sh".to_string(),
            agent: "claude".to_string(),
        }
    }
}
