//! Remote control wire protocol
//!
//! Newline-delimited JSON over TCP. Each line is one command object
//! tagged by `command`; each reply is one object tagged by `status`.

use serde::{Deserialize, Serialize};

use crate::rules::RuleSet;

/// Commands accepted on a control connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Liveness probe
    Ping,
    /// Global counter snapshot
    Status,
    /// Per-ring counter snapshots
    GetStats,
    /// Replace the active rule set
    ApplyRules { rules: RuleSet },
    /// Request a cooperative shutdown
    Shutdown,
}

/// Replies sent on a control connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
    },
}

impl ControlResponse {
    /// Success with no payload
    #[must_use]
    pub const fn ok() -> Self {
        Self::Ok { data: None }
    }

    /// Success carrying a serialized payload
    #[must_use]
    pub fn with_data(data: serde_json::Value) -> Self {
        Self::Ok { data: Some(data) }
    }

    /// Failure with a message
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
