//! Error types for flowgate
//!
//! This module defines the error hierarchy for the gateway. All errors are
//! categorized by subsystem and carry a recoverability classification:
//! packet-path errors must never abort the process, while configuration
//! errors are fatal at startup only.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for flowgate
#[derive(Debug, Error)]
pub enum FlowGateError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ring transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session/client registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Authentication/accounting bridge errors
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Remote control errors
    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FlowGateError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Transport(e) => e.is_recoverable(),
            Self::Registry(e) => e.is_recoverable(),
            Self::Bridge(e) => e.is_recoverable(),
            Self::Control(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are fatal at startup; never recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Ring transport errors
///
/// A transport error on the packet path is logged, the packet is dropped,
/// and the ring continues.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer side of the ring is gone
    #[error("Ring closed")]
    Closed,

    /// Transmit queue is full; the packet is dropped
    #[error("Transmit queue full on ring {ring_id}")]
    TxQueueFull { ring_id: u16 },

    /// Backend-specific failure
    #[error("Ring backend error: {0}")]
    Backend(String),
}

impl TransportError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Closed => false,
            Self::TxQueueFull { .. } | Self::Backend(_) => true,
        }
    }
}

/// Session/client registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Entry table is at capacity; the calling packet is dropped
    #[error("Registry at capacity ({current}/{max})")]
    CapacityExhausted { current: usize, max: usize },
}

impl RegistryError {
    /// Registry exhaustion is transient: entries expire and free slots
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }
}

/// Authentication/accounting bridge errors
///
/// Bridge failures leave the session in its prior state; the operation is
/// retried on the next sweep cycle with `session_timeout` as the backstop.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// RADIUS server unreachable
    #[error("RADIUS server unreachable: {0}")]
    Unreachable(String),

    /// Request timed out
    #[error("RADIUS request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Malformed reply or protocol violation
    #[error("RADIUS protocol error: {0}")]
    Protocol(String),

    /// Client-side configuration problem (bad user table, missing secret)
    #[error("RADIUS client configuration error: {0}")]
    ClientConfig(String),

    /// I/O error talking to the server
    #[error("RADIUS I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl BridgeError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout { .. } => true,
            Self::Protocol(_) | Self::ClientConfig(_) => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Remote control errors
#[derive(Debug, Error)]
pub enum ControlError {
    /// Failed to bind the control listener
    #[error("Failed to bind control listener on {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Malformed command
    #[error("Control protocol error: {0}")]
    Protocol(String),

    /// A pushed rule set failed validation; the active set is untouched
    #[error("Invalid rule set: {0}")]
    InvalidRules(String),

    /// I/O error on a control connection
    #[error("Control I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ControlError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } => false,
            Self::Protocol(_) | Self::InvalidRules(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }
}

/// Type alias for Result with `FlowGateError`
pub type Result<T> = std::result::Result<T, FlowGateError>;
