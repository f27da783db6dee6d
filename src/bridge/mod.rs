//! Authentication and accounting bridge
//!
//! The gateway talks to its AAA backend through the [`RadiusClient`]
//! trait. Calls are synchronous and issued only from overlord threads;
//! the packet path never blocks on the bridge. A failure leaves the
//! session in its prior state and the operation is retried on the next
//! sweep, with the session timeout as the backstop.

mod scripted;
mod static_users;

use std::sync::Arc;

pub use scripted::{AcctCall, Script, ScriptedClient};
pub use static_users::StaticFileClient;

use serde::{Deserialize, Serialize};

use crate::config::{RadiusConfig, RadiusMode};
use crate::error::BridgeError;
use crate::packet::PerDirection;

/// What the backend granted an accepted session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthGrant {
    /// Subscriber identity the session is billed under
    pub user_id: String,
    /// Per-direction rate limit in bytes/second; 0 means unlimited
    pub limit: PerDirection<u64>,
}

/// Outcome of an authentication request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthVerdict {
    /// Access granted
    Accept(AuthGrant),
    /// Access denied; an initial attempt leaves the session
    /// unauthenticated, a re-authentication revokes it
    Reject,
}

/// Accounting record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcctEvent {
    /// Session promoted to authenticated
    Start,
    /// Periodic interim update
    Interim,
    /// Session torn down
    Stop,
}

/// Counters reported in an accounting record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcctSnapshot {
    /// Session identity (the client IP in dotted form)
    pub identity: String,
    /// Subscriber the session is billed under
    pub user_id: String,
    /// Forwarded bytes per direction
    pub bytes: PerDirection<u64>,
    /// Forwarded packets per direction
    pub packets: PerDirection<u64>,
    /// Session age in seconds
    pub session_time_secs: u64,
}

/// AAA backend interface
///
/// Implementations must be safe to call concurrently from multiple
/// overlord threads. A wire-protocol RADIUS client implements this trait
/// out of tree; in-tree backends cover static tables and open access.
pub trait RadiusClient: Send + Sync {
    /// Authenticate an identity
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` when the backend cannot produce a verdict;
    /// the session stays in its prior state and the call is retried.
    fn authenticate(&self, identity: &str) -> Result<AuthVerdict, BridgeError>;

    /// Deliver an accounting record
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` when delivery fails; interim records are
    /// retried on the next sweep, stop records are best-effort.
    fn account(&self, event: AcctEvent, snapshot: &AcctSnapshot) -> Result<(), BridgeError>;
}

/// Backend that accepts every identity with no rate limit
///
/// The identity doubles as the user id, so each IP becomes its own
/// subscriber. Used for open deployments and as the default.
#[derive(Debug, Default)]
pub struct PermissiveClient;

impl RadiusClient for PermissiveClient {
    fn authenticate(&self, identity: &str) -> Result<AuthVerdict, BridgeError> {
        Ok(AuthVerdict::Accept(AuthGrant {
            user_id: identity.to_string(),
            limit: PerDirection::new(0, 0),
        }))
    }

    fn account(&self, _event: AcctEvent, _snapshot: &AcctSnapshot) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Build the configured client backend
///
/// # Errors
///
/// Returns `BridgeError::ClientConfig` if the static user table is
/// missing or malformed.
pub fn build_client(config: &RadiusConfig) -> Result<Arc<dyn RadiusClient>, BridgeError> {
    match config.mode {
        RadiusMode::Permissive => Ok(Arc::new(PermissiveClient)),
        RadiusMode::Static => {
            let path = config.config_file.as_ref().ok_or_else(|| {
                BridgeError::ClientConfig("static mode requires a user table path".into())
            })?;
            Ok(Arc::new(StaticFileClient::load(path)?))
        }
    }
}
