//! Static user table backend
//!
//! Authenticates against a JSON user table loaded at startup. Suited to
//! fixed subscriber lists and lab deployments where running a RADIUS
//! server is overkill.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::{AcctEvent, AcctSnapshot, AuthGrant, AuthVerdict, RadiusClient};
use crate::error::BridgeError;
use crate::packet::PerDirection;

#[derive(Debug, Deserialize)]
struct UserTable {
    users: HashMap<String, UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    user_id: String,
    /// Bytes/second per direction; 0 or absent means unlimited
    #[serde(default)]
    limit: PerDirection<u64>,
}

/// Client backed by a JSON user table keyed by identity
#[derive(Debug)]
pub struct StaticFileClient {
    users: HashMap<String, AuthGrant>,
}

impl StaticFileClient {
    /// Load the user table from `path`
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ClientConfig` if the file cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::ClientConfig(format!("cannot read user table {}: {e}", path.display()))
        })?;
        let client = Self::from_json(&contents)?;
        info!(
            path = %path.display(),
            users = client.users.len(),
            "Static user table loaded"
        );
        Ok(client)
    }

    /// Parse a user table from a JSON string
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ClientConfig` on malformed JSON.
    pub fn from_json(contents: &str) -> Result<Self, BridgeError> {
        let table: UserTable = serde_json::from_str(contents)
            .map_err(|e| BridgeError::ClientConfig(format!("malformed user table: {e}")))?;

        let users = table
            .users
            .into_iter()
            .map(|(identity, entry)| {
                (
                    identity,
                    AuthGrant {
                        user_id: entry.user_id,
                        limit: entry.limit,
                    },
                )
            })
            .collect();

        Ok(Self { users })
    }
}

impl RadiusClient for StaticFileClient {
    fn authenticate(&self, identity: &str) -> Result<AuthVerdict, BridgeError> {
        match self.users.get(identity) {
            Some(grant) => Ok(AuthVerdict::Accept(grant.clone())),
            None => Ok(AuthVerdict::Reject),
        }
    }

    fn account(&self, event: AcctEvent, snapshot: &AcctSnapshot) -> Result<(), BridgeError> {
        // No server to deliver to; log for audit trails
        debug!(
            event = ?event,
            identity = %snapshot.identity,
            user_id = %snapshot.user_id,
            bytes_in = snapshot.bytes.ingress,
            bytes_out = snapshot.bytes.egress,
            "Accounting record"
        );
        Ok(())
    }
}
