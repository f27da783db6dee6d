//! Deterministic client for tests
//!
//! Returns per-identity scripted verdicts and records every call it
//! receives, so lifecycle tests can drive promotion, revocation and
//! bridge failures without a server.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{AcctEvent, AcctSnapshot, AuthGrant, AuthVerdict, RadiusClient};
use crate::error::BridgeError;

/// Scripted response for one identity
#[derive(Debug, Clone)]
pub enum Script {
    /// Accept with the given grant
    Accept(AuthGrant),
    /// Reject
    Reject,
    /// Fail with a recoverable bridge error
    Unavailable,
}

/// One accounting call the client observed
#[derive(Debug, Clone)]
pub struct AcctCall {
    pub event: AcctEvent,
    pub snapshot: AcctSnapshot,
}

/// Test double returning scripted verdicts per identity
#[derive(Debug, Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, Script>>,
    auth_calls: Mutex<Vec<String>>,
    acct_calls: Mutex<Vec<AcctCall>>,
}

impl ScriptedClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the verdict for an identity; unscripted identities reject
    pub fn script(&self, identity: &str, script: Script) {
        self.scripts.lock().insert(identity.to_string(), script);
    }

    /// Identities authenticated so far, in call order
    #[must_use]
    pub fn auth_calls(&self) -> Vec<String> {
        self.auth_calls.lock().clone()
    }

    /// Accounting calls observed so far, in call order
    #[must_use]
    pub fn acct_calls(&self) -> Vec<AcctCall> {
        self.acct_calls.lock().clone()
    }

    /// Accounting calls of one event type
    #[must_use]
    pub fn acct_calls_of(&self, event: AcctEvent) -> Vec<AcctCall> {
        self.acct_calls
            .lock()
            .iter()
            .filter(|c| c.event == event)
            .cloned()
            .collect()
    }
}

impl RadiusClient for ScriptedClient {
    fn authenticate(&self, identity: &str) -> Result<AuthVerdict, BridgeError> {
        self.auth_calls.lock().push(identity.to_string());
        match self.scripts.lock().get(identity) {
            Some(Script::Accept(grant)) => Ok(AuthVerdict::Accept(grant.clone())),
            Some(Script::Unavailable) => {
                Err(BridgeError::Unreachable("scripted outage".into()))
            }
            Some(Script::Reject) | None => Ok(AuthVerdict::Reject),
        }
    }

    fn account(&self, event: AcctEvent, snapshot: &AcctSnapshot) -> Result<(), BridgeError> {
        self.acct_calls.lock().push(AcctCall {
            event,
            snapshot: snapshot.clone(),
        });
        Ok(())
    }
}
