//! Poller identity
//!
//! Every poll and heartbeat carries an identity string that shows up in the
//! execution history. It is a small JSON object so that operators can tell
//! which host and process picked up a task.

use serde::{Deserialize, Serialize};

use crate::limits::{truncate_owned, MAX_IDENTITY_LEN};

/// Name, host and process of a polling actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub pid: u32,
    #[serde(skip)]
    override_identity: Option<String>,
}

impl NamedIdentity {
    /// Identity for the current process
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            pid: std::process::id(),
            override_identity: None,
        }
    }

    /// Replace the generated identity string with a fixed one
    pub fn with_override(mut self, identity: impl Into<String>) -> Self {
        self.override_identity = Some(identity.into());
        self
    }

    /// Identity string sent to the service, at most 256 bytes
    pub fn identity(&self) -> String {
        let raw = match &self.override_identity {
            Some(identity) => identity.clone(),
            None => serde_json::to_string(self).unwrap_or_else(|_| self.name.clone()),
        };
        truncate_owned(raw, MAX_IDENTITY_LEN)
    }
}

impl std::fmt::Display for NamedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identity())
    }
}
