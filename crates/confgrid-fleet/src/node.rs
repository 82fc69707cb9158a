//! Node records.

use serde::Serialize;

use confgrid_core::ConfigVersion;

/// What the controller knows about one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Network address (IP) the node contacted us from.
    pub address: String,
    /// Unix seconds of the last node-initiated contact.
    pub last_seen_at: u64,
    /// Version the node last told us it runs, or last downloaded.
    pub last_confirmed_version: ConfigVersion,
    /// Version reported by the most recent successful poll.
    pub last_poll_version: Option<ConfigVersion>,
    /// Version of the most recent artifact download.
    pub last_pulled_version: Option<ConfigVersion>,
    /// Unix seconds of the most recent artifact download.
    pub last_confirmed_at: Option<u64>,
    /// Most recent probe failure, cleared by the next success.
    pub last_error: Option<String>,
    pub registered_at: u64,
}

impl Node {
    pub(crate) fn new(address: &str, now: u64) -> Self {
        Self {
            address: address.to_string(),
            last_seen_at: now,
            last_confirmed_version: 0,
            last_poll_version: None,
            last_pulled_version: None,
            last_confirmed_at: None,
            last_error: None,
            registered_at: now,
        }
    }

    /// Seconds since the node last contacted us.
    pub fn silent_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen_at)
    }

    /// Has the node confirmed `target` (or anything newer)?
    pub fn has_confirmed(&self, target: ConfigVersion) -> bool {
        self.last_confirmed_version >= target
    }

    /// Has the node downloaded the artifact for `target` (or newer)?
    pub fn has_received(&self, target: ConfigVersion) -> bool {
        self.last_pulled_version.is_some_and(|v| v >= target)
    }

    /// Does any signal say the node applied `target`?
    pub fn has_updated(&self, target: ConfigVersion) -> bool {
        self.has_confirmed(target) || self.last_poll_version.is_some_and(|v| v >= target)
    }
}

/// Outcome of applying one poll result, for logging by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollChange {
    pub address: String,
    pub previous_version: Option<ConfigVersion>,
    pub version: Option<ConfigVersion>,
    pub previous_error: Option<String>,
    pub error: Option<String>,
}

impl PollChange {
    /// The poll succeeded and reported a different version than before.
    pub fn version_changed(&self) -> bool {
        self.error.is_none() && self.version != self.previous_version
    }

    /// The poll failed with an error not seen on the previous poll.
    pub fn new_error(&self) -> bool {
        self.error.is_some() && self.error != self.previous_error
    }
}
