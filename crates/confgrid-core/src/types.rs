//! Domain types for configuration generation.
//!
//! A `ProjectSet` is rebuilt from the metadata store on every rollout
//! and rendered into the artifact nodes download. Ordered maps keep the
//! rendered output byte-for-byte stable for identical metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Monotonic configuration generation counter.
pub type ConfigVersion = u64;

/// Unique identifier for a project (tenant) in the metadata store.
pub type ProjectId = String;

/// All projects, keyed by project id.
pub type ProjectSet = BTreeMap<ProjectId, ProjectMetadata>;

// ── Domains ────────────────────────────────────────────────────────

/// TLS termination mode for a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    /// Plain HTTP only.
    #[default]
    None,
    /// Certificate issued automatically (ACME).
    Automatic,
    /// Certificate uploaded by the operator.
    Manual,
}

impl SslMode {
    /// Parse the value stored under `domains/<host>/ssl`.
    ///
    /// Anything other than `auto` or `manual` means no TLS.
    pub fn from_kv(value: &str) -> Self {
        match value.trim() {
            "auto" => Self::Automatic,
            "manual" => Self::Manual,
            _ => Self::None,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::None
    }
}

/// Per-domain routing policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Redirect plain HTTP to HTTPS.
    pub redirect: bool,
    pub ssl: SslMode,
}

impl DomainPolicy {
    /// Enforce the policy invariant: any TLS mode forces the redirect.
    pub fn normalize(&mut self) {
        if self.ssl.is_enabled() {
            self.redirect = true;
        }
    }
}

/// Is `host` usable as an nginx `server_name`?
///
/// Accepts dot-separated DNS labels of ASCII letters, digits and inner
/// hyphens, with an optional leading `*.` wildcard label.
pub fn is_valid_hostname(host: &str) -> bool {
    let name = host.strip_prefix("*.").unwrap_or(host);
    if name.is_empty() || host.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

// ── Projects ───────────────────────────────────────────────────────

/// Structured metadata for one project, as read from the metadata store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Hostname → policy. Keys are literal hostnames, one entry each.
    pub domains: BTreeMap<String, DomainPolicy>,
    pub storage: String,
    pub version: String,
    pub cache_url: String,
    pub sessions_url: String,
    pub db_master_url: String,
    pub db_slave_url: String,
    pub log_url: String,
    pub core_path: String,
    pub dev_mode: String,
    pub frontend_path: String,
    pub root_path: String,
}

impl ProjectMetadata {
    /// Get or insert the policy entry for a domain.
    pub fn domain_mut(&mut self, host: &str) -> &mut DomainPolicy {
        self.domains.entry(host.to_string()).or_default()
    }

    /// Normalize every domain policy.
    pub fn normalize(&mut self) {
        for policy in self.domains.values_mut() {
            policy.normalize();
        }
    }
}
