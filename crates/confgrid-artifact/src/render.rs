//! Project metadata → nginx config files.
//!
//! Each project becomes one `<project>.conf` file rendered from the
//! `vhost.conf` Askama template. The view types below carry pre-formatted
//! strings so the template stays a flat loop.

use std::fs;
use std::path::{Path, PathBuf};

use askama::Template;
use tracing::debug;

use confgrid_core::{DomainPolicy, ProjectMetadata, ProjectSet, SslMode, is_valid_hostname};

use crate::error::{ArtifactError, ArtifactResult};

/// Turns a `ProjectSet` into files under an output directory.
///
/// Implementations must be deterministic: identical input produces
/// identical files. Injected into the store so tests can count calls or
/// fail on purpose.
pub trait Renderer: Send + Sync {
    /// Write the rendered files into `out_dir` and return their paths.
    fn render(&self, projects: &ProjectSet, out_dir: &Path) -> ArtifactResult<Vec<PathBuf>>;
}

/// Renders one nginx virtual-host file per project.
#[derive(Debug, Clone)]
pub struct VhostRenderer {
    acme_dir: String,
    manual_cert_dir: String,
}

impl Default for VhostRenderer {
    fn default() -> Self {
        Self {
            acme_dir: "/etc/letsencrypt/live".to_string(),
            manual_cert_dir: "/etc/nginx/ssl".to_string(),
        }
    }
}

impl VhostRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override where certificates are expected on the nodes.
    pub fn with_cert_dirs(mut self, acme_dir: &str, manual_cert_dir: &str) -> Self {
        self.acme_dir = acme_dir.trim_end_matches('/').to_string();
        self.manual_cert_dir = manual_cert_dir.trim_end_matches('/').to_string();
        self
    }

    /// Render a single project to a string.
    ///
    /// Fails if a domain is not a valid hostname; hostnames are written
    /// into the config unquoted.
    pub fn render_project(&self, id: &str, project: &ProjectMetadata) -> ArtifactResult<String> {
        let mut sites = Vec::with_capacity(project.domains.len());
        for (host, policy) in &project.domains {
            if !is_valid_hostname(host) {
                return Err(ArtifactError::Render(format!(
                    "project {id:?} has invalid hostname {host:?}"
                )));
            }
            sites.push(self.site_view(host, policy));
        }
        let template = VhostTemplate {
            project_id: single_line(id),
            version: single_line(&project.version),
            directives: project_directives(project),
            sites,
        };
        Ok(template.render()?)
    }

    fn site_view(&self, host: &str, policy: &DomainPolicy) -> SiteView {
        let (cert_path, key_path) = match policy.ssl {
            SslMode::Automatic => (
                format!("{}/{host}/fullchain.pem", self.acme_dir),
                format!("{}/{host}/privkey.pem", self.acme_dir),
            ),
            SslMode::Manual => (
                format!("{}/{host}.crt", self.manual_cert_dir),
                format!("{}/{host}.key", self.manual_cert_dir),
            ),
            SslMode::None => (String::new(), String::new()),
        };
        SiteView {
            host: host.to_string(),
            redirect: policy.redirect,
            tls: policy.ssl.is_enabled(),
            cert_path,
            key_path,
        }
    }
}

impl Renderer for VhostRenderer {
    fn render(&self, projects: &ProjectSet, out_dir: &Path) -> ArtifactResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(projects.len());
        for (id, project) in projects {
            let name = file_name(id).ok_or_else(|| {
                ArtifactError::Render(format!("project id {id:?} has no usable file name"))
            })?;
            let path = out_dir.join(name);
            fs::write(&path, self.render_project(id, project)?)?;
            written.push(path);
        }
        debug!(files = written.len(), dir = %out_dir.display(), "rendered project configs");
        Ok(written)
    }
}

// ── Views ───────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "vhost.conf", escape = "none")]
struct VhostTemplate {
    project_id: String,
    version: String,
    directives: Vec<String>,
    sites: Vec<SiteView>,
}

struct SiteView {
    host: String,
    redirect: bool,
    tls: bool,
    cert_path: String,
    key_path: String,
}

/// Per-project nginx directives shared by every server block.
fn project_directives(project: &ProjectMetadata) -> Vec<String> {
    let mut lines = Vec::new();
    if !project.root_path.is_empty() {
        lines.push(format!("root \"{}\";", escape_quoted(&project.root_path)));
    }
    let vars = [
        ("storage", &project.storage),
        ("project_version", &project.version),
        ("core_path", &project.core_path),
        ("frontend_path", &project.frontend_path),
        ("dev_mode", &project.dev_mode),
        ("cache_url", &project.cache_url),
        ("sessions_url", &project.sessions_url),
        ("db_master_url", &project.db_master_url),
        ("db_slave_url", &project.db_slave_url),
        ("log_url", &project.log_url),
    ];
    for (name, value) in vars {
        if !value.is_empty() {
            lines.push(format!("set ${name} \"{}\";", escape_quoted(value)));
        }
    }
    lines
}

/// Comment-safe copy of `value`: control characters become spaces.
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Escape a value for a double-quoted nginx string. Control characters
/// become spaces.
fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// `<id>.conf`, with anything outside `[A-Za-z0-9._-]` replaced.
fn file_name(id: &str) -> Option<String> {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        return None;
    }
    Some(format!("{safe}.conf"))
}
