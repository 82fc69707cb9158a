//! KV tree → `ProjectSet`.
//!
//! Keys look like `<prefix>/<project>/<kind>/...`. Unknown kinds and
//! variables are ignored; short or empty keys are skipped with a warning.
//! Domain policies are normalized once every key has been applied, so the
//! result does not depend on key order.

use tracing::{debug, warn};

use confgrid_core::{ProjectMetadata, ProjectSet, SslMode, is_valid_hostname};

/// One decoded key/value pair from the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Build project metadata from a flat list of KV pairs.
pub fn parse_projects(pairs: &[KvPair]) -> ProjectSet {
    let mut projects = ProjectSet::new();

    for pair in pairs {
        let segments: Vec<&str> = pair.key.split('/').collect();

        let id = match segments.get(1) {
            Some(id) if !id.is_empty() => *id,
            _ => {
                warn!(key = %pair.key, "skipping metadata key without project id");
                continue;
            }
        };
        if id == "list" {
            continue;
        }

        let project = projects.entry(id.to_string()).or_default();
        let value = pair.value.as_str();

        match segments.get(2).copied() {
            Some("var") => match segments.get(3) {
                Some(name) => apply_var(project, name, value),
                None => warn!(key = %pair.key, "variable key without a name"),
            },
            Some("version") => project.version = value.to_string(),
            Some("storage") => project.storage = value.to_string(),
            Some("domains") => apply_domain(project, &segments[3..], value, &pair.key),
            // Folder marker such as `clients/<id>/`.
            Some("") | None => {}
            Some(other) => debug!(key = %pair.key, kind = other, "ignoring metadata key"),
        }
    }

    for project in projects.values_mut() {
        project.normalize();
    }

    debug!(projects = projects.len(), keys = pairs.len(), "parsed project metadata");
    projects
}

fn apply_var(project: &mut ProjectMetadata, name: &str, value: &str) {
    let slot = match name {
        "CACHE_URL" => &mut project.cache_url,
        "DATABASE_SLAVE_URL" => &mut project.db_slave_url,
        "DATABASE_URL" => &mut project.db_master_url,
        "LOG_URL" => &mut project.log_url,
        "SESSION_URL" => &mut project.sessions_url,
        "core_path" => &mut project.core_path,
        "dev_mode" => &mut project.dev_mode,
        "frontend_path" => &mut project.frontend_path,
        "root_path" => &mut project.root_path,
        _ => return,
    };
    *slot = value.to_string();
}

/// Apply a `domains/...` key. `rest` is everything after `domains`.
fn apply_domain(project: &mut ProjectMetadata, rest: &[&str], value: &str, key: &str) {
    let host = match rest {
        ["list", host, ..] => *host,
        ["list"] | [] => "",
        [host, ..] => *host,
    };
    if !host.is_empty() && !is_valid_hostname(host) {
        warn!(%key, %host, "skipping domain with invalid hostname");
        return;
    }
    match rest {
        ["list", host, ..] if !host.is_empty() => {
            project.domain_mut(host);
        }
        ["list", ..] => {}
        [host, tail @ ..] if !host.is_empty() => {
            let policy = project.domain_mut(host);
            match tail {
                ["ssl"] => policy.ssl = SslMode::from_kv(value),
                [_, "redirect"] => {
                    if value.trim() == "yes" {
                        policy.redirect = true;
                    }
                }
                _ => {}
            }
        }
        _ => warn!(%key, "domain key without a hostname"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confgrid_core::DomainPolicy;

    fn kv(key: &str, value: &str) -> KvPair {
        KvPair::new(key, value)
    }

    #[test]
    fn parses_variables_and_scalars() {
        let projects = parse_projects(&[
            kv("clients/p1/var/CACHE_URL", "redis://cache"),
            kv("clients/p1/var/SESSION_URL", "redis://sessions"),
            kv("clients/p1/var/DATABASE_URL", "mysql://master"),
            kv("clients/p1/var/DATABASE_SLAVE_URL", "mysql://slave"),
            kv("clients/p1/var/LOG_URL", "udp://log"),
            kv("clients/p1/var/core_path", "/srv/core"),
            kv("clients/p1/var/dev_mode", "0"),
            kv("clients/p1/var/frontend_path", "/srv/front"),
            kv("clients/p1/var/root_path", "/srv/root"),
            kv("clients/p1/var/UNKNOWN", "ignored"),
            kv("clients/p1/version", "2.4.4"),
            kv("clients/p1/storage", "nfs1"),
        ]);

        let p = &projects["p1"];
        assert_eq!(p.cache_url, "redis://cache");
        assert_eq!(p.sessions_url, "redis://sessions");
        assert_eq!(p.db_master_url, "mysql://master");
        assert_eq!(p.db_slave_url, "mysql://slave");
        assert_eq!(p.log_url, "udp://log");
        assert_eq!(p.core_path, "/srv/core");
        assert_eq!(p.dev_mode, "0");
        assert_eq!(p.frontend_path, "/srv/front");
        assert_eq!(p.root_path, "/srv/root");
        assert_eq!(p.version, "2.4.4");
        assert_eq!(p.storage, "nfs1");
    }

    #[test]
    fn list_keys_are_skipped() {
        let projects = parse_projects(&[
            kv("clients/list/p1", ""),
            kv("clients/list", ""),
            kv("clients/p2/storage", "nfs2"),
        ]);
        assert_eq!(projects.len(), 1);
        assert!(projects.contains_key("p2"));
    }

    #[test]
    fn domains_are_deduplicated() {
        let projects = parse_projects(&[
            kv("clients/p1/domains/list/example.com", ""),
            kv("clients/p1/domains/example.com", ""),
            kv("clients/p1/domains/example.com/ssl", "none"),
        ]);
        assert_eq!(projects["p1"].domains.len(), 1);
    }

    #[test]
    fn ssl_implies_redirect_without_explicit_flag() {
        let projects = parse_projects(&[
            kv("clients/p1/domains/auto.example/ssl", "auto"),
            kv("clients/p1/domains/manual.example/ssl", "manual"),
        ]);
        let domains = &projects["p1"].domains;
        assert_eq!(
            domains["auto.example"],
            DomainPolicy {
                redirect: true,
                ssl: SslMode::Automatic
            }
        );
        assert_eq!(
            domains["manual.example"],
            DomainPolicy {
                redirect: true,
                ssl: SslMode::Manual
            }
        );
    }

    #[test]
    fn ssl_none_preserves_explicit_redirect() {
        let projects = parse_projects(&[
            kv("clients/p1/domains/plain.example/ssl", "none"),
            kv("clients/p1/domains/redir.example/opts/redirect", "yes"),
            kv("clients/p1/domains/redir.example/ssl", "none"),
            kv("clients/p1/domains/noredir.example/opts/redirect", "no"),
        ]);
        let domains = &projects["p1"].domains;
        assert!(!domains["plain.example"].redirect);
        assert!(domains["redir.example"].redirect);
        assert!(!domains["noredir.example"].redirect);
    }

    #[test]
    fn redirect_normalization_is_order_independent() {
        let forward = parse_projects(&[
            kv("clients/p1/domains/a.example/ssl", "auto"),
            kv("clients/p1/domains/a.example/opts/redirect", "no"),
        ]);
        let reverse = parse_projects(&[
            kv("clients/p1/domains/a.example/opts/redirect", "no"),
            kv("clients/p1/domains/a.example/ssl", "auto"),
        ]);
        assert_eq!(forward, reverse);
        assert!(forward["p1"].domains["a.example"].redirect);
    }

    #[test]
    fn invalid_hostnames_are_dropped() {
        let projects = parse_projects(&[
            kv("clients/p1/domains/list/evil.example;return 200", ""),
            kv("clients/p1/domains/a.example{/ssl", "auto"),
            kv("clients/p1/domains/ok.example/ssl", "auto"),
        ]);
        let domains = &projects["p1"].domains;
        assert_eq!(domains.len(), 1);
        assert!(domains.contains_key("ok.example"));
    }

    #[test]
    fn malformed_keys_do_not_panic() {
        let projects = parse_projects(&[
            kv("clients", "x"),
            kv("clients//storage", "x"),
            kv("clients/p1/domains", "x"),
            kv("clients/p1/domains/", "x"),
            kv("clients/p1/var", "x"),
            kv("clients/p1/", ""),
        ]);
        assert_eq!(projects.len(), 1);
        assert!(projects["p1"].domains.is_empty());
    }
}
