//! Liveness sweeper — background task that evicts silent nodes and polls
//! the rest for their applied version.
//!
//! Each sweep evicts first and probes second, so a node that has gone
//! quiet is never probed. Probes run concurrently, each under its own
//! timeout; a failing probe is recorded on the node and never evicts it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use confgrid_core::{ConfigVersion, epoch_secs};

use crate::probe::{ProbeError, VersionProbe};
use crate::registry::NodeRegistry;

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub evicted: usize,
    pub probed: usize,
    pub failed: usize,
}

/// Periodic eviction and version polling over a [`NodeRegistry`].
pub struct Sweeper {
    registry: NodeRegistry,
    probe: Arc<dyn VersionProbe>,
    liveness_timeout: Duration,
    interval: Duration,
    probe_timeout: Duration,
}

impl Sweeper {
    pub fn new(registry: NodeRegistry, probe: Arc<dyn VersionProbe>) -> Self {
        Self {
            registry,
            probe,
            liveness_timeout: Duration::from_secs(120),
            interval: Duration::from_secs(4),
            probe_timeout: Duration::from_secs(2),
        }
    }

    /// Silence after which a node is dropped.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Time between sweeps.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Upper bound for a single node probe.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            liveness_timeout_secs = self.liveness_timeout.as_secs(),
            "liveness sweeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let stats = self.sweep_once(epoch_secs()).await;
                    if stats != SweepStats::default() {
                        debug!(
                            evicted = stats.evicted,
                            probed = stats.probed,
                            failed = stats.failed,
                            "sweep complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("liveness sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Run one eviction + polling pass as of `now` (unix seconds).
    pub async fn sweep_once(&self, now: u64) -> SweepStats {
        let mut stats = SweepStats::default();

        for node in self.registry.evict_stale(now, self.liveness_timeout) {
            info!(
                address = %node.address,
                silent_secs = node.silent_for(now),
                last_version = node.last_confirmed_version,
                "evicted silent node"
            );
            stats.evicted += 1;
        }

        let mut probes = JoinSet::new();
        for node in self.registry.snapshot() {
            let probe = Arc::clone(&self.probe);
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let address = node.address;
                let result = probe_with_timeout(probe.as_ref(), &address, timeout).await;
                (address, result)
            });
        }

        while let Some(joined) = probes.join_next().await {
            let (address, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "probe task failed");
                    stats.failed += 1;
                    continue;
                }
            };
            stats.probed += 1;
            if result.is_err() {
                stats.failed += 1;
            }

            let Some(change) = self.registry.update_poll_result(&address, result) else {
                continue;
            };
            if change.version_changed() {
                info!(
                    %address,
                    old = ?change.previous_version,
                    new = ?change.version,
                    "node version changed"
                );
            } else if change.new_error() {
                warn!(%address, error = ?change.error, "node probe failed");
            }
        }

        stats
    }
}

async fn probe_with_timeout(
    probe: &dyn VersionProbe,
    address: &str,
    timeout: Duration,
) -> Result<ConfigVersion, String> {
    match tokio::time::timeout(timeout, probe.current_version(address)).await {
        Ok(Ok(version)) => Ok(version),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(ProbeError::Timeout {
            address: address.to_string(),
            timeout,
        }
        .to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::probe::{ProbeFuture, ProbeResult};

    /// Scripted probe: answers from a table, hangs for unknown addresses.
    #[derive(Default)]
    struct ScriptedProbe {
        answers: Mutex<HashMap<String, Result<ConfigVersion, u16>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn answer(&self, address: &str, answer: Result<ConfigVersion, u16>) {
            self.answers
                .lock()
                .unwrap()
                .insert(address.to_string(), answer);
        }
    }

    impl VersionProbe for ScriptedProbe {
        fn current_version<'a>(&'a self, address: &'a str) -> ProbeFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answers.lock().unwrap().get(address).cloned();
            Box::pin(async move {
                let result: ProbeResult<ConfigVersion> = match answer {
                    Some(Ok(v)) => Ok(v),
                    Some(Err(status)) => Err(ProbeError::Status {
                        address: address.to_string(),
                        status,
                    }),
                    None => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(0)
                    }
                };
                result
            })
        }
    }

    fn sweeper(registry: &NodeRegistry, probe: Arc<ScriptedProbe>) -> Sweeper {
        Sweeper::new(registry.clone(), probe)
            .with_liveness_timeout(Duration::from_secs(120))
            .with_probe_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn evicts_silent_nodes_before_probing() {
        let registry = NodeRegistry::new();
        let probe = Arc::new(ScriptedProbe::default());
        probe.answer("10.0.0.1", Ok(1));
        probe.answer("10.0.0.2", Ok(1));
        registry.register_at("10.0.0.1", Some(1), None, 1000);
        registry.register_at("10.0.0.2", Some(1), None, 1100);

        let stats = sweeper(&registry, Arc::clone(&probe)).sweep_once(1130).await;
        assert_eq!(stats, SweepStats { evicted: 1, probed: 1, failed: 0 });
        assert!(registry.get("10.0.0.1").is_none());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_results_are_recorded_without_refreshing_liveness() {
        let registry = NodeRegistry::new();
        let probe = Arc::new(ScriptedProbe::default());
        probe.answer("10.0.0.1", Ok(7));
        registry.register_at("10.0.0.1", Some(5), None, 1000);

        let s = sweeper(&registry, probe);
        s.sweep_once(1010).await;
        let node = registry.get("10.0.0.1").unwrap();
        assert_eq!(node.last_poll_version, Some(7));
        assert_eq!(node.last_seen_at, 1000);

        // Only the first registration counts; the node still expires.
        assert_eq!(s.sweep_once(1130).await.evicted, 1);
    }

    #[tokio::test]
    async fn failed_probe_is_recorded_not_evicted() {
        let registry = NodeRegistry::new();
        let probe = Arc::new(ScriptedProbe::default());
        probe.answer("10.0.0.1", Err(503));
        registry.register_at("10.0.0.1", Some(5), None, 1000);

        let stats = sweeper(&registry, probe).sweep_once(1010).await;
        assert_eq!(stats, SweepStats { evicted: 0, probed: 1, failed: 1 });
        let node = registry.get("10.0.0.1").unwrap();
        assert!(node.last_error.unwrap().contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out() {
        let registry = NodeRegistry::new();
        let probe = Arc::new(ScriptedProbe::default());
        probe.answer("10.0.0.1", Ok(2));
        // 10.0.0.2 has no scripted answer and hangs.
        registry.register_at("10.0.0.1", None, None, 1000);
        registry.register_at("10.0.0.2", None, None, 1000);

        let stats = sweeper(&registry, probe).sweep_once(1001).await;
        assert_eq!(stats, SweepStats { evicted: 0, probed: 2, failed: 1 });
        assert_eq!(registry.get("10.0.0.1").unwrap().last_poll_version, Some(2));
        let slow = registry.get("10.0.0.2").unwrap();
        assert!(slow.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn eviction_at_130_seconds_of_silence() {
        let registry = NodeRegistry::new();
        let probe = Arc::new(ScriptedProbe::default());
        probe.answer("10.0.0.1", Ok(1));
        registry.register_at("10.0.0.1", Some(1), None, 5000);

        let s = sweeper(&registry, probe);
        assert_eq!(s.sweep_once(5120).await.evicted, 0);
        assert_eq!(s.sweep_once(5130).await.evicted, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let registry = NodeRegistry::new();
        let probe = Arc::new(ScriptedProbe::default());
        let s = sweeper(&registry, probe).with_interval(Duration::from_secs(4));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { s.run(rx).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
