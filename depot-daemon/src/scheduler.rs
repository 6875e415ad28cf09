//! One-shot and interval scheduling of orchestrator runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use depot_core::{ConfigError, GlobalConfig};
use depot_store::{RemoteTarget, ReplicaSet};
use depot_sync::{run_units, ModTimeCursor, RunReport, SyncUnit};

use crate::error::DaemonError;
use crate::metrics::SyncMetrics;

/// Owns the sync units and the process-lifetime staleness cursor, and runs
/// them one cycle at a time.
pub struct Scheduler {
    units: Vec<Arc<SyncUnit>>,
    cursor: Arc<ModTimeCursor>,
}

impl Scheduler {
    /// Resolve every sync descriptor against the replica map and connect
    /// one replica set per unit. A dangling replica reference is fatal.
    pub async fn new(config: &GlobalConfig) -> Result<Self, DaemonError> {
        let mut units = Vec::with_capacity(config.syncs.len());
        for (name, sync) in &config.syncs {
            let mut replica_configs = Vec::with_capacity(sync.replicas.len());
            for replica_name in &sync.replicas {
                let replica = config.replicas.get(replica_name).ok_or_else(|| {
                    ConfigError::UnknownReplica {
                        sync: name.clone(),
                        replica: replica_name.clone(),
                    }
                })?;
                replica_configs.push(replica.clone());
            }
            let replicas = ReplicaSet::connect(&replica_configs).await?;

            let source = match (&sync.archive, &sync.tree) {
                (Some(key), None) => RemoteTarget::Key(key.clone()),
                (None, Some(prefix)) => RemoteTarget::Prefix(prefix.clone()),
                (None, None) => {
                    return Err(ConfigError::MissingSource(name.clone()).into());
                }
                (Some(_), Some(_)) => {
                    return Err(ConfigError::ConflictingSource(name.clone()).into());
                }
            };

            let unit = SyncUnit::new(name, replicas, source, sync.path.clone())
                .with_commands(sync.commands.clone())
                .with_shell(sync.shell.clone())
                .with_timeout(sync.timeout())
                .with_replace_prefix(sync.replace_prefix.clone());
            units.push(Arc::new(unit));
        }

        Ok(Self {
            units,
            cursor: Arc::new(ModTimeCursor::new()),
        })
    }

    /// Assemble a scheduler from already-built units; the replica clients
    /// behind them are whatever the caller connected.
    pub fn with_units(units: Vec<Arc<SyncUnit>>) -> Self {
        Self {
            units,
            cursor: Arc::new(ModTimeCursor::new()),
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// One orchestrator pass over all units.
    pub async fn run_once(&self) -> RunReport {
        run_units(&self.units, &self.cursor, None).await
    }

    /// Run once (no interval) or loop forever (interval set).
    ///
    /// In interval mode a cycle failure is never fatal: it is logged and
    /// counted, and the next tick proceeds. Only `shutdown` ends the loop.
    pub async fn run(
        &self,
        interval: Option<Duration>,
        metrics: &SyncMetrics,
        shutdown: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let Some(every) = interval.filter(|d| !d.is_zero()) else {
            let report = self.run_once().await;
            return match report.error {
                Some(err) => Err(err.into()),
                None => {
                    metrics.mark_success_now();
                    Ok(())
                }
            };
        };

        // Seeded true so a boot into a quiet period does not read as an
        // unhealthy deployment.
        let mut last_sync_succeeded = true;

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // consume the first immediate tick

        loop {
            let report = self.run_once().await;
            observe_cycle(&report, &mut last_sync_succeeded, metrics);

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
        }
    }
}

/// Fold one cycle's outcome into the health state and metrics.
///
/// A cycle that attempted nothing leaves `last_sync_succeeded` as it was:
/// a quiet cycle is evidence of neither health nor sickness. The gauge is
/// only stamped after a clean cycle while the last attempt is known good.
fn observe_cycle(report: &RunReport, last_sync_succeeded: &mut bool, metrics: &SyncMetrics) {
    match &report.error {
        Some(err) => {
            if report.any_attempted {
                *last_sync_succeeded = false;
            }
            metrics.sync_errors_total.inc();
            tracing::error!(error = %err, "sync cycle failed");
        }
        None => {
            if report.any_attempted {
                *last_sync_succeeded = true;
            }
            if *last_sync_succeeded {
                metrics.mark_success_now();
            }
        }
    }
}

/// Run every configured sync exactly once. Returns whether any unit
/// attempted an install; any cycle error is returned as-is.
pub async fn run_once(config: &GlobalConfig) -> Result<bool, DaemonError> {
    let scheduler = Scheduler::new(config).await?;
    let report = scheduler.run_once().await;
    match report.error {
        Some(err) => Err(err.into()),
        None => Ok(report.any_attempted),
    }
}

/// Run on a fixed interval until `shutdown` fires. Blocks; only a setup
/// failure returns an error.
pub async fn run_forever(
    config: &GlobalConfig,
    interval: Duration,
    metrics: &SyncMetrics,
    shutdown: &CancellationToken,
) -> Result<(), DaemonError> {
    let scheduler = Scheduler::new(config).await?;
    scheduler.run(Some(interval), metrics, shutdown).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use depot_core::{Credential, ReplicaConfig, SyncConfig};
    use depot_store::MemoryStore;
    use depot_sync::SyncError;

    use crate::metrics::registry;

    fn failing_unit(target: &TempDir) -> Arc<SyncUnit> {
        let replicas = ReplicaSet::from_stores(vec![(
            "empty".to_string(),
            std::sync::Arc::new(MemoryStore::new()),
        )]);
        Arc::new(SyncUnit::new(
            "failing",
            replicas,
            RemoteTarget::Key("missing.tar.gz".to_string()),
            target.path(),
        ))
    }

    fn fresh_metrics() -> SyncMetrics {
        SyncMetrics::register(&registry().expect("registry")).expect("metrics")
    }

    fn report(attempted: bool, error: Option<SyncError>) -> RunReport {
        RunReport {
            any_attempted: attempted,
            error,
        }
    }

    #[test]
    fn attempted_failure_flips_health_and_counts() {
        let metrics = fresh_metrics();
        let mut healthy = true;

        observe_cycle(
            &report(true, Some(SyncError::Join("boom".to_string()))),
            &mut healthy,
            &metrics,
        );
        assert!(!healthy);
        assert_eq!(metrics.sync_errors_total.get(), 1);
        assert_eq!(metrics.sync_last_success.get(), 0.0);
    }

    #[test]
    fn unattempted_failure_counts_but_keeps_health() {
        let metrics = fresh_metrics();
        let mut healthy = true;

        observe_cycle(
            &report(false, Some(SyncError::Join("boom".to_string()))),
            &mut healthy,
            &metrics,
        );
        assert!(healthy, "a failure before any write is not unhealthiness");
        assert_eq!(metrics.sync_errors_total.get(), 1);
    }

    #[test]
    fn quiet_cycle_stamps_gauge_only_while_healthy() {
        let metrics = fresh_metrics();
        let mut healthy = true;

        observe_cycle(&report(false, None), &mut healthy, &metrics);
        assert!(metrics.sync_last_success.get() > 0.0, "seeded-true boot");

        metrics.sync_last_success.set(0.0);
        healthy = false;
        observe_cycle(&report(false, None), &mut healthy, &metrics);
        assert_eq!(
            metrics.sync_last_success.get(),
            0.0,
            "quiet cycle must not mask a failed attempt"
        );

        observe_cycle(&report(true, None), &mut healthy, &metrics);
        assert!(healthy);
        assert!(metrics.sync_last_success.get() > 0.0);
    }

    #[tokio::test]
    async fn one_shot_error_is_returned() {
        let target = TempDir::new().expect("target");
        let scheduler = Scheduler::with_units(vec![failing_unit(&target)]);
        let metrics = fresh_metrics();
        let shutdown = CancellationToken::new();

        let err = scheduler
            .run(None, &metrics, &shutdown)
            .await
            .expect_err("cycle error must surface in one-shot mode");
        assert!(matches!(err, DaemonError::Sync(_)));
        assert_eq!(metrics.sync_last_success.get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_mode_counts_errors_and_survives_them() {
        let target = TempDir::new().expect("target");
        let scheduler = Arc::new(Scheduler::with_units(vec![failing_unit(&target)]));
        let metrics = fresh_metrics();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let metrics = metrics.clone();
            let shutdown = shutdown.clone();
            async move {
                scheduler
                    .run(Some(Duration::from_secs(60)), &metrics, &shutdown)
                    .await
            }
        });

        while metrics.sync_errors_total.get() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle
            .await
            .expect("join")
            .expect("interval mode ends cleanly on shutdown");
        assert!(metrics.sync_errors_total.get() >= 2, "loop kept going");
    }

    #[tokio::test]
    async fn dangling_replica_reference_fails_construction() {
        let mut config = GlobalConfig::default();
        config.replicas.insert(
            "eu1".to_string(),
            ReplicaConfig {
                host: "minio1:9000".to_string(),
                access_key: Credential::from("a"),
                secret_key: Credential::from("s"),
                bucket: "test".to_string(),
                custom_host_header: None,
            },
        );
        config.syncs = BTreeMap::from([(
            "rules".to_string(),
            SyncConfig {
                replicas: vec!["nosuch".to_string()],
                archive: Some("a.tar.gz".to_string()),
                tree: None,
                path: PathBuf::from("/tmp/depot-test"),
                commands: vec![],
                shell: "/bin/sh".to_string(),
                timeout: 5,
                replace_prefix: String::new(),
            },
        )]);

        let err = match Scheduler::new(&config).await {
            Ok(_) => panic!("dangling replica"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            DaemonError::Config(ConfigError::UnknownReplica { .. })
        ));
    }
}
