//! Prometheus metrics published by the scheduler.

use chrono::Utc;
use prometheus::{Gauge, IntCounter, Registry};

use crate::error::DaemonError;

/// Build the registry all depot metrics live in, namespaced `depot`.
pub fn registry() -> Result<Registry, DaemonError> {
    Registry::new_custom(Some("depot".to_string()), None).map_err(DaemonError::from)
}

/// The scheduler's health signal pair: an error counter and a
/// last-confirmed-success timestamp gauge.
#[derive(Debug, Clone)]
pub struct SyncMetrics {
    pub sync_errors_total: IntCounter,
    pub sync_last_success: Gauge,
}

impl SyncMetrics {
    pub fn register(registry: &Registry) -> Result<Self, DaemonError> {
        let sync_errors_total = IntCounter::new(
            "sync_errors_total",
            "How many errors occurred during sync",
        )?;
        registry.register(Box::new(sync_errors_total.clone()))?;

        let sync_last_success = Gauge::new(
            "sync_last_success",
            "Last time a sync was successful, as Unix seconds",
        )?;
        registry.register(Box::new(sync_last_success.clone()))?;

        Ok(Self {
            sync_errors_total,
            sync_last_success,
        })
    }

    /// Stamp the last-success gauge with the current time.
    pub fn mark_success_now(&self) {
        self.sync_last_success.set(Utc::now().timestamp() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_carry_the_namespace() {
        let registry = registry().expect("registry");
        let metrics = SyncMetrics::register(&registry).expect("register");
        metrics.sync_errors_total.inc();

        let families: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(families.contains(&"depot_sync_errors_total".to_string()));
        assert!(families.contains(&"depot_sync_last_success".to_string()));
    }

    #[test]
    fn mark_success_sets_a_recent_timestamp() {
        let registry = registry().expect("registry");
        let metrics = SyncMetrics::register(&registry).expect("register");
        assert_eq!(metrics.sync_last_success.get(), 0.0);

        metrics.mark_success_now();
        let stamped = metrics.sync_last_success.get();
        assert!(stamped > 0.0);
        assert!((Utc::now().timestamp() as f64 - stamped).abs() < 5.0);
    }
}
