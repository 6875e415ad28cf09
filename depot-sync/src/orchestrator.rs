//! Concurrent multi-unit orchestration.
//!
//! Every sync unit runs as its own task under a derived deadline; the first
//! hard failure cancels the shared token and siblings abort at their next
//! suspension point. The orchestrator always waits for every task to unwind
//! before reporting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cursor::ModTimeCursor;
use crate::error::SyncError;
use crate::unit::SyncUnit;

/// The mutex-guarded aggregate "writing new content began" boolean shared
/// by every unit in one run. Never held across a suspension point.
#[derive(Debug, Default)]
pub struct AttemptedFlag {
    flag: Mutex<bool>,
}

impl AttemptedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        *self.flag.lock().expect("attempted flag lock") = true;
    }

    pub fn get(&self) -> bool {
        *self.flag.lock().expect("attempted flag lock")
    }
}

/// Outcome of one orchestrator run.
///
/// `any_attempted` is true if any unit began an install, even one that later
/// failed — callers can distinguish "nothing needed doing" from "something
/// broke mid-attempt".
#[derive(Debug)]
pub struct RunReport {
    pub any_attempted: bool,
    pub error: Option<SyncError>,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run every unit concurrently, each bounded by
/// `min(group timeout, unit timeout)`.
pub async fn run_units(
    units: &[Arc<SyncUnit>],
    cursor: &Arc<ModTimeCursor>,
    group_timeout: Option<Duration>,
) -> RunReport {
    let attempted = Arc::new(AttemptedFlag::new());
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for unit in units {
        let unit = unit.clone();
        let cursor = cursor.clone();
        let attempted = attempted.clone();
        let cancel = cancel.clone();
        let deadline = group_timeout.map_or(unit.timeout(), |group| group.min(unit.timeout()));

        tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(SyncError::Canceled {
                    unit: unit.name().to_string(),
                }),
                outcome = tokio::time::timeout(deadline, unit.run(&cursor, &attempted)) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => Err(SyncError::DeadlineExceeded {
                            unit: unit.name().to_string(),
                            timeout: deadline,
                        }),
                    }
                }
            }
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|err| Err(SyncError::Join(err.to_string())));
        if let Err(err) = result {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                tracing::debug!(error = %err, "subsequent unit failure after first error");
            }
            cancel.cancel();
        }
    }

    RunReport {
        any_attempted: attempted.get(),
        error: first_error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
