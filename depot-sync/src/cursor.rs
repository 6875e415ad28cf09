//! Staleness cursor: last observed remote modification time per sync unit.
//!
//! The cursor is an explicit state object owned by the scheduler and passed
//! by reference into every unit run; it lives for the process lifetime and
//! starts empty on restart. Entries are keyed by unit name, so concurrent
//! units never contend on the same entry.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Per-unit last-seen remote modification times.
///
/// Invariant: entries are non-decreasing. A remote modification time not
/// strictly greater than the recorded one means "no update".
#[derive(Debug, Default)]
pub struct ModTimeCursor {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ModTimeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `candidate` is strictly newer than the recorded time for
    /// `key`, or when nothing has been recorded yet.
    pub fn is_newer(&self, key: &str, candidate: DateTime<Utc>) -> bool {
        let entries = self.entries.lock().expect("cursor lock");
        entries.get(key).map_or(true, |seen| candidate > *seen)
    }

    /// Record `candidate` for `key`. A candidate that would move the entry
    /// backwards is ignored, keeping the non-decreasing invariant.
    pub fn advance(&self, key: &str, candidate: DateTime<Utc>) {
        let mut entries = self.entries.lock().expect("cursor lock");
        let entry = entries.entry(key.to_string()).or_insert(candidate);
        if candidate > *entry {
            *entry = candidate;
        }
    }

    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().expect("cursor lock");
        entries.get(key).copied()
    }
}
