//! Per-run task ledger
//!
//! The ledger is the single synchronization point between region workers:
//! an append-only store of every task launched (or accounted as a launch
//! shortfall) for one run, keyed by (region, task handle). Region pollers
//! update records concurrently; writes to a single record are serialized by
//! the ledger and resolved last-write-wins by observation timestamp, with
//! ties going to arrival order. A record that reached a terminal status is
//! never mutated again, and no record is ever removed during a run.

use crate::status::TaskStatus;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// One launched (or accounted-for) container task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Opaque handle returned by the orchestration platform, or a synthetic
    /// `{region}-shortfall-{n}` handle for tasks that never launched
    pub handle: String,
    /// Region the task was launched in
    pub region: String,
    /// Last recorded status
    pub status: TaskStatus,
    /// Timestamp of the last applied observation
    pub last_observed: DateTime<Utc>,
}

/// Append-only store of all task records for a single run
#[derive(Debug, Default)]
pub struct RunLedger {
    records: Mutex<HashMap<(String, String), TaskRecord>>,
}

impl RunLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<(String, String), TaskRecord>> {
        self.records.lock().expect("ledger mutex poisoned")
    }

    /// Record freshly launched tasks for a region as `launching`
    pub fn record_launch(&self, region: &str, handles: &[String], launched_at: DateTime<Utc>) {
        let mut records = self.records();
        for handle in handles {
            let key = (region.to_string(), handle.clone());
            if records.contains_key(&key) {
                warn!(region = %region, handle = %handle, "duplicate launch record ignored");
                continue;
            }
            records.insert(
                key,
                TaskRecord {
                    handle: handle.clone(),
                    region: region.to_string(),
                    status: TaskStatus::Launching,
                    last_observed: launched_at,
                },
            );
        }
    }

    /// Record a launch shortfall for a region as immediately failed tasks
    ///
    /// Tasks the platform declined to launch still count against the run;
    /// they are never silently absorbed into a smaller group.
    pub fn record_shortfall(&self, region: &str, count: u32, at: DateTime<Utc>) {
        let mut records = self.records();
        for i in 0..count {
            let handle = format!("{region}-shortfall-{i}");
            records.insert(
                (region.to_string(), handle.clone()),
                TaskRecord {
                    handle,
                    region: region.to_string(),
                    status: TaskStatus::StoppedFailed,
                    last_observed: at,
                },
            );
        }
    }

    /// Apply an observed status to a record
    ///
    /// Returns `true` when the update was applied. Updates are dropped when
    /// the record is unknown to the ledger, already terminal, or the
    /// observation is older than the last applied one (equal timestamps are
    /// applied, preserving arrival order).
    pub fn update_status(
        &self,
        region: &str,
        handle: &str,
        status: TaskStatus,
        observed_at: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records();
        match records.get_mut(&(region.to_string(), handle.to_string())) {
            None => {
                warn!(region = %region, handle = %handle, "status update for unknown task dropped");
                false
            }
            Some(record) if record.status.is_terminal() => false,
            Some(record) if observed_at < record.last_observed => {
                debug!(region = %region, handle = %handle, "stale status observation dropped");
                false
            }
            Some(record) => {
                record.status = status;
                record.last_observed = observed_at;
                true
            }
        }
    }

    /// Handles of a region's records that have not reached a terminal status
    pub fn non_terminal_handles(&self, region: &str) -> Vec<String> {
        let mut handles: Vec<String> = self
            .records()
            .values()
            .filter(|r| r.region == region && !r.status.is_terminal())
            .map(|r| r.handle.clone())
            .collect();
        handles.sort();
        handles
    }

    /// Mark a region's non-terminal records `unknown` for this cycle
    ///
    /// Used when a region's status queries failed after exhausting the retry
    /// budget; the records stay eligible for the next cycle.
    pub fn mark_region_non_terminal_unknown(&self, region: &str, at: DateTime<Utc>) -> usize {
        let mut records = self.records();
        let mut marked = 0;
        for record in records.values_mut() {
            if record.region == region && !record.status.is_terminal() {
                record.status = TaskStatus::Unknown;
                record.last_observed = at;
                marked += 1;
            }
        }
        marked
    }

    /// Mark every remaining non-terminal record `unknown`
    ///
    /// Called once when the run deadline elapses; these records keep
    /// `unknown` as their final status.
    pub fn mark_non_terminal_unknown(&self, at: DateTime<Utc>) -> usize {
        let mut records = self.records();
        let mut marked = 0;
        for record in records.values_mut() {
            if !record.status.is_terminal() {
                record.status = TaskStatus::Unknown;
                record.last_observed = at;
                marked += 1;
            }
        }
        marked
    }

    /// Check whether every record reached a terminal status
    pub fn is_complete(&self) -> bool {
        self.records().values().all(|r| r.status.is_terminal())
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Check whether the ledger holds no records
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Immutable snapshot of all records, ordered by (region, handle)
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records().values().cloned().collect();
        records.sort_by(|a, b| {
            (a.region.as_str(), a.handle.as_str()).cmp(&(b.region.as_str(), b.handle.as_str()))
        });
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn handles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_record_launch_and_snapshot() {
        let ledger = RunLedger::new();
        let now = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-1", "t-0"]), now);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 2);
        // Snapshot is ordered by (region, handle)
        assert_eq!(snapshot[0].handle, "t-0");
        assert_eq!(snapshot[1].handle, "t-1");
        assert!(snapshot.iter().all(|r| r.status == TaskStatus::Launching));
    }

    #[test]
    fn test_shortfall_recorded_as_failed() {
        let ledger = RunLedger::new();
        ledger.record_shortfall("eu-west-1", 3, Utc::now());

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|r| r.status == TaskStatus::StoppedFailed));
        assert!(snapshot.iter().all(|r| r.handle.contains("shortfall")));
        assert!(ledger.is_complete());
    }

    #[test]
    fn test_update_status_applies() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-0"]), t0);

        assert!(ledger.update_status("eu-west-1", "t-0", TaskStatus::Running, t0 + Duration::seconds(1)));
        assert_eq!(ledger.snapshot()[0].status, TaskStatus::Running);
    }

    #[test]
    fn test_update_unknown_task_dropped() {
        let ledger = RunLedger::new();
        assert!(!ledger.update_status("eu-west-1", "ghost", TaskStatus::Running, Utc::now()));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_terminal_records_never_change() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-0"]), t0);
        assert!(ledger.update_status("eu-west-1", "t-0", TaskStatus::StoppedOk, t0 + Duration::seconds(1)));

        // Re-polling a terminal record is a no-op, even with a newer timestamp
        assert!(!ledger.update_status("eu-west-1", "t-0", TaskStatus::StoppedFailed, t0 + Duration::seconds(2)));
        assert_eq!(ledger.snapshot()[0].status, TaskStatus::StoppedOk);
    }

    #[test]
    fn test_stale_observation_dropped() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-0"]), t0);
        assert!(ledger.update_status("eu-west-1", "t-0", TaskStatus::Running, t0 + Duration::seconds(5)));

        // Older observation loses
        assert!(!ledger.update_status("eu-west-1", "t-0", TaskStatus::Launching, t0 + Duration::seconds(2)));
        assert_eq!(ledger.snapshot()[0].status, TaskStatus::Running);

        // Equal timestamp wins by arrival order
        assert!(ledger.update_status("eu-west-1", "t-0", TaskStatus::Unknown, t0 + Duration::seconds(5)));
        assert_eq!(ledger.snapshot()[0].status, TaskStatus::Unknown);
    }

    #[test]
    fn test_non_terminal_handles_per_region() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-0", "t-1"]), t0);
        ledger.record_launch("us-east-1", &handles(&["t-0"]), t0);
        ledger.update_status("eu-west-1", "t-0", TaskStatus::StoppedOk, t0 + Duration::seconds(1));

        assert_eq!(ledger.non_terminal_handles("eu-west-1"), handles(&["t-1"]));
        assert_eq!(ledger.non_terminal_handles("us-east-1"), handles(&["t-0"]));
    }

    #[test]
    fn test_mark_region_unknown_stays_pollable() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-0", "t-1"]), t0);
        ledger.update_status("eu-west-1", "t-0", TaskStatus::StoppedOk, t0 + Duration::seconds(1));

        assert_eq!(ledger.mark_region_non_terminal_unknown("eu-west-1", t0 + Duration::seconds(2)), 1);
        // Unknown is not terminal: the record is still polled next cycle
        assert_eq!(ledger.non_terminal_handles("eu-west-1"), handles(&["t-1"]));
        assert!(!ledger.is_complete());

        // A later cycle can still observe it running again
        assert!(ledger.update_status("eu-west-1", "t-1", TaskStatus::Running, t0 + Duration::seconds(3)));
    }

    #[test]
    fn test_mark_all_unknown_at_deadline() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        ledger.record_launch("eu-west-1", &handles(&["t-0"]), t0);
        ledger.record_launch("us-east-1", &handles(&["t-0"]), t0);
        ledger.update_status("us-east-1", "t-0", TaskStatus::StoppedOk, t0 + Duration::seconds(1));

        assert_eq!(ledger.mark_non_terminal_unknown(t0 + Duration::seconds(2)), 1);
        let snapshot = ledger.snapshot();
        let eu = snapshot.iter().find(|r| r.region == "eu-west-1").unwrap();
        assert_eq!(eu.status, TaskStatus::Unknown);
    }

    #[test]
    fn test_is_complete() {
        let ledger = RunLedger::new();
        let t0 = Utc::now();
        assert!(ledger.is_complete()); // vacuously

        ledger.record_launch("eu-west-1", &handles(&["t-0", "t-1"]), t0);
        assert!(!ledger.is_complete());

        ledger.update_status("eu-west-1", "t-0", TaskStatus::StoppedOk, t0 + Duration::seconds(1));
        ledger.update_status("eu-west-1", "t-1", TaskStatus::StoppedFailed, t0 + Duration::seconds(1));
        assert!(ledger.is_complete());
    }
}
