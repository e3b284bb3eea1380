//! Final run report
//!
//! Built by the coordinator from the terminal ledger snapshot. For any
//! non-succeeded outcome the report names the regions and task handles
//! responsible, so operators never have to grep logs for the culprit.

use crate::coordinator::Run;
use crate::ledger::TaskRecord;
use crate::status::{RunStatus, TaskStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Terminal-status breakdown for one region's task group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionReport {
    /// Region identifier
    pub region: String,
    /// Group status derived from the constituent task statuses
    pub status: RunStatus,
    /// Tasks requested for this region
    pub requested: u32,
    /// Tasks the platform actually granted
    pub launched: u32,
    /// Tasks that stopped successfully
    pub stopped_ok: u32,
    /// Tasks that failed or were never launched (shortfall)
    pub stopped_failed: u32,
    /// Tasks whose status was never observed
    pub unknown: u32,
    /// Tasks still non-terminal when the run ended (aborted runs)
    pub unfinished: u32,
    /// Handles of failed tasks
    pub failed_handles: Vec<String>,
    /// Handles of unknown tasks
    pub unknown_handles: Vec<String>,
}

/// Derive a group status from a region's records
fn group_status(records: &[&TaskRecord]) -> RunStatus {
    if records.iter().any(|r| r.status == TaskStatus::StoppedFailed) {
        RunStatus::Failed
    } else if records.iter().all(|r| r.status == TaskStatus::StoppedOk) {
        RunStatus::Succeeded
    } else if records.iter().any(|r| r.status == TaskStatus::Unknown) {
        RunStatus::TimedOut
    } else {
        RunStatus::Running
    }
}

/// Result of one load-test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: String,
    /// Load-generator image
    pub image: String,
    /// Final run status
    pub status: RunStatus,
    /// Why the run did not succeed, when it did not
    pub failure_reason: Option<String>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the verdict was computed
    pub finished_at: DateTime<Utc>,
    /// Total elapsed seconds
    pub elapsed_secs: i64,
    /// Per-region breakdown, in launch order
    pub regions: Vec<RegionReport>,
}

impl RunReport {
    /// Build a report from a finalized run and its ledger snapshot
    pub fn new(run: &Run, records: &[TaskRecord], failure_reason: Option<String>) -> Self {
        let finished_at = Utc::now();

        let regions = run
            .groups
            .iter()
            .map(|group| {
                let region_records: Vec<&TaskRecord> = records
                    .iter()
                    .filter(|r| r.region == group.region)
                    .collect();

                let count = |status: TaskStatus| {
                    region_records.iter().filter(|r| r.status == status).count() as u32
                };

                RegionReport {
                    region: group.region.clone(),
                    status: group_status(&region_records),
                    requested: group.requested,
                    launched: group.launched(),
                    stopped_ok: count(TaskStatus::StoppedOk),
                    stopped_failed: count(TaskStatus::StoppedFailed),
                    unknown: count(TaskStatus::Unknown),
                    unfinished: count(TaskStatus::Launching) + count(TaskStatus::Running),
                    failed_handles: region_records
                        .iter()
                        .filter(|r| r.status == TaskStatus::StoppedFailed)
                        .map(|r| r.handle.clone())
                        .collect(),
                    unknown_handles: region_records
                        .iter()
                        .filter(|r| r.status == TaskStatus::Unknown)
                        .map(|r| r.handle.clone())
                        .collect(),
                }
            })
            .collect();

        Self {
            run_id: run.run_id.clone(),
            image: run.image.clone(),
            status: run.status,
            failure_reason,
            started_at: run.started_at,
            finished_at,
            elapsed_secs: (finished_at - run.started_at).num_seconds(),
            regions,
        }
    }

    /// Total number of task records accounted for across all regions
    pub fn total_tasks(&self) -> u32 {
        self.regions
            .iter()
            .map(|r| r.stopped_ok + r.stopped_failed + r.unknown + r.unfinished)
            .sum()
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

/// Format elapsed seconds as hh:mm:ss
fn format_elapsed(secs: i64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== loadfleet run {} ===", self.run_id)?;
        writeln!(f, "Image:   {}", self.image)?;
        match &self.failure_reason {
            Some(reason) => writeln!(f, "Status:  {} ({})", self.status, reason)?,
            None => writeln!(f, "Status:  {}", self.status)?,
        }
        writeln!(f, "Elapsed: {}", format_elapsed(self.elapsed_secs))?;

        for region in &self.regions {
            let glyph = match region.status {
                RunStatus::Succeeded => "✓",
                RunStatus::Failed => "✗",
                _ => "?",
            };
            write!(
                f,
                "  {} {}: {}/{} ok",
                glyph, region.region, region.stopped_ok, region.requested
            )?;
            if region.stopped_failed > 0 {
                write!(
                    f,
                    ", {} failed [{}]",
                    region.stopped_failed,
                    region.failed_handles.join(", ")
                )?;
            }
            if region.unknown > 0 {
                write!(
                    f,
                    ", {} unknown [{}]",
                    region.unknown,
                    region.unknown_handles.join(", ")
                )?;
            }
            if region.unfinished > 0 {
                write!(f, ", {} unfinished", region.unfinished)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
