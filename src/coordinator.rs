//! Run coordination: launch, poll, verdict
//!
//! The coordinator is the top-level driver for one load-test run and the
//! sole place where errors and poll outcomes are translated into a run
//! status. It validates the configuration, launches every region in
//! parallel behind a barrier, seeds the ledger, drives the poller, and
//! aggregates the final verdict.

use crate::config::{ConfigError, RunConfig};
use crate::launcher::{launch_region, RegionTaskGroup};
use crate::ledger::{RunLedger, TaskRecord};
use crate::platform::{PlatformError, TaskPlatform};
use crate::poller::{poll_until_terminal, PollConfig, PollOutcome};
use crate::report::RunReport;
use crate::status::{RunStatus, TaskStatus};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Coordinator lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Run created, configuration not yet validated
    Initialized,
    /// Launch requests in flight
    Launching,
    /// Waiting for tasks to reach terminal status
    Polling,
    /// Verdict computed
    Finalized,
}

impl RunPhase {
    /// Get a display string for the phase
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Launching => "launching",
            Self::Polling => "polling",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fatal run errors, surfaced before any verdict exists
#[derive(Debug, Error)]
pub enum RunError {
    /// The configuration was rejected before anything launched
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The orchestration platform could not be reached in any target region
    #[error("orchestration platform unreachable in all target regions ({regions})")]
    PlatformUnavailable { regions: String },
}

/// One end-to-end load-test run
///
/// Created by the coordinator when a run starts and mutated only by it;
/// the run is terminal once every region has reported.
#[derive(Debug, Clone)]
pub struct Run {
    /// Unique run identifier
    pub run_id: String,
    /// Load-generator image under test
    pub image: String,
    /// Target regions, in launch order
    pub regions: Vec<String>,
    /// Tasks requested per region
    pub tasks_per_region: u32,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Current overall status
    pub status: RunStatus,
    /// Per-region launch results, populated during the launching phase
    pub groups: Vec<RegionTaskGroup>,
}

impl Run {
    fn new(config: &RunConfig) -> Self {
        Self {
            run_id: config.run_id.clone(),
            image: config.image.clone(),
            regions: config.regions.clone(),
            tasks_per_region: config.tasks_per_region,
            started_at: Utc::now(),
            status: RunStatus::Pending,
            groups: Vec::new(),
        }
    }
}

/// Aggregate a run verdict from a terminal snapshot
///
/// Failure dominates: any `stopped_failed` record makes the run `failed`,
/// even when the deadline also elapsed. A fully successful snapshot is
/// `succeeded`; anything else still unfinished or unknown is `timed_out`.
pub(crate) fn aggregate_status(records: &[TaskRecord]) -> RunStatus {
    if records.is_empty() {
        return RunStatus::Failed;
    }
    if records.iter().any(|r| r.status == TaskStatus::StoppedFailed) {
        RunStatus::Failed
    } else if records.iter().all(|r| r.status == TaskStatus::StoppedOk) {
        RunStatus::Succeeded
    } else {
        RunStatus::TimedOut
    }
}

/// Top-level driver for load-test runs
pub struct Coordinator {
    platform: Arc<dyn TaskPlatform>,
}

impl Coordinator {
    /// Create a coordinator backed by the given orchestration platform
    pub fn new(platform: Arc<dyn TaskPlatform>) -> Self {
        Self { platform }
    }

    /// Execute one run to its final verdict
    ///
    /// Drives `Initialized → Launching → Polling → Finalized`. A launch
    /// failure in one region is non-fatal and contributes `stopped_failed`
    /// records; total platform unavailability across every region aborts
    /// before polling. Cancellation via `cancel` stops polling and marks
    /// the run failed with an aborted reason.
    pub async fn start(
        &self,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        config.validate()?;

        let mut run = Run::new(config);
        info!(
            run_id = %run.run_id,
            image = %run.image,
            regions = ?run.regions,
            tasks_per_region = run.tasks_per_region,
            phase = %RunPhase::Launching,
            "starting run"
        );

        let ledger = Arc::new(RunLedger::new());

        // Launch every region in parallel; the join is a barrier, so one
        // slow or failing region never blocks the others from trying.
        let launches = config.regions.iter().map(|region| {
            let platform = Arc::clone(&self.platform);
            async move {
                let result = launch_region(
                    platform.as_ref(),
                    &config.run_id,
                    region,
                    &config.image,
                    config.tasks_per_region,
                )
                .await;
                (region.clone(), result)
            }
        });
        let results = futures::future::join_all(launches).await;

        let mut launch_errors: Vec<(String, PlatformError)> = Vec::new();
        for (region, result) in results {
            match result {
                Ok(group) => {
                    ledger.record_launch(&group.region, &group.handles, group.launched_at);
                    if group.shortfall > 0 {
                        ledger.record_shortfall(&group.region, group.shortfall, group.launched_at);
                    }
                    run.groups.push(group);
                }
                Err(e) => {
                    error!(region = %region, error = %e, "region launch failed");
                    let at = Utc::now();
                    ledger.record_shortfall(&region, config.tasks_per_region, at);
                    run.groups
                        .push(RegionTaskGroup::failed(&region, config.tasks_per_region, at));
                    launch_errors.push((region, e));
                }
            }
        }

        if launch_errors.len() == config.regions.len()
            && launch_errors.iter().all(|(_, e)| e.is_unavailable())
        {
            let regions = launch_errors
                .iter()
                .map(|(region, _)| region.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            error!(regions = %regions, "platform unreachable everywhere, aborting run");
            return Err(RunError::PlatformUnavailable { regions });
        }

        let outcome = if cancel.is_cancelled() {
            warn!(run_id = %run.run_id, "cancelled before polling started");
            PollOutcome::Aborted
        } else {
            run.status = RunStatus::Running;
            info!(
                run_id = %run.run_id,
                phase = %RunPhase::Polling,
                records = ledger.len(),
                "launch phase complete, polling for completion"
            );
            let poll = PollConfig::new(config.poll_interval, config.deadline);
            poll_until_terminal(
                Arc::clone(&self.platform),
                Arc::clone(&ledger),
                &config.regions,
                &poll,
                cancel,
            )
            .await
        };

        let records = ledger.snapshot();
        run.status = match outcome {
            PollOutcome::Aborted => RunStatus::Failed,
            PollOutcome::Completed | PollOutcome::DeadlineExceeded => aggregate_status(&records),
        };

        let failure_reason = match (outcome, run.status) {
            (PollOutcome::Aborted, _) => Some("aborted".to_string()),
            (_, RunStatus::Failed) => Some("task failures".to_string()),
            (_, RunStatus::TimedOut) => Some("deadline exceeded".to_string()),
            _ => None,
        };

        let report = RunReport::new(&run, &records, failure_reason);
        info!(
            run_id = %run.run_id,
            status = %report.status,
            elapsed_secs = report.elapsed_secs,
            phase = %RunPhase::Finalized,
            "run finished"
        );

        Ok(report)
    }
}
