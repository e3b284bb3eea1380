//! Completion polling with per-region workers, retry, and cancellation
//!
//! Drives every ledger record to a terminal status: one worker per region
//! queries the platform for its non-terminal tasks at a fixed interval,
//! independent of the other regions' cycles. Transient query failures are
//! retried with bounded exponential backoff inside the cycle; when the
//! budget is exhausted the region's non-terminal records are marked
//! `unknown` for that cycle and re-polled on the next one. The run deadline
//! and operator cancellation are both enforced here, at the boundary above
//! any single network call's own timeout.

use crate::config::DEFAULT_DESCRIBE_RETRIES;
use crate::ledger::RunLedger;
use crate::platform::{PlatformError, TaskPlatform};
use crate::status::TaskStatus;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for completion polling
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Fixed delay between poll cycles
    pub interval: Duration,
    /// Overall deadline for the run
    pub deadline: Duration,
    /// Status-query attempts per region per cycle
    pub describe_retries: usize,
    /// Initial delay between retry attempts within a cycle
    pub min_backoff: Duration,
    /// Cap for the within-cycle retry delay
    pub max_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
            deadline: Duration::from_secs(crate::config::DEFAULT_DEADLINE_SECS),
            describe_retries: DEFAULT_DESCRIBE_RETRIES,
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    /// Create a config with the given cycle interval and run deadline
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            ..Default::default()
        }
    }
}

/// How a polling phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every record reached a terminal status
    Completed,
    /// The deadline elapsed; remaining records were marked `unknown`
    DeadlineExceeded,
    /// Cancellation was requested; remaining records keep their last status
    Aborted,
}

/// Poll the platform until every ledger record is terminal, the deadline
/// elapses, or `cancel` fires
///
/// Region workers run concurrently and share no state besides the ledger.
/// After cancellation, in-flight status calls are allowed to finish but
/// their results are discarded.
pub async fn poll_until_terminal(
    platform: Arc<dyn TaskPlatform>,
    ledger: Arc<RunLedger>,
    regions: &[String],
    config: &PollConfig,
    cancel: &CancellationToken,
) -> PollOutcome {
    let stop = cancel.child_token();

    let workers: Vec<_> = regions
        .iter()
        .map(|region| {
            tokio::spawn(poll_region(
                Arc::clone(&platform),
                Arc::clone(&ledger),
                region.clone(),
                config.clone(),
                stop.clone(),
            ))
        })
        .collect();

    let mut all = futures::future::join_all(workers);

    enum Waited {
        Workers,
        Deadline,
        Cancelled,
    }

    let waited = tokio::select! {
        _ = &mut all => Waited::Workers,
        _ = tokio::time::sleep(config.deadline) => Waited::Deadline,
        _ = cancel.cancelled() => Waited::Cancelled,
    };

    match waited {
        Waited::Workers => {
            if ledger.is_complete() {
                PollOutcome::Completed
            } else {
                PollOutcome::Aborted
            }
        }
        Waited::Deadline => {
            stop.cancel();
            let _ = all.await;
            if ledger.is_complete() {
                return PollOutcome::Completed;
            }
            let marked = ledger.mark_non_terminal_unknown(Utc::now());
            warn!(marked, "deadline exceeded with unfinished tasks");
            PollOutcome::DeadlineExceeded
        }
        Waited::Cancelled => {
            // stop is a child of cancel, so the workers are already winding down
            let _ = all.await;
            PollOutcome::Aborted
        }
    }
}

/// Poll loop for a single region
async fn poll_region(
    platform: Arc<dyn TaskPlatform>,
    ledger: Arc<RunLedger>,
    region: String,
    config: PollConfig,
    stop: CancellationToken,
) {
    let mut cycle = 0u64;

    loop {
        if stop.is_cancelled() {
            debug!(region = %region, "polling stopped");
            return;
        }

        let pending = ledger.non_terminal_handles(&region);
        if pending.is_empty() {
            info!(region = %region, cycles = cycle, "all tasks terminal");
            return;
        }
        cycle += 1;
        debug!(region = %region, cycle, pending = pending.len(), "poll cycle");

        match describe_with_retry(platform.as_ref(), &region, &pending, &config).await {
            Ok(statuses) => {
                // Results observed after a stop request are discarded
                if stop.is_cancelled() {
                    return;
                }
                let observed_at = Utc::now();
                for (handle, status) in statuses {
                    ledger.update_status(&region, &handle, status, observed_at);
                }
            }
            Err(e) => {
                if stop.is_cancelled() {
                    return;
                }
                warn!(
                    region = %region,
                    cycle,
                    error = %e,
                    "status queries failed, marking tasks unknown for this cycle"
                );
                ledger.mark_region_non_terminal_unknown(&region, Utc::now());
            }
        }

        if ledger.non_terminal_handles(&region).is_empty() {
            info!(region = %region, cycles = cycle, "all tasks terminal");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = stop.cancelled() => {
                debug!(region = %region, "polling stopped");
                return;
            }
        }
    }
}

/// One cycle's status query for a region, retried with bounded backoff
///
/// The retry budget resets every cycle.
async fn describe_with_retry(
    platform: &dyn TaskPlatform,
    region: &str,
    handles: &[String],
    config: &PollConfig,
) -> Result<Vec<(String, TaskStatus)>, PlatformError> {
    (|| async { platform.describe(region, handles).await })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(config.min_backoff)
                .with_max_delay(config.max_backoff)
                .with_max_times(config.describe_retries)
                .with_jitter(),
        )
        .when(|e: &PlatformError| e.is_retryable())
        .notify(|e, dur| {
            warn!(region = %region, delay = ?dur, error = %e, "status query failed, retrying");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{FailureKind, MockPlatform};

    fn fast_config() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            deadline: Duration::from_secs(5),
            describe_retries: 3,
            min_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    fn seeded_ledger(regions: &[&str], tasks: u32) -> Arc<RunLedger> {
        let ledger = RunLedger::new();
        let now = Utc::now();
        for region in regions {
            let handles: Vec<String> = (0..tasks).map(|i| format!("{region}-task-{i}")).collect();
            ledger.record_launch(region, &handles, now);
        }
        Arc::new(ledger)
    }

    #[tokio::test]
    async fn test_polls_to_completion() {
        let mock = Arc::new(MockPlatform::new());
        mock.set_settle_after("eu-west-1", 2);
        let ledger = seeded_ledger(&["eu-west-1"], 3);
        let cancel = CancellationToken::new();

        let outcome = poll_until_terminal(
            mock.clone(),
            ledger.clone(),
            &["eu-west-1".to_string()],
            &fast_config(),
            &cancel,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Completed);
        assert!(ledger.is_complete());
        assert_eq!(mock.describe_count("eu-west-1"), 2);
    }

    #[tokio::test]
    async fn test_regions_poll_independently() {
        let mock = Arc::new(MockPlatform::new());
        mock.set_settle_after("eu-west-1", 1);
        mock.set_settle_after("us-east-1", 4);
        let ledger = seeded_ledger(&["eu-west-1", "us-east-1"], 2);
        let cancel = CancellationToken::new();

        let outcome = poll_until_terminal(
            mock.clone(),
            ledger.clone(),
            &["eu-west-1".to_string(), "us-east-1".to_string()],
            &fast_config(),
            &cancel,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Completed);
        // The fast region stopped polling once its tasks settled
        assert_eq!(mock.describe_count("eu-west-1"), 1);
        assert_eq!(mock.describe_count("us-east-1"), 4);
    }

    #[tokio::test]
    async fn test_deadline_marks_remaining_unknown() {
        let mock = Arc::new(MockPlatform::new());
        // One task never leaves `running`
        mock.set_final_status("eu-west-1-task-1", TaskStatus::Running);
        let ledger = seeded_ledger(&["eu-west-1"], 2);
        let cancel = CancellationToken::new();

        let mut config = fast_config();
        config.deadline = Duration::from_millis(100);

        let outcome = poll_until_terminal(
            mock,
            ledger.clone(),
            &["eu-west-1".to_string()],
            &config,
            &cancel,
        )
        .await;

        assert_eq!(outcome, PollOutcome::DeadlineExceeded);
        let snapshot = ledger.snapshot();
        let stuck = snapshot.iter().find(|r| r.handle == "eu-west-1-task-1").unwrap();
        assert_eq!(stuck.status, TaskStatus::Unknown);
        let done = snapshot.iter().find(|r| r.handle == "eu-west-1-task-0").unwrap();
        assert_eq!(done.status, TaskStatus::StoppedOk);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let mock = Arc::new(MockPlatform::new());
        mock.set_final_status("eu-west-1-task-0", TaskStatus::Running);
        let ledger = seeded_ledger(&["eu-west-1"], 1);
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let outcome = poll_until_terminal(
            mock.clone(),
            ledger.clone(),
            &["eu-west-1".to_string()],
            &fast_config(),
            &cancel,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Aborted);
        assert!(!ledger.is_complete());

        // No further cycles after cancellation
        let count = mock.describe_count("eu-west-1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.describe_count("eu-west-1"), count);
    }

    #[tokio::test]
    async fn test_transient_describe_failure_recovers() {
        let mock = Arc::new(MockPlatform::new());
        mock.fail_next_describe("eu-west-1", FailureKind::Unavailable);
        let ledger = seeded_ledger(&["eu-west-1"], 1);
        let cancel = CancellationToken::new();

        let outcome = poll_until_terminal(
            mock,
            ledger.clone(),
            &["eu-west-1".to_string()],
            &fast_config(),
            &cancel,
        )
        .await;

        // Retry within the cycle absorbed the transient failure
        assert_eq!(outcome, PollOutcome::Completed);
        assert!(ledger.is_complete());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_marks_cycle_unknown() {
        let mock = Arc::new(MockPlatform::new());
        // More consecutive failures than the per-cycle budget, then recovery
        for _ in 0..5 {
            mock.fail_next_describe("eu-west-1", FailureKind::Unavailable);
        }
        let ledger = seeded_ledger(&["eu-west-1"], 1);
        let cancel = CancellationToken::new();

        let outcome = poll_until_terminal(
            mock,
            ledger.clone(),
            &["eu-west-1".to_string()],
            &fast_config(),
            &cancel,
        )
        .await;

        // A later cycle succeeded and the task still completed
        assert_eq!(outcome, PollOutcome::Completed);
        assert!(ledger.is_complete());
    }

    #[tokio::test]
    async fn test_empty_ledger_completes_immediately() {
        let mock = Arc::new(MockPlatform::new());
        let ledger = Arc::new(RunLedger::new());
        let cancel = CancellationToken::new();

        let outcome = poll_until_terminal(
            mock.clone(),
            ledger,
            &["eu-west-1".to_string()],
            &fast_config(),
            &cancel,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Completed);
        assert_eq!(mock.describe_count("eu-west-1"), 0);
    }
}
