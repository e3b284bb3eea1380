//! Region task launcher
//!
//! Wraps the platform's launch capability for a single region: requests the
//! configured number of load-generator tasks, retrying on throttling, and
//! reports exactly how many tasks the platform granted. The call returns as
//! soon as the launches are requested; it never awaits task completion.

use crate::platform::{PlatformError, TaskPlatform};
use crate::tags;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// Launch attempts per region before a throttled call counts as failed
const LAUNCH_RETRIES: usize = 3;

/// The set of tasks launched in one region for a run
#[derive(Debug, Clone)]
pub struct RegionTaskGroup {
    /// Region identifier
    pub region: String,
    /// Number of tasks requested for this region
    pub requested: u32,
    /// Handles of the tasks the platform granted, one per task
    pub handles: Vec<String>,
    /// When the launch request completed
    pub launched_at: DateTime<Utc>,
    /// Requested minus granted task count
    pub shortfall: u32,
}

impl RegionTaskGroup {
    /// Group for a region whose launch call failed entirely
    pub fn failed(region: &str, requested: u32, at: DateTime<Utc>) -> Self {
        Self {
            region: region.to_string(),
            requested,
            handles: Vec::new(),
            launched_at: at,
            shortfall: requested,
        }
    }

    /// Number of tasks actually granted
    pub fn launched(&self) -> u32 {
        self.handles.len() as u32
    }

    /// Check whether every requested task was granted
    pub fn is_fully_launched(&self) -> bool {
        self.shortfall == 0
    }
}

/// Request `count` tasks of `image` in `region`, tagged with the run id
///
/// Throttled calls are retried with bounded exponential backoff before the
/// error propagates. A successful call may still grant fewer tasks than
/// requested; the difference is reported as the group's shortfall, never
/// silently dropped.
pub async fn launch_region(
    platform: &dyn TaskPlatform,
    run_id: &str,
    region: &str,
    image: &str,
    count: u32,
) -> Result<RegionTaskGroup, PlatformError> {
    let tags = tags::run_tags(run_id, region);

    info!(region = %region, image = %image, count, "requesting task launches");

    let mut handles = (|| async { platform.launch(region, image, count, &tags).await })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(10))
                .with_max_times(LAUNCH_RETRIES),
        )
        .when(|e: &PlatformError| matches!(e, PlatformError::Throttled { .. }))
        .notify(|e, dur| {
            warn!(region = %region, delay = ?dur, error = %e, "launch throttled, retrying");
        })
        .await?;

    if handles.len() as u32 > count {
        warn!(
            region = %region,
            granted = handles.len(),
            requested = count,
            "platform granted more tasks than requested, extra handles ignored"
        );
        handles.truncate(count as usize);
    }

    let shortfall = count - handles.len() as u32;
    if shortfall > 0 {
        warn!(region = %region, granted = handles.len(), requested = count, shortfall, "launch shortfall");
    } else {
        info!(region = %region, granted = handles.len(), "all tasks launched");
    }

    Ok(RegionTaskGroup {
        region: region.to_string(),
        requested: count,
        handles,
        launched_at: Utc::now(),
        shortfall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{FailureKind, LaunchPlan, MockPlatform};

    #[tokio::test]
    async fn test_full_launch() {
        let mock = MockPlatform::new();
        let group = launch_region(&mock, "run-1", "eu-west-1", "loadgen:1", 3)
            .await
            .unwrap();

        assert_eq!(group.region, "eu-west-1");
        assert_eq!(group.requested, 3);
        assert_eq!(group.launched(), 3);
        assert_eq!(group.shortfall, 0);
        assert!(group.is_fully_launched());
    }

    #[tokio::test]
    async fn test_launch_carries_run_tags() {
        let mock = MockPlatform::new();
        launch_region(&mock, "run-7", "eu-west-1", "loadgen:1", 1)
            .await
            .unwrap();

        let call = &mock.launches()[0];
        assert_eq!(call.image, "loadgen:1");
        assert!(call
            .tags
            .iter()
            .any(|(k, v)| k == tags::TAG_RUN_ID && v == "run-7"));
        assert!(call
            .tags
            .iter()
            .any(|(k, v)| k == tags::TAG_REGION && v == "eu-west-1"));
    }

    #[tokio::test]
    async fn test_shortfall_reported() {
        let mock = MockPlatform::new();
        mock.script_launch("eu-west-1", LaunchPlan::Short(1));

        let group = launch_region(&mock, "run-1", "eu-west-1", "loadgen:1", 3)
            .await
            .unwrap();
        assert_eq!(group.launched(), 1);
        assert_eq!(group.shortfall, 2);
        assert!(!group.is_fully_launched());
    }

    #[tokio::test]
    async fn test_throttled_launch_retried() {
        let mock = MockPlatform::new();
        mock.script_launch("eu-west-1", LaunchPlan::Fail(FailureKind::Throttled));

        let group = launch_region(&mock, "run-1", "eu-west-1", "loadgen:1", 2)
            .await
            .unwrap();
        assert_eq!(group.launched(), 2);
        assert_eq!(mock.launches().len(), 2);
    }

    #[tokio::test]
    async fn test_non_throttle_failure_propagates() {
        let mock = MockPlatform::new();
        mock.script_launch("eu-west-1", LaunchPlan::Fail(FailureKind::Api));

        let err = launch_region(&mock, "run-1", "eu-west-1", "loadgen:1", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Api { .. }));
        // Not retried
        assert_eq!(mock.launches().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_group_constructor() {
        let group = RegionTaskGroup::failed("eu-west-1", 3, Utc::now());
        assert_eq!(group.launched(), 0);
        assert_eq!(group.shortfall, 3);
        assert!(!group.is_fully_launched());
    }
}
