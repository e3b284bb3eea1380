//! Scriptable in-memory platform for testing
//!
//! Allows scripting per-region launch outcomes and describe behavior, and
//! capturing issued calls for verification.

use super::{PlatformError, TaskPlatform};
use crate::status::TaskStatus;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Error kinds the mock can be scripted to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rate limiting (retryable)
    Throttled,
    /// Endpoint unreachable (retryable, fatal when total at launch)
    Unavailable,
    /// Request rejected (not retryable)
    Api,
}

fn make_error(kind: FailureKind, region: &str) -> PlatformError {
    match kind {
        FailureKind::Throttled => PlatformError::Throttled {
            region: region.to_string(),
        },
        FailureKind::Unavailable => PlatformError::Unavailable {
            message: format!("connection refused ({region})"),
        },
        FailureKind::Api => PlatformError::Api {
            code: "400".to_string(),
            message: format!("rejected ({region})"),
        },
    }
}

/// Scripted outcome for one launch call
#[derive(Debug, Clone, Copy)]
pub enum LaunchPlan {
    /// Grant every requested task
    Full,
    /// Grant only this many tasks (regional quota)
    Short(u32),
    /// Fail the whole call
    Fail(FailureKind),
}

/// A captured launch call
#[derive(Debug, Clone)]
pub struct LaunchCall {
    pub region: String,
    pub image: String,
    pub count: u32,
    pub tags: Vec<(String, String)>,
}

/// Mock orchestration platform
///
/// Clones share state, so a test can keep one handle for scripting and
/// assertions while the coordinator owns another.
///
/// Default behavior with no scripting: launches grant every requested task
/// with handles named `{region}-task-{n}`, and tasks report `running` until
/// the region's first describe call, after which they report `stopped_ok`.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    launch_plans: HashMap<String, VecDeque<LaunchPlan>>,
    describe_failures: HashMap<String, VecDeque<FailureKind>>,
    final_statuses: HashMap<String, TaskStatus>,
    settle_after: HashMap<String, u32>,
    describe_counts: HashMap<String, u32>,
    launches: Vec<LaunchCall>,
}

impl MockPlatform {
    /// Create a new mock platform
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted outcome for the region's next launch call
    pub fn script_launch(&self, region: &str, plan: LaunchPlan) {
        let mut inner = self.lock();
        inner
            .launch_plans
            .entry(region.to_string())
            .or_default()
            .push_back(plan);
    }

    /// Cause the region's next describe call to fail
    pub fn fail_next_describe(&self, region: &str, kind: FailureKind) {
        let mut inner = self.lock();
        inner
            .describe_failures
            .entry(region.to_string())
            .or_default()
            .push_back(kind);
    }

    /// Set the status a task reports once its region has settled
    pub fn set_final_status(&self, handle: &str, status: TaskStatus) {
        let mut inner = self.lock();
        inner.final_statuses.insert(handle.to_string(), status);
    }

    /// Number of describe calls a region answers `running` before tasks
    /// report their final status (default 1)
    pub fn set_settle_after(&self, region: &str, cycles: u32) {
        let mut inner = self.lock();
        inner.settle_after.insert(region.to_string(), cycles);
    }

    /// All launch calls issued so far
    pub fn launches(&self) -> Vec<LaunchCall> {
        self.lock().launches.clone()
    }

    /// Number of successful describe calls issued for a region
    pub fn describe_count(&self, region: &str) -> u32 {
        self.lock().describe_counts.get(region).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock platform mutex poisoned")
    }
}

#[async_trait]
impl TaskPlatform for MockPlatform {
    async fn launch(
        &self,
        region: &str,
        image: &str,
        count: u32,
        tags: &[(String, String)],
    ) -> Result<Vec<String>, PlatformError> {
        let mut inner = self.lock();
        inner.launches.push(LaunchCall {
            region: region.to_string(),
            image: image.to_string(),
            count,
            tags: tags.to_vec(),
        });

        let plan = inner
            .launch_plans
            .get_mut(region)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(LaunchPlan::Full);

        let granted = match plan {
            LaunchPlan::Full => count,
            LaunchPlan::Short(n) => n.min(count),
            LaunchPlan::Fail(kind) => return Err(make_error(kind, region)),
        };

        Ok((0..granted).map(|i| format!("{region}-task-{i}")).collect())
    }

    async fn describe(
        &self,
        region: &str,
        handles: &[String],
    ) -> Result<Vec<(String, TaskStatus)>, PlatformError> {
        let mut inner = self.lock();

        if let Some(kind) = inner
            .describe_failures
            .get_mut(region)
            .and_then(|queue| queue.pop_front())
        {
            return Err(make_error(kind, region));
        }

        let count = inner
            .describe_counts
            .entry(region.to_string())
            .or_insert(0);
        *count += 1;
        let count = *count;
        let settle = inner.settle_after.get(region).copied().unwrap_or(1);

        Ok(handles
            .iter()
            .map(|handle| {
                let status = if count >= settle {
                    inner
                        .final_statuses
                        .get(handle)
                        .copied()
                        .unwrap_or(TaskStatus::StoppedOk)
                } else {
                    TaskStatus::Running
                };
                (handle.clone(), status)
            })
            .collect())
    }
}
