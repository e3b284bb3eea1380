//! Canonical status vocabulary for tasks and runs
//!
//! Provides the shared `TaskStatus` and `RunStatus` enums used across the
//! ledger, poller, and coordinator, replacing string-based status values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single launched load-generator task
///
/// `StoppedOk` and `StoppedFailed` are terminal: once a task reaches one of
/// them its recorded status never changes again. `Unknown` is what a task is
/// marked when its status could not be observed; it stays eligible for
/// re-polling until the run deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Launch requested, not yet observed running
    #[default]
    Launching,
    /// Task is executing
    Running,
    /// Task exited successfully
    StoppedOk,
    /// Task exited with an error, or was never launched (shortfall)
    StoppedFailed,
    /// Status could not be observed
    Unknown,
}

impl TaskStatus {
    /// Convert from a status string as reported by the orchestration platform
    ///
    /// Returns `None` for unrecognized values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "launching" | "provisioning" => Some(Self::Launching),
            "running" => Some(Self::Running),
            "stopped_ok" | "stopped-ok" => Some(Self::StoppedOk),
            "stopped_failed" | "stopped-failed" => Some(Self::StoppedFailed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Convert to a status string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Launching => "launching",
            Self::Running => "running",
            Self::StoppedOk => "stopped_ok",
            Self::StoppedFailed => "stopped_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Check if the status is terminal (will not change without a re-launch)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::StoppedOk | Self::StoppedFailed)
    }

    /// Check if the status represents success
    pub fn is_success(self) -> bool {
        matches!(self, Self::StoppedOk)
    }

    /// Check if the status represents failure
    pub fn is_failure(self) -> bool {
        matches!(self, Self::StoppedFailed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall status of a load-test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created, tasks not yet launched
    #[default]
    Pending,
    /// Tasks launched, waiting for completion
    Running,
    /// Every task stopped successfully
    Succeeded,
    /// At least one task failed, or the run was aborted
    Failed,
    /// The deadline elapsed with tasks still unfinished
    TimedOut,
}

impl RunStatus {
    /// Convert to a status string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Check if the run has reached a final verdict
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
