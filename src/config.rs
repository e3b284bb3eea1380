//! Run configuration and validation

use std::time::Duration;
use thiserror::Error;

/// Default seconds between completion poll cycles
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default overall run deadline in seconds
pub const DEFAULT_DEADLINE_SECS: u64 = 1800;

/// Default number of status-query attempts per region per poll cycle
pub const DEFAULT_DESCRIBE_RETRIES: usize = 3;

/// Configuration error raised before any task is launched
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No target regions were given
    #[error("no target regions specified")]
    NoRegions,

    /// The same region appears twice in the target list
    #[error("duplicate target region '{0}'")]
    DuplicateRegion(String),

    /// Tasks-per-region must be at least 1
    #[error("tasks per region must be positive")]
    ZeroTaskCount,

    /// The image reference is not usable as a container image name
    #[error("invalid image reference '{0}'")]
    InvalidImageRef(String),

    /// The poll interval must be non-zero
    #[error("poll interval must be positive")]
    ZeroPollInterval,

    /// The deadline must allow at least one poll cycle
    #[error("deadline must be at least the poll interval")]
    DeadlineTooShort,
}

/// Configuration for one load-test run
///
/// Built by the caller (CLI or embedding code) and validated by the
/// coordinator before any launch request is issued.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Unique run identifier, attached as a tag to every launched task
    pub run_id: String,
    /// Container image reference for the load generator
    pub image: String,
    /// Target regions, in launch order
    pub regions: Vec<String>,
    /// Number of tasks to launch in each region
    pub tasks_per_region: u32,
    /// Fixed interval between completion poll cycles
    pub poll_interval: Duration,
    /// Overall deadline for the run, enforced by the poller
    pub deadline: Duration,
}

impl RunConfig {
    /// Create a config with default poll interval and deadline
    pub fn new(run_id: &str, image: &str, regions: Vec<String>, tasks_per_region: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            image: image.to_string(),
            regions,
            tasks_per_region,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
        }
    }

    /// Validate the configuration
    ///
    /// Called by the coordinator before launching; a failure here is fatal
    /// and no task is ever requested.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        for (i, region) in self.regions.iter().enumerate() {
            if self.regions[..i].contains(region) {
                return Err(ConfigError::DuplicateRegion(region.clone()));
            }
        }
        if self.tasks_per_region == 0 {
            return Err(ConfigError::ZeroTaskCount);
        }
        if !valid_image_ref(&self.image) {
            return Err(ConfigError::InvalidImageRef(self.image.clone()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.deadline < self.poll_interval {
            return Err(ConfigError::DeadlineTooShort);
        }
        Ok(())
    }

    /// Total number of tasks this run will account for across all regions
    pub fn total_tasks(&self) -> u32 {
        self.tasks_per_region * self.regions.len() as u32
    }
}

/// Check that a string is plausible as a container image reference
/// (`[registry/]repository[:tag][@digest]`)
fn valid_image_ref(image: &str) -> bool {
    if image.is_empty() || image.chars().any(char::is_whitespace) {
        return false;
    }
    if image.starts_with([':', '/', '@']) || image.ends_with([':', '/', '@']) {
        return false;
    }
    image
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::test_run_config;

    #[test]
    fn test_valid_config() {
        assert_eq!(test_run_config().validate(), Ok(()));
    }

    #[test]
    fn test_empty_regions_rejected() {
        let mut config = test_run_config();
        config.regions.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoRegions));
    }

    #[test]
    fn test_duplicate_region_rejected() {
        let mut config = test_run_config();
        config.regions.push(config.regions[0].clone());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateRegion(config.regions[0].clone()))
        );
    }

    #[test]
    fn test_zero_task_count_rejected() {
        let mut config = test_run_config();
        config.tasks_per_region = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTaskCount));
    }

    #[test]
    fn test_invalid_image_rejected() {
        for image in ["", "repo with spaces", ":tag-only", "repo:", "repo:tag!"] {
            let mut config = test_run_config();
            config.image = image.to_string();
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidImageRef(image.to_string())),
                "image {image:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_valid_image_refs() {
        for image in [
            "loadgen",
            "loadgen:1.4",
            "registry.example.com/team/loadgen:latest",
            "registry.example.com:5000/loadgen@sha256:abcd1234",
        ] {
            assert!(valid_image_ref(image), "image {image:?} should be accepted");
        }
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = test_run_config();
        config.poll_interval = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroPollInterval));
    }

    #[test]
    fn test_deadline_shorter_than_interval_rejected() {
        let mut config = test_run_config();
        config.deadline = config.poll_interval / 2;
        assert_eq!(config.validate(), Err(ConfigError::DeadlineTooShort));
    }

    #[test]
    fn test_total_tasks() {
        let config = test_run_config();
        assert_eq!(
            config.total_tasks(),
            config.tasks_per_region * config.regions.len() as u32
        );
    }
}
