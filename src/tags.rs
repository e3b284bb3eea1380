//! Task tag constants for loadfleet
//!
//! Every task launched through the orchestration platform is tagged with
//! these standard tags to enable discovery, cleanup, and attribution of
//! stray load generators to the run that created them.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `loadfleet:tool` | Static identifier ("loadfleet") |
//! | `loadfleet:run-id` | Unique run identifier |
//! | `loadfleet:region` | Target region the task was launched in |
//! | `loadfleet:created-at` | RFC 3339 launch request timestamp |

use chrono::{DateTime, Utc};

/// Tag key for tool identification - all loadfleet tasks carry this
pub const TAG_TOOL: &str = "loadfleet:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "loadfleet";

/// Tag key for run ID - unique identifier per load-test run
pub const TAG_RUN_ID: &str = "loadfleet:run-id";

/// Tag key for the target region
pub const TAG_REGION: &str = "loadfleet:region";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "loadfleet:created-at";

/// Build the standard tag set attached to every launch request
pub fn run_tags(run_id: &str, region: &str) -> Vec<(String, String)> {
    vec![
        (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
        (TAG_RUN_ID.to_string(), run_id.to_string()),
        (TAG_REGION.to_string(), region.to_string()),
        (TAG_CREATED_AT.to_string(), format_created_at(Utc::now())),
    ]
}

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
