//! Global properties added to JUnit-style reports.

use super::WorkerId;
use chrono::{DateTime, Utc};

pub const START_TIME_PROPERTY: &str = "start_time";
pub const START_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Properties to attach to the report. Only the master process writes
/// them, and only when a JUnit report is being produced.
pub fn report_properties(worker: WorkerId, junit_active: bool, now: DateTime<Utc>) -> Vec<(String, String)> {
    if !worker.is_master() || !junit_active {
        return Vec::new();
    }
    vec![(
        START_TIME_PROPERTY.to_string(),
        now.format(START_TIME_FORMAT).to_string(),
    )]
}
