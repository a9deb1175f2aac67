//! Histogram helpers

use super::labels;

/// Time spent dialing until a seed accepted the session, in milliseconds
pub fn dial_duration(transport: &'static str, millis: u64) {
    metrics::histogram!(labels::DIAL_DURATION, "transport" => transport).record(millis as f64);
}

/// Time spent authenticating, in milliseconds
pub fn auth_duration(mechanism: &'static str, millis: u64) {
    metrics::histogram!(labels::AUTH_DURATION, "mechanism" => mechanism).record(millis as f64);
}
