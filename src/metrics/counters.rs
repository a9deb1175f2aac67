//! Counter helpers

use super::labels;

/// A new session was opened
pub fn connection_opened(transport: &'static str) {
    metrics::counter!(labels::CONNECTIONS_OPENED, "transport" => transport).increment(1);
}

/// An existing session passed its probe and was handed out again
pub fn connection_reused() {
    metrics::counter!(labels::CONNECTIONS_REUSED).increment(1);
}

/// An existing session failed its probe
pub fn probe_failed() {
    metrics::counter!(labels::PROBE_FAILURES).increment(1);
}

/// A session was closed
pub fn connection_closed(reason: &'static str) {
    metrics::counter!(labels::CONNECTIONS_CLOSED, "reason" => reason).increment(1);
}

/// Authentication was attempted
pub fn auth_attempted(mechanism: &'static str) {
    metrics::counter!(labels::AUTH_ATTEMPTED, "mechanism" => mechanism).increment(1);
}

/// Authentication succeeded
pub fn auth_successful(mechanism: &'static str) {
    metrics::counter!(labels::AUTH_SUCCESSFUL, "mechanism" => mechanism).increment(1);
}

/// Authentication failed
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    metrics::counter!(
        labels::AUTH_FAILED,
        "mechanism" => mechanism,
        "reason" => reason
    )
    .increment(1);
}
