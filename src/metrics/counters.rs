//! Counter helpers

use super::labels;
use metrics::counter;

/// A policy began establishing a connection
pub fn connect_attempted(policy: &'static str) {
    counter!("fraiseql_connect_attempts_total", labels::POLICY => policy).increment(1);
}

/// A connection became usable
pub fn connect_succeeded(policy: &'static str) {
    counter!("fraiseql_connect_success_total", labels::POLICY => policy).increment(1);
}

/// A connection attempt failed (at start or completion)
pub fn connect_failed(policy: &'static str) {
    counter!("fraiseql_connect_failures_total", labels::POLICY => policy).increment(1);
}

/// An in-flight attempt was abandoned by the drop hook
pub fn connect_cancelled(policy: &'static str) {
    counter!("fraiseql_connect_cancelled_total", labels::POLICY => policy).increment(1);
}

/// The drop hook ran
pub fn connection_dropped(policy: &'static str, state: &'static str) {
    counter!(
        "fraiseql_connect_dropped_total",
        labels::POLICY => policy,
        labels::STATE => state
    )
    .increment(1);
}

/// An authentication exchange began
pub fn auth_attempted(mechanism: &'static str) {
    counter!("fraiseql_auth_attempts_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication succeeded
pub fn auth_successful(mechanism: &'static str) {
    counter!("fraiseql_auth_success_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication failed
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    counter!(
        "fraiseql_auth_failures_total",
        labels::MECHANISM => mechanism,
        labels::REASON => reason
    )
    .increment(1);
}
