//! Histogram helpers

use super::labels;
use metrics::histogram;

/// Time from `start` to a usable connection
pub fn connect_duration(policy: &'static str, duration_ms: u64) {
    histogram!("fraiseql_connect_duration_ms", labels::POLICY => policy).record(duration_ms as f64);
}

/// Time spent in the authentication exchange
pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
    histogram!("fraiseql_auth_duration_ms", labels::MECHANISM => mechanism)
        .record(duration_ms as f64);
}
