//! Connection lifecycle metrics
//!
//! Recorded through the [`metrics`](https://docs.rs/metrics) facade; nothing is
//! exported unless the application installs a recorder.
//!
//! * `fraiseql_connect_attempts_total{policy}`
//! * `fraiseql_connect_success_total{policy}`
//! * `fraiseql_connect_failures_total{policy}`
//! * `fraiseql_connect_cancelled_total{policy}`
//! * `fraiseql_connect_dropped_total{policy, state}`
//! * `fraiseql_connect_duration_ms{policy}` (histogram)
//! * `fraiseql_auth_attempts_total{mechanism}`, `fraiseql_auth_success_total{mechanism}`,
//!   `fraiseql_auth_failures_total{mechanism, reason}`
//! * `fraiseql_auth_duration_ms{mechanism}` (histogram)

pub mod counters;
pub mod histograms;
pub mod labels;
