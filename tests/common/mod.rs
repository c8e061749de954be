//! Shared helpers for integration tests
//!
//! The counting fake backend is the same one the unit tests use: every
//! connection it opens is counted until dropped, so tests can prove nothing
//! leaks.

#![allow(dead_code, unused_imports)]

use fraiseql_connect::{ConnectionOptions, Connector, Error, Result};

#[path = "../../src/policy/testing.rs"]
mod testing;

pub(crate) use testing::{CountingConnector, FakeConn, Ledger};

/// Install a test subscriber honoring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
