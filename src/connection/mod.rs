//! Connection lifecycle
//!
//! This module handles:
//! * The policy-driven owner ([`ManagedConnection`])
//! * State machine enforcement ([`ConnectionState`])
//! * Convenience aliases binding each policy to the Postgres backend

mod managed;
mod state;

pub use managed::ManagedConnection;
pub use state::ConnectionState;

use crate::backend::PgConnector;
use crate::policy::{AsyncPolicy, DirectPolicy, LazyPolicy, NullPolicy};

/// Postgres connection established during construction
pub type DirectConnection = ManagedConnection<DirectPolicy<PgConnector>>;

/// Postgres connection established on first [`activate`](ManagedConnection::activate)
pub type LazyConnection = ManagedConnection<LazyPolicy<PgConnector>>;

/// Postgres connection established in the background
pub type AsyncConnection = ManagedConnection<AsyncPolicy<PgConnector>>;

/// Placeholder that never connects
pub type NullConnection = ManagedConnection<NullPolicy>;
