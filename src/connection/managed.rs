//! Policy-driven connection owner

use super::state::ConnectionState;
use crate::policy::{ConnectionHandle, ConnectionOptions, ConnectionPolicy};
use crate::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::Instrument;

/// Owns exactly one connection resource and sequences a policy's hooks.
///
/// * construction runs `start` (a failure means no object is returned)
/// * [`activate`](Self::activate) runs `complete` when the connection is not yet usable
/// * [`close`](Self::close), or dropping the value, runs `drop_connection` exactly once
///
/// After close every lifecycle call returns [`Error::InvalidState`], which
/// is distinct from [`Error::ConnectFailure`]. A failed completion is final:
/// later `activate` calls report the same failure without touching the
/// backend again. Retrying means constructing a new instance.
///
/// Not internally synchronized; one owner at a time.
pub struct ManagedConnection<P: ConnectionPolicy> {
    policy: P,
    handle: ConnectionHandle<P::Conn>,
    state: ConnectionState,
    /// Message of the failure that moved us to `Failed`
    failure: Option<String>,
    /// Set while a `complete` future is outstanding
    completing: bool,
    started_at: Instant,
}

impl<P: ConnectionPolicy> ManagedConnection<P> {
    /// Construct and run the policy's `start` hook
    ///
    /// With [`DirectPolicy`](crate::DirectPolicy) this performs the full
    /// connect; with [`LazyPolicy`](crate::LazyPolicy) and
    /// [`NullPolicy`](crate::NullPolicy) it does no I/O; with
    /// [`AsyncPolicy`](crate::AsyncPolicy) it returns while the connect is
    /// still in flight.
    pub async fn new(mut policy: P) -> Result<Self> {
        let started_at = Instant::now();
        crate::metrics::counters::connect_attempted(P::NAME);

        let span = tracing::debug_span!("start", policy = P::NAME);
        let handle = match policy.start(ConnectionHandle::Empty).instrument(span).await {
            Ok(handle) => handle,
            Err(err) => {
                crate::metrics::counters::connect_failed(P::NAME);
                tracing::debug!(policy = P::NAME, error = %err, "connection start failed");
                return Err(err);
            }
        };

        let state = match &handle {
            ConnectionHandle::Empty => ConnectionState::NotStarted,
            ConnectionHandle::Connecting(_) => ConnectionState::Connecting,
            ConnectionHandle::Connected(_) => ConnectionState::Connected,
        };

        let conn = Self {
            policy,
            handle,
            state,
            failure: None,
            completing: false,
            started_at,
        };
        if state == ConnectionState::Connected {
            conn.record_established();
        }
        Ok(conn)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Options the policy was created with
    pub fn options(&self) -> &ConnectionOptions {
        self.policy.options()
    }

    /// The policy driving this connection
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Whether a usable connection is held
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether [`activate`](Self::activate) would return without waiting on the network.
    ///
    /// Never blocks. Errors only if the connection was closed.
    pub fn is_ready(&self) -> Result<bool> {
        self.ensure_open("is_ready")?;
        Ok(self.policy.is_ready(&self.handle))
    }

    /// The message of the failure that ended the attempt, if any
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Make sure the connection is usable and borrow it
    ///
    /// Runs the policy's `complete` hook unless the connection is already
    /// established. Cancelling this future mid-flight abandons the attempt
    /// and leaves the connection `Failed`.
    pub async fn activate(&mut self) -> Result<&mut P::Conn> {
        self.ensure_open("activate")?;

        if self.completing {
            self.completing = false;
            self.policy.abandon_attempt();
            self.fail("connection attempt was interrupted".into());
        }

        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::NotStarted | ConnectionState::Connecting => self.complete().await?,
            ConnectionState::Failed | ConnectionState::Closed => {
                return Err(Error::ConnectFailure(
                    self.failure.clone().unwrap_or_else(|| "connection failed".into()),
                ));
            }
        }

        let state = self.state;
        self.handle
            .as_connected_mut()
            .ok_or_else(|| Error::InvalidState {
                expected: "connected handle".into(),
                actual: state.to_string(),
            })
    }

    /// Run the drop hook and move to `Closed`
    ///
    /// Errors only if already closed.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open("close")?;
        self.release();
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        let handle = std::mem::take(&mut self.handle);
        let span = tracing::debug_span!("complete", policy = P::NAME, state = %self.state);

        self.completing = true;
        let result = self.policy.complete(handle).instrument(span).await;
        self.completing = false;

        match result {
            Ok(ConnectionHandle::Connected(conn)) => {
                self.handle = ConnectionHandle::Connected(conn);
                self.state.transition(ConnectionState::Connected)?;
                self.record_established();
                Ok(())
            }
            Ok(other) => {
                // Keep whatever came back so the drop hook can release it
                self.handle = other;
                let message = "connection attempt did not produce a usable connection";
                self.fail(message.into());
                Err(Error::ConnectFailure(message.into()))
            }
            Err(err) => {
                let err = err.into_connect_failure();
                let message = match &err {
                    Error::ConnectFailure(msg) => msg.clone(),
                    other => other.to_string(),
                };
                self.fail(message);
                Err(err)
            }
        }
    }

    fn fail(&mut self, message: String) {
        if let Err(err) = self.state.transition(ConnectionState::Failed) {
            tracing::warn!(policy = P::NAME, error = %err, "unexpected failure transition");
            return;
        }
        crate::metrics::counters::connect_failed(P::NAME);
        tracing::debug!(policy = P::NAME, error = %message, "connection failed");
        self.failure = Some(message);
    }

    fn record_established(&self) {
        let elapsed = self.started_at.elapsed().as_millis() as u64;
        crate::metrics::counters::connect_succeeded(P::NAME);
        crate::metrics::histograms::connect_duration(P::NAME, elapsed);
        tracing::info!(policy = P::NAME, elapsed_ms = elapsed, "connection established");
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::InvalidState {
                expected: format!("open connection for {}", operation),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Run the drop hook exactly once; nothing escapes.
    fn release(&mut self) {
        let from = self.state;
        let handle = std::mem::take(&mut self.handle);
        let policy = &mut self.policy;

        match panic::catch_unwind(AssertUnwindSafe(|| policy.drop_connection(handle))) {
            Ok(handle) => self.handle = handle,
            Err(_) => tracing::warn!(policy = P::NAME, "drop hook panicked; ignored"),
        }

        self.state = ConnectionState::Closed;
        crate::metrics::counters::connection_dropped(P::NAME, from.as_str());
        tracing::debug!(policy = P::NAME, from = %from, "connection closed");
    }
}

impl<P: ConnectionPolicy> Drop for ManagedConnection<P> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.release();
        }
    }
}

impl<P: ConnectionPolicy> std::fmt::Debug for ManagedConnection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("policy", &P::NAME)
            .field("options", self.policy.options())
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish()
    }
}
