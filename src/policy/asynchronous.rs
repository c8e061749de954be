//! Async policy: start connecting now, finish on demand
//!
//! `start` spawns the connect onto the ambient tokio runtime and returns a
//! [`ConnectionHandle::Connecting`] handle immediately. The caller can keep
//! working and poll [`ConnectionPolicy::is_ready`]; the outcome of the attempt
//! is only reported by `complete`. Dropping an in-flight handle aborts the
//! task, which drops the partially established resource.

use super::{ConnectionHandle, ConnectionOptions, ConnectionPolicy, Connector};
use crate::backend::PgConnector;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// An in-flight connect attempt
///
/// Owns the spawned task. Dropping it cancels the attempt.
pub struct PendingConnect<T> {
    task: JoinHandle<Result<T>>,
}

impl<T> PendingConnect<T> {
    pub(crate) fn new(task: JoinHandle<Result<T>>) -> Self {
        Self { task }
    }

    /// Whether the attempt has concluded (successfully or not). Never blocks.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the attempt to conclude
    pub(crate) async fn wait(mut self) -> Result<T> {
        match (&mut self.task).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => Err(err.into_connect_failure()),
            Err(join_err) if join_err.is_cancelled() => Err(Error::ConnectFailure(
                "connection attempt was cancelled".into(),
            )),
            Err(join_err) => Err(Error::ConnectFailure(format!(
                "connection attempt aborted: {}",
                join_err
            ))),
        }
    }

    /// Abandon the attempt, releasing anything it acquired
    pub(crate) fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for PendingConnect<T> {
    fn drop(&mut self) {
        // No-op if the task already finished; its output is dropped with the handle.
        self.task.abort();
    }
}

/// Starts a non-blocking connect and completes it on demand.
///
/// `start` only fails for unambiguous setup errors (options rejected by
/// [`Connector::validate`], no tokio runtime). Everything else, including
/// remote refusal, is reported by `complete`.
#[derive(Debug)]
pub struct AsyncPolicy<C: Connector = PgConnector> {
    options: ConnectionOptions,
    connector: Arc<C>,
    /// True strictly between a successful `start` and the end of `complete`
    connecting: bool,
}

impl AsyncPolicy {
    /// Async policy over the Postgres connector
    pub fn new(options: impl Into<ConnectionOptions>) -> Self {
        Self::with_connector(options, PgConnector::default())
    }
}

impl<C: Connector> AsyncPolicy<C> {
    /// Async policy over a custom connector
    pub fn with_connector(options: impl Into<ConnectionOptions>, connector: C) -> Self {
        Self {
            options: options.into(),
            connector: Arc::new(connector),
            connecting: false,
        }
    }

    /// The connector performing the real connect
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Whether an attempt is outstanding
    pub fn is_connecting(&self) -> bool {
        self.connecting
    }
}

impl<C: Connector> ConnectionPolicy for AsyncPolicy<C> {
    type Conn = C::Conn;

    const NAME: &'static str = "async";

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    async fn start(
        &mut self,
        handle: ConnectionHandle<C::Conn>,
    ) -> Result<ConnectionHandle<C::Conn>> {
        if handle.is_bound() {
            return Ok(handle);
        }

        self.connector
            .validate(&self.options)
            .map_err(Error::into_connect_failure)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::ConnectFailure(format!("cannot start asynchronous connect: {}", e))
        })?;

        let connector = Arc::clone(&self.connector);
        let options = self.options.clone();
        let task = runtime.spawn(async move { connector.connect(&options).await });

        self.connecting = true;
        tracing::debug!("asynchronous connect started");
        Ok(ConnectionHandle::Connecting(PendingConnect::new(task)))
    }

    async fn complete(
        &mut self,
        handle: ConnectionHandle<C::Conn>,
    ) -> Result<ConnectionHandle<C::Conn>> {
        if !self.connecting {
            if handle.is_connecting() {
                return Err(Error::InvalidState {
                    expected: "no in-flight handle outside a started attempt".into(),
                    actual: handle.describe().into(),
                });
            }
            return Ok(handle);
        }

        let outcome = match handle {
            ConnectionHandle::Connecting(pending) => pending.wait().await,
            other => {
                self.connecting = false;
                return Err(Error::InvalidState {
                    expected: "connecting handle while an attempt is outstanding".into(),
                    actual: other.describe().into(),
                });
            }
        };

        self.connecting = false;
        match outcome {
            Ok(conn) => {
                tracing::debug!("asynchronous connect completed");
                Ok(ConnectionHandle::Connected(conn))
            }
            Err(err) => {
                tracing::debug!(error = %err, "asynchronous connect failed");
                Err(err)
            }
        }
    }

    fn drop_connection(&mut self, handle: ConnectionHandle<C::Conn>) -> ConnectionHandle<C::Conn> {
        if self.connecting {
            crate::metrics::counters::connect_cancelled(Self::NAME);
            self.connecting = false;
        }
        handle.release()
    }

    fn abandon_attempt(&mut self) {
        if self.connecting {
            crate::metrics::counters::connect_cancelled(Self::NAME);
            tracing::debug!("asynchronous connect abandoned mid-completion");
            self.connecting = false;
        }
    }

    fn is_ready(&self, handle: &ConnectionHandle<C::Conn>) -> bool {
        match handle {
            ConnectionHandle::Connecting(pending) => pending.is_finished(),
            _ => true,
        }
    }
}
