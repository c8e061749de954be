//! Lazy policy: connect on first use

use super::{ConnectionHandle, ConnectionOptions, ConnectionPolicy, Connector};
use crate::backend::PgConnector;
use crate::{Error, Result};

/// Defers the real connect until a live connection is first needed.
///
/// Construction never touches the network, so many connection objects can
/// be set up cheaply; the cost and the risk of failure move to the first
/// `complete`. Once connected, further `complete` calls are no-ops.
#[derive(Debug, Clone)]
pub struct LazyPolicy<C: Connector = PgConnector> {
    options: ConnectionOptions,
    connector: C,
}

impl LazyPolicy {
    /// Lazy policy over the Postgres connector
    pub fn new(options: impl Into<ConnectionOptions>) -> Self {
        Self::with_connector(options, PgConnector::default())
    }
}

impl<C: Connector> LazyPolicy<C> {
    /// Lazy policy over a custom connector
    pub fn with_connector(options: impl Into<ConnectionOptions>, connector: C) -> Self {
        Self {
            options: options.into(),
            connector,
        }
    }

    /// The connector performing the real connect
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> ConnectionPolicy for LazyPolicy<C> {
    type Conn = C::Conn;

    const NAME: &'static str = "lazy";

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    async fn complete(
        &mut self,
        handle: ConnectionHandle<C::Conn>,
    ) -> Result<ConnectionHandle<C::Conn>> {
        if handle.is_bound() {
            return Ok(handle);
        }

        tracing::debug!("first use, establishing deferred connection");
        let conn = self
            .connector
            .connect(&self.options)
            .await
            .map_err(Error::into_connect_failure)?;
        Ok(ConnectionHandle::Connected(conn))
    }
}
