//! Direct policy: connect immediately

use super::{ConnectionHandle, ConnectionOptions, ConnectionPolicy, Connector};
use crate::backend::PgConnector;
use crate::{Error, Result};

/// Connects synchronously during construction.
///
/// Bad options or an unreachable server surface as soon as the owning
/// [`ManagedConnection`](crate::ManagedConnection) is created, before any
/// other operation can run. `complete` is a pass-through.
#[derive(Debug, Clone)]
pub struct DirectPolicy<C: Connector = PgConnector> {
    options: ConnectionOptions,
    connector: C,
}

impl DirectPolicy {
    /// Direct policy over the Postgres connector
    pub fn new(options: impl Into<ConnectionOptions>) -> Self {
        Self::with_connector(options, PgConnector::default())
    }
}

impl<C: Connector> DirectPolicy<C> {
    /// Direct policy over a custom connector
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

impl<C: Connector> ConnectionPolicy for DirectPolicy<C> {
    type Conn = C::Conn;

    const NAME: &'static str = "direct";

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

        let conn = self
            .connector
            .connect(&self.options)
            .await
            .map_err(Error::into_connect_failure)?;
        Ok(ConnectionHandle::Connected(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::CountingConnector;

    #[tokio::test]
    async fn test_start_connects_immediately() {
        let connector = CountingConnector::default();
        let ledger = connector.ledger.clone();
        let mut policy = DirectPolicy::with_connector("host=db", connector);

        let handle = policy.start(ConnectionHandle::Empty).await.unwrap();
        assert!(handle.is_connected());
        assert_eq!(ledger.open_count(), 1);

        let handle = policy.complete(handle).await.unwrap();
        assert!(handle.is_connected());
        assert_eq!(ledger.total_opened(), 1);

        assert!(policy.drop_connection(handle).is_empty());
        assert_eq!(ledger.open_count(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_on_bad_options() {
        let connector = CountingConnector::default();
        let ledger = connector.ledger.clone();
        let mut policy = DirectPolicy::with_connector("bad=opts", connector);

        let err = policy.start(ConnectionHandle::Empty).await.unwrap_err();
        assert!(err.is_connect_failure());
        assert!(err.to_string().contains("invalid connection option"));
        assert_eq!(ledger.total_opened(), 0);
    }

    #[tokio::test]
    async fn test_failed_handshake_releases_resource() {
        let connector = CountingConnector::default();
        let ledger = connector.ledger.clone();
        let mut policy = DirectPolicy::with_connector("mode=refuse", connector);

        let err = policy.start(ConnectionHandle::Empty).await.unwrap_err();
        assert!(err.to_string().contains("password authentication failed"));
        assert_eq!(ledger.total_opened(), 1);
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_is_ready_defaults_to_true() {
        let policy = DirectPolicy::with_connector("", CountingConnector::default());
        assert!(policy.is_ready(&ConnectionHandle::Empty));
        assert_eq!(DirectPolicy::<CountingConnector>::NAME, "direct");
    }
}
