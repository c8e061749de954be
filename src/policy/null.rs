//! Null policy: never connects

use super::{ConnectionHandle, ConnectionOptions, ConnectionPolicy};
use crate::backend::PgConnection;
use crate::{Error, Result};
use std::marker::PhantomData;

/// Always-down policy for exercising failure handling.
///
/// Construction succeeds, but every attempt to obtain a live connection
/// fails with `ConnectFailure("null policy")` and the handle stays empty for
/// the whole lifetime of the owner. Not meant for production code.
pub struct NullPolicy<T = PgConnection> {
    options: ConnectionOptions,
    _conn: PhantomData<fn() -> T>,
}

impl NullPolicy {
    /// Null policy standing in for a Postgres connection
    pub fn new(options: impl Into<ConnectionOptions>) -> Self {
        Self::typed(options)
    }
}

impl<T> NullPolicy<T> {
    /// Null policy standing in for an arbitrary connection type
    pub fn typed(options: impl Into<ConnectionOptions>) -> Self {
        Self {
            options: options.into(),
            _conn: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for NullPolicy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullPolicy")
            .field("options", &self.options)
            .finish()
    }
}

impl<T: Send + 'static> ConnectionPolicy for NullPolicy<T> {
    type Conn = T;

    const NAME: &'static str = "null";

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    async fn start(&mut self, handle: ConnectionHandle<T>) -> Result<ConnectionHandle<T>> {
        Ok(handle.release())
    }

    async fn complete(&mut self, handle: ConnectionHandle<T>) -> Result<ConnectionHandle<T>> {
        drop(handle.release());
        tracing::debug!("null policy refuses to connect");
        Err(Error::ConnectFailure("null policy".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_always_fails() {
        for options in ["", "anything", "host=localhost dbname=postgres"] {
            let mut policy = NullPolicy::<u8>::typed(options);
            let handle = policy.start(ConnectionHandle::Empty).await.unwrap();
            assert!(handle.is_empty());

            match policy.complete(handle).await {
                Err(Error::ConnectFailure(msg)) => assert_eq!(msg, "null policy"),
                other => panic!("expected null policy failure, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_start_never_binds() {
        let mut policy = NullPolicy::<u8>::typed("anything");
        let handle = policy
            .start(ConnectionHandle::Connected(1))
            .await
            .unwrap();
        assert!(handle.is_empty());
        assert!(policy.is_ready(&handle));
        assert!(policy.drop_connection(handle).is_empty());
    }

    #[test]
    fn test_debug_redacts_options() {
        let policy = NullPolicy::new("password=secret");
        let debug = format!("{:?}", policy);
        assert!(debug.contains("NullPolicy"));
        assert!(!debug.contains("secret"));
    }
}
