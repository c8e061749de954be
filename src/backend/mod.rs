//! PostgreSQL backend
//!
//! [`PgConnector`] is the default [`Connector`] behind every policy. It
//! parses the options string into a [`ConnectionConfig`] and performs the
//! real connect: socket, optional TLS, startup and authentication.

mod config;
mod conn;
mod tls;
mod transport;

pub use config::{ConnectionConfig, Host, DEFAULT_PORT};
pub use conn::PgConnection;
pub use tls::SslMode;

use crate::policy::{ConnectionOptions, Connector};
use crate::{Error, Result};

/// Connects to PostgreSQL using libpq-style options
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    /// Connect with an already parsed configuration
    pub async fn connect_with(config: &ConnectionConfig) -> Result<PgConnection> {
        let attempt = PgConnection::connect(config);
        match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| Error::ConnectFailure("timeout expired".into()))?,
            None => attempt.await,
        }
    }
}

impl Connector for PgConnector {
    type Conn = PgConnection;

    fn validate(&self, options: &ConnectionOptions) -> Result<()> {
        ConnectionConfig::parse(options.as_str()).map(|_| ())
    }

    async fn connect(&self, options: &ConnectionOptions) -> Result<PgConnection> {
        let config = ConnectionConfig::parse(options.as_str())?;
        Self::connect_with(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    #[test]
    fn test_validate_rejects_bad_options() {
        let connector = PgConnector;
        assert!(connector.validate(&"host=localhost".into()).is_ok());
        assert!(connector.validate(&"".into()).is_ok());
        assert!(connector.validate(&"bogus=1".into()).is_err());
        assert!(connector.validate(&"sslmode=maybe".into()).is_err());
    }

    #[tokio::test]
    async fn test_connect_timeout_expires() {
        // Accept the socket but never answer the startup packet
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let options = ConnectionOptions::from(format!(
            "host=127.0.0.1 port={} sslmode=disable connect_timeout=2",
            port
        ));
        let started = Instant::now();
        let err = PgConnector.connect(&options).await.unwrap_err();
        assert_eq!(err.to_string(), "could not connect to server: timeout expired");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
