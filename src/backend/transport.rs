//! Transport abstraction (TCP with optional TLS vs Unix socket)

use crate::{Error, Result};
use bytes::BytesMut;
use rustls::ClientConfig;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

/// Transport layer abstraction
pub(crate) enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// TLS over TCP
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix domain socket
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Transport::Tcp(_) => "Transport::Tcp",
            Transport::Tls(_) => "Transport::Tls",
            Transport::Unix(_) => "Transport::Unix",
        })
    }
}

impl Transport {
    /// Connect via plain TCP
    pub(crate) async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            Error::ConnectFailure(format!(
                "{}\n\tIs the server running on host \"{}\" and accepting TCP/IP connections on port {}?",
                e, host, port
            ))
        })?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    /// Connect via Unix socket
    pub(crate) async fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            Error::ConnectFailure(format!(
                "{}\n\tIs the server running locally and accepting connections on Unix domain socket \"{}\"?",
                e,
                path.display()
            ))
        })?;
        Ok(Transport::Unix(stream))
    }

    /// Upgrade a plain TCP transport to TLS after SSLRequest negotiation.
    pub(crate) async fn upgrade_to_tls(
        self,
        config: Arc<ClientConfig>,
        hostname: &str,
    ) -> Result<Self> {
        match self {
            Transport::Tcp(stream) => {
                let server_name = super::tls::server_name(hostname)?;
                let connector = tokio_rustls::TlsConnector::from(config);
                let tls = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| Error::ConnectFailure(format!("SSL error: {}", e)))?;
                Ok(Transport::Tls(Box::new(tls)))
            }
            Transport::Tls(_) => Err(Error::Protocol("transport is already TLS-encrypted".into())),
            Transport::Unix(_) => Err(Error::Protocol("cannot upgrade Unix socket to TLS".into())),
        }
    }

    /// Whether the stream is encrypted
    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write and flush bytes
    pub(crate) async fn send(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            Transport::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            Transport::Unix(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Read bytes into buffer; 0 means EOF
    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Tcp(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
            Transport::Unix(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Read exactly one byte, used for the SSLRequest answer
    pub(crate) async fn read_byte(&mut self) -> Result<u8> {
        let result = match self {
            Transport::Tcp(stream) => stream.read_u8().await,
            Transport::Tls(stream) => stream.read_u8().await,
            Transport::Unix(stream) => stream.read_u8().await,
        };
        result.map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        })
    }

    /// Shutdown the transport
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Tcp(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
            Transport::Unix(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    /// Best-effort write without awaiting; for use from `Drop`.
    ///
    /// TLS streams cannot be written synchronously; the socket is just closed.
    pub(crate) fn try_send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.try_write(buf),
            Transport::Unix(stream) => stream.try_write(buf),
            Transport::Tls(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "non-blocking write on TLS stream",
            )),
        }
    }
}
