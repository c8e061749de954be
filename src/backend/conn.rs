//! Established Postgres session

use super::config::{ConnectionConfig, Host};
use super::tls;
use super::transport::Transport;
use crate::auth::{md5_password, scram, ScramClient};
use crate::metrics::labels;
use crate::protocol::constants::{tx_status, PROTOCOL_VERSION};
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FrontendMessage,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::time::Instant;
use tracing::Instrument;

/// Postgres connection that has completed startup and authentication
///
/// Dropping it sends a best-effort `Terminate` and closes the socket. Use
/// [`close`](Self::close) for an orderly shutdown that reports errors.
pub struct PgConnection {
    transport: Transport,
    read_buf: BytesMut,
    process_id: Option<i32>,
    secret_key: Option<i32>,
    parameters: HashMap<String, String>,
    transaction_status: u8,
    closed: bool,
}

impl PgConnection {
    /// Open the socket, negotiate TLS, authenticate and wait for `ReadyForQuery`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let span = tracing::info_span!(
            "startup",
            host = %config.host,
            port = config.port,
            database = %config.dbname,
            user = %config.user
        );

        async {
            let transport = open_transport(config).await?;
            let mut conn = Self {
                transport,
                read_buf: BytesMut::with_capacity(8192),
                process_id: None,
                secret_key: None,
                parameters: HashMap::new(),
                transaction_status: tx_status::IDLE,
                closed: false,
            };
            conn.startup(config).await?;
            Ok(conn)
        }
        .instrument(span)
        .await
    }

    /// Backend process id, for cancel requests and server logs
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Cancellation key paired with [`process_id`](Self::process_id)
    pub fn secret_key(&self) -> Option<i32> {
        self.secret_key
    }

    /// Value of a run-time parameter reported by the server (`ParameterStatus`)
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Server version as `major * 10000 + minor` (e.g. 160002), like `PQserverVersion`
    pub fn server_version(&self) -> Option<u32> {
        parse_server_version(self.parameter("server_version")?)
    }

    /// Transaction status byte from the last `ReadyForQuery` (`I`, `T` or `E`)
    pub fn transaction_status(&self) -> u8 {
        self.transaction_status
    }

    /// Whether the session runs over TLS
    pub fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    /// Send `Terminate` and shut the socket down
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        let terminate = encode_message(&FrontendMessage::Terminate)?;
        let sent = self.transport.send(&terminate).await;
        self.transport.shutdown().await?;
        sent
    }

    async fn startup(&mut self, config: &ConnectionConfig) -> Result<()> {
        let startup = FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: config.startup_params(),
        };
        self.send_message(&startup).await?;

        self.authenticate(config).await?;

        // Session parameters and key data until the server is ready
        loop {
            match self.receive_message().await? {
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    break;
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = Some(process_id);
                    self.secret_key = Some(secret_key);
                }
                BackendMessage::ErrorResponse(err) => {
                    return Err(Error::ConnectFailure(err.to_string()));
                }
                msg => self.handle_async_message(msg)?,
            }
        }

        tracing::info!(
            process_id = self.process_id,
            server_version = self.parameter("server_version"),
            tls = self.is_tls(),
            "startup complete"
        );
        Ok(())
    }

    async fn authenticate(&mut self, config: &ConnectionConfig) -> Result<()> {
        let auth_start = Instant::now();
        let mut mechanism = labels::MECHANISM_TRUST;

        loop {
            let auth = match self.receive_message().await? {
                BackendMessage::Authentication(auth) => auth,
                BackendMessage::ErrorResponse(err) => {
                    crate::metrics::counters::auth_failed(mechanism, "server_error");
                    return Err(Error::Authentication(err.to_string()));
                }
                msg => {
                    self.handle_async_message(msg)?;
                    continue;
                }
            };

            match auth {
                AuthenticationMessage::Ok => {
                    tracing::debug!(mechanism, "authentication successful");
                    crate::metrics::counters::auth_successful(mechanism);
                    crate::metrics::histograms::auth_duration(
                        mechanism,
                        auth_start.elapsed().as_millis() as u64,
                    );
                    return Ok(());
                }
                AuthenticationMessage::CleartextPassword => {
                    mechanism = labels::MECHANISM_CLEARTEXT;
                    crate::metrics::counters::auth_attempted(mechanism);
                    let password = required_password(config, mechanism)?;
                    self.send_message(&FrontendMessage::Password(password.to_string()))
                        .await?;
                }
                AuthenticationMessage::Md5Password { salt } => {
                    mechanism = labels::MECHANISM_MD5;
                    crate::metrics::counters::auth_attempted(mechanism);
                    let password = required_password(config, mechanism)?;
                    let hashed = md5_password(&config.user, password, salt);
                    self.send_message(&FrontendMessage::Password(hashed)).await?;
                }
                AuthenticationMessage::Sasl { mechanisms } => {
                    mechanism = labels::MECHANISM_SCRAM;
                    crate::metrics::counters::auth_attempted(mechanism);
                    self.sasl(&mechanisms, config).await?;
                }
                AuthenticationMessage::SaslContinue { .. }
                | AuthenticationMessage::SaslFinal { .. } => {
                    return Err(Error::Protocol(
                        "unexpected SASL message outside of SASL exchange".into(),
                    ));
                }
            }
        }
    }

    /// SCRAM-SHA-256 exchange; the final `AuthenticationOk` is read by the caller
    async fn sasl(&mut self, mechanisms: &[String], config: &ConnectionConfig) -> Result<()> {
        if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
            crate::metrics::counters::auth_failed(labels::MECHANISM_SCRAM, "unsupported");
            return Err(Error::Authentication(format!(
                "none of the server's SASL authentication mechanisms are supported: {}",
                mechanisms.join(", ")
            )));
        }
        let password = required_password(config, labels::MECHANISM_SCRAM)?;

        // Postgres ignores the SCRAM user name in favour of the startup packet
        let client = ScramClient::new("", password);
        self.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism: scram::MECHANISM.to_string(),
            data: client.client_first().into_bytes(),
        })
        .await?;

        let server_first = match self.receive_auth().await? {
            AuthenticationMessage::SaslContinue { data } => utf8(data, "server-first")?,
            _ => return Err(Error::Protocol("expected SASL continue message".into())),
        };
        let (client_final, state) = client
            .client_final(&server_first)
            .map_err(|e| scram_failure(e, "client_final"))?;
        self.send_message(&FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        })
        .await?;

        let server_final = match self.receive_auth().await? {
            AuthenticationMessage::SaslFinal { data } => utf8(data, "server-final")?,
            _ => return Err(Error::Protocol("expected SASL final message".into())),
        };
        client
            .verify_server_final(&server_final, &state)
            .map_err(|e| scram_failure(e, "server_signature"))?;

        tracing::debug!("SCRAM-SHA-256 server signature verified");
        Ok(())
    }

    async fn receive_auth(&mut self) -> Result<AuthenticationMessage> {
        match self.receive_message().await? {
            BackendMessage::Authentication(auth) => Ok(auth),
            BackendMessage::ErrorResponse(err) => {
                crate::metrics::counters::auth_failed(labels::MECHANISM_SCRAM, "server_error");
                Err(Error::Authentication(err.to_string()))
            }
            other => Err(Error::Protocol(format!(
                "unexpected message during SASL exchange: {:?}",
                other
            ))),
        }
    }

    /// Messages the server may send at any point of the startup
    fn handle_async_message(&mut self, msg: BackendMessage) -> Result<()> {
        match msg {
            BackendMessage::ParameterStatus { name, value } => {
                tracing::trace!(%name, %value, "parameter status");
                self.parameters.insert(name, value);
                Ok(())
            }
            BackendMessage::NoticeResponse(notice) => {
                tracing::debug!(notice = %notice, "server notice during startup");
                Ok(())
            }
            BackendMessage::NegotiateProtocolVersion {
                minor_version,
                unrecognized,
            } => {
                tracing::debug!(minor_version, ?unrecognized, "server negotiated protocol version");
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "unexpected message during startup: {:?}",
                other
            ))),
        }
    }

    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg)?;
        self.transport.send(&buf).await
    }

    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            let decoded = decode_message(&self.read_buf)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            if let Some((msg, consumed)) = decoded {
                self.read_buf.advance(consumed);
                return Ok(msg);
            }

            if self.transport.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let terminate = [b'X', 0, 0, 0, 4];
        match self.transport.try_send(&terminate) {
            Ok(_) => tracing::trace!("sent terminate on drop"),
            Err(e) => tracing::debug!(error = %e, "could not send terminate on drop"),
        }
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("transport", &self.transport)
            .field("process_id", &self.process_id)
            .field("server_version", &self.parameter("server_version"))
            .finish_non_exhaustive()
    }
}

/// TCP or Unix socket, with TLS negotiated when the mode asks for it
async fn open_transport(config: &ConnectionConfig) -> Result<Transport> {
    let hostname = match &config.host {
        Host::Unix(_) => {
            let path = config.socket_path().ok_or_else(|| {
                Error::Config("socket directory host without a socket path".into())
            })?;
            tracing::debug!(path = %path.display(), "connecting over Unix socket");
            return Transport::connect_unix(&path).await;
        }
        Host::Tcp(host) => host,
    };

    let mut transport = Transport::connect_tcp(hostname, config.port).await?;
    if !config.sslmode.requests_tls() {
        return Ok(transport);
    }

    // Fail on bad certificate files before talking to the server
    let client_config = tls::client_config(config)?;

    transport
        .send(&encode_message(&FrontendMessage::SslRequest)?)
        .await?;
    match transport.read_byte().await? {
        b'S' => {
            tracing::debug!(sslmode = %config.sslmode, "server accepted TLS, upgrading connection");
            transport.upgrade_to_tls(client_config, hostname).await
        }
        b'N' if config.sslmode.allows_plaintext() => {
            tracing::debug!("server does not support TLS, continuing in plaintext");
            Ok(transport)
        }
        b'N' => Err(Error::ConnectFailure(format!(
            "server does not support SSL, but SSL was required (sslmode={})",
            config.sslmode
        ))),
        other => Err(Error::Protocol(format!(
            "unexpected SSLRequest response byte: 0x{:02X}",
            other
        ))),
    }
}

fn required_password<'a>(config: &'a ConnectionConfig, mechanism: &'static str) -> Result<&'a str> {
    config.password.as_deref().ok_or_else(|| {
        crate::metrics::counters::auth_failed(mechanism, "no_password");
        Error::Authentication("password required but none supplied".into())
    })
}

fn utf8(data: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(data)
        .map_err(|_| Error::Protocol(format!("invalid UTF-8 in SCRAM {} message", what)))
}

fn scram_failure(err: scram::ScramError, reason: &'static str) -> Error {
    crate::metrics::counters::auth_failed(labels::MECHANISM_SCRAM, reason);
    Error::Authentication(err.to_string())
}

/// `"16.2"` → 160002, `"9.6.24"` → 90624, `"17devel"` → 170000
fn parse_server_version(version: &str) -> Option<u32> {
    let numeric: String = version
        .split_whitespace()
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    let base = major.checked_mul(10000)?;
    if major >= 10 {
        base.checked_add(minor)
    } else {
        let patch: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        base.checked_add(minor.checked_mul(100)?)?.checked_add(patch)
    }
}
