//! TLS modes and rustls client configuration
//!
//! Certificate roots come from `sslrootcert` when set, otherwise from the
//! platform store, falling back to the bundled webpki roots.

use super::config::ConnectionConfig;
use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls_pemfile::Item;
use std::path::Path;
use std::sync::Arc;

/// SSL/TLS connection mode matching PostgreSQL `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disable,
    /// Try TLS, fall back to plaintext if the server refuses; no verification
    #[default]
    Prefer,
    /// TLS required, but server certificate is not verified
    Require,
    /// TLS required, server certificate must chain to a trusted root
    VerifyCa,
    /// TLS required, chain must verify and hostname must match
    VerifyFull,
}

impl SslMode {
    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether an SSLRequest is sent at all
    pub fn requests_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }

    /// Whether a server refusing TLS is tolerated
    pub fn allows_plaintext(&self) -> bool {
        matches!(self, Self::Disable | Self::Prefer)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        })
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!("invalid sslmode value: \"{}\"", s))),
        }
    }
}

/// SNI / verification name for `host`
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    let host = host.trim_end_matches('.');
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Config(format!("invalid hostname for TLS: \"{}\"", host)))
}

/// Build the rustls client configuration for `config.sslmode`
pub(crate) fn client_config(config: &ConnectionConfig) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS setup failed: {}", e)))?;

    let builder = match config.sslmode {
        SslMode::Disable => {
            return Err(Error::Config("TLS requested with sslmode=disable".into()));
        }
        SslMode::Prefer | SslMode::Require => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification(provider))),
        SslMode::VerifyCa => {
            let roots = Arc::new(root_store(config.sslrootcert.as_deref())?);
            let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
                .build()
                .map_err(|e| Error::Config(format!("TLS setup failed: {}", e)))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(ChainOnly(inner)))
        }
        SslMode::VerifyFull => {
            builder.with_root_certificates(root_store(config.sslrootcert.as_deref())?)
        }
    };

    let client_config = match (&config.sslcert, &config.sslkey) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| Error::Config(format!("invalid client certificate: {}", e)))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(Error::Config(
                "sslcert and sslkey must be given together".into(),
            ))
        }
    };

    Ok(Arc::new(client_config))
}

fn root_store(sslrootcert: Option<&Path>) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    if let Some(path) = sslrootcert {
        let (added, _) = store.add_parsable_certificates(load_certs(path)?);
        if added == 0 {
            return Err(Error::Config(format!(
                "no valid certificates found in \"{}\"",
                path.display()
            )));
        }
        return Ok(store);
    }

    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::debug!(
            errors = native.errors.len(),
            "some platform root certificates failed to load"
        );
    }
    store.add_parsable_certificates(native.certs);

    if store.is_empty() {
        tracing::debug!("no platform root certificates, using bundled webpki roots");
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(store)
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        Error::Config(format!(
            "could not read {} \"{}\": {}",
            what,
            path.display(),
            e
        ))
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path, "certificate file")?;
    let mut reader = std::io::Cursor::new(pem);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!(
                "could not parse certificate file \"{}\": {}",
                path.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in \"{}\"",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path, "private key file")?;
    let mut reader = std::io::Cursor::new(pem);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::Pkcs1Key(key))) => return Ok(key.into()),
            Ok(Some(Item::Pkcs8Key(key))) => return Ok(key.into()),
            Ok(Some(Item::Sec1Key(key))) => return Ok(key.into()),
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(Error::Config(format!(
                    "could not parse private key file \"{}\": {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    Err(Error::Config(format!(
        "no private key found in \"{}\"",
        path.display()
    )))
}

/// `sslmode=require`/`prefer`: encrypt without authenticating the server
#[derive(Debug)]
struct NoVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// `sslmode=verify-ca`: full chain validation, hostname ignored
#[derive(Debug)]
struct ChainOnly(Arc<WebPkiServerVerifier>);

impl ServerCertVerifier for ChainOnly {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .0
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(err)) if is_name_mismatch(&err) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.0.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.0.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_verify_schemes()
    }
}

fn is_name_mismatch(err: &rustls::CertificateError) -> bool {
    // Newer rustls releases report the mismatch with a context-carrying variant
    matches!(err, rustls::CertificateError::NotValidForName)
        || format!("{:?}", err).starts_with("NotValidForName")
}
