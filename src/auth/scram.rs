//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677)
//!
//! Postgres takes the user name from the startup packet, so the `n=`
//! attribute is normally sent empty. Channel binding is not used; the
//! GS2 header is always `n,,`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Mechanism name as advertised by the server
pub const MECHANISM: &str = "SCRAM-SHA-256";

const GS2_HEADER: &str = "n,,";

/// SCRAM exchange failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScramError {
    /// Server message is missing attributes or malformed
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),

    /// Server returned an `e=` attribute
    #[error("server rejected authentication: {0}")]
    ServerError(String),

    /// Server signature did not match; the server does not know the password
    #[error("invalid server signature")]
    InvalidServerSignature,
}

/// Values carried from `client_final` to `verify_server_final`
#[derive(Clone, Debug)]
pub struct ScramState {
    auth_message: String,
    server_key: [u8; 32],
}

/// SCRAM-SHA-256 client for a single exchange
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
}

impl ScramClient {
    /// Client with a fresh random nonce
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(bytes))
    }

    /// Client with a caller-chosen nonce; must be printable and comma-free
    pub fn with_nonce(
        username: impl Into<String>,
        password: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            nonce: nonce.into(),
        }
    }

    fn client_first_bare(&self) -> String {
        let user = self.username.replace('=', "=3D").replace(',', "=2C");
        format!("n={},r={}", user, self.nonce)
    }

    /// `client-first-message`
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Process `server-first-message`, producing `client-final-message`
    pub fn client_final(&self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let first = ServerFirst::parse(server_first)?;

        if first.nonce.len() <= self.nonce.len() || !first.nonce.starts_with(&self.nonce) {
            return Err(ScramError::InvalidServerMessage(
                "server nonce does not extend client nonce".into(),
            ));
        }

        let salted = salted_password(&self.password, &first.salt, first.iterations)?;
        let client_key = hmac(&salted, b"Client Key");
        let server_key = hmac(&salted, b"Server Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), first.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let signature = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(signature) {
            *p ^= s;
        }

        let client_final = format!("{},p={}", without_proof, BASE64.encode(proof));
        Ok((
            client_final,
            ScramState {
                auth_message,
                server_key,
            },
        ))
    }

    /// Check `server-final-message`
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(err.to_string()));
        }
        let encoded = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing server signature".into()))?;
        let received = BASE64.decode(encoded).map_err(|_| {
            ScramError::InvalidServerMessage("server signature is not valid base64".into())
        })?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&state.server_key)
            .map_err(|_| ScramError::InvalidServerSignature)?;
        mac.update(state.auth_message.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&received)
            .map_err(|_| ScramError::InvalidServerSignature)
    }
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl ServerFirst {
    fn parse(msg: &str) -> Result<Self, ScramError> {
        let invalid = |what: &str| ScramError::InvalidServerMessage(what.to_string());

        if let Some(err) = msg.strip_prefix("e=") {
            return Err(ScramError::ServerError(err.to_string()));
        }

        let (mut nonce, mut salt, mut iterations) = (None, None, None);
        for attr in msg.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                _ => {}
            }
        }

        let nonce = nonce.filter(|n| !n.is_empty()).ok_or_else(|| invalid("missing nonce"))?;
        let salt = salt
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing salt"))
            .and_then(|s| BASE64.decode(s).map_err(|_| invalid("salt is not valid base64")))?;
        let iterations = iterations
            .ok_or_else(|| invalid("missing iteration count"))?
            .parse::<u32>()
            .ok()
            .filter(|&i| i > 0)
            .ok_or_else(|| invalid("invalid iteration count"))?;

        Ok(Self {
            nonce: nonce.to_string(),
            salt,
            iterations,
        })
    }
}

fn salted_password(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; 32], ScramError> {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut out)
        .map_err(|_| ScramError::InvalidServerMessage("key derivation failed".into()))?;
    Ok(out)
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 takes keys of any length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}
