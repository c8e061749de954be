//! Connection policies
//!
//! A policy decides *when* the real network connect happens relative to the
//! construction and first use of a [`ManagedConnection`](crate::ManagedConnection).
//! Every policy exposes the same four hooks:
//!
//! * `start`: begin establishing a connection (may defer, finish, or leave it mid-flight)
//! * `complete`: wait until the handle is usable or has definitively failed
//! * `drop_connection`: release whatever the handle holds; never fails
//! * `is_ready`: non-blocking check whether there is anything left to wait for
//!
//! The real connect call is delegated to a [`Connector`];
//! [`PgConnector`](crate::PgConnector) is the default.

mod asynchronous;
mod direct;
mod lazy;
mod null;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
use crate::Error;

pub use asynchronous::{AsyncPolicy, PendingConnect};
pub use direct::DirectPolicy;
pub use lazy::LazyPolicy;
pub use null::NullPolicy;

use crate::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Opaque backend connection parameters (`key=value ...` or a `postgres://` URI)
///
/// Immutable once created and cheap to clone. The policy layer never looks
/// inside; only the [`Connector`] interprets it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionOptions(Arc<str>);

impl ConnectionOptions {
    /// Wrap an options string
    pub fn new(options: impl Into<String>) -> Self {
        Self(Arc::from(options.into()))
    }

    /// The options string exactly as supplied
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no options were supplied (all backend defaults apply)
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The options string with any password replaced by `***`
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl From<&str> for ConnectionOptions {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConnectionOptions {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&String> for ConnectionOptions {
    fn from(s: &String) -> Self {
        Self::new(s.as_str())
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionOptions")
            .field(&self.redacted())
            .finish()
    }
}

impl fmt::Display for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

fn redact(raw: &str) -> String {
    if let Some(rest) = raw
        .strip_prefix("postgres://")
        .or_else(|| raw.strip_prefix("postgresql://"))
    {
        let scheme = &raw[..raw.len() - rest.len()];
        return format!("{}{}", scheme, redact_uri(rest));
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find("password") {
        let (before, after) = rest.split_at(pos + "password".len());
        out.push_str(before);
        match after.trim_start().strip_prefix('=') {
            Some(value) => {
                out.push_str("=***");
                rest = skip_value(value.trim_start());
            }
            None => rest = after,
        }
    }
    out.push_str(rest);
    out
}

/// Redact the userinfo password and any `password` query parameter
fn redact_uri(rest: &str) -> String {
    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };

    let authority_end = location.find('/').unwrap_or(location.len());
    let mut out = match location[..authority_end].rfind('@') {
        Some(at) => match location[..at].find(':') {
            Some(colon) => format!("{}:***{}", &location[..colon], &location[at..]),
            None => location.to_string(),
        },
        None => location.to_string(),
    };

    if let Some(query) = query {
        let params: Vec<String> = query
            .split('&')
            .map(|param| match param.split_once('=') {
                Some((key, _)) if is_password_key(key) => format!("{}=***", key),
                _ => param.to_string(),
            })
            .collect();
        out.push('?');
        out.push_str(&params.join("&"));
    }
    out
}

/// Query keys are percent-decoded before use, so `pass%77ord` counts too
fn is_password_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (bytes[i], hex) {
            (b'%', Some(byte)) => {
                decoded.push(byte);
                i += 3;
            }
            (byte, _) => {
                decoded.push(byte);
                i += 1;
            }
        }
    }
    decoded == b"password"
}

/// Skip one keyword value (quoted or bare), returning what follows it
fn skip_value(value: &str) -> &str {
    if let Some(quoted) = value.strip_prefix('\'') {
        let mut escaped = false;
        for (i, c) in quoted.char_indices() {
            match c {
                '\\' if !escaped => escaped = true,
                '\'' if !escaped => return &quoted[i + 1..],
                _ => escaped = false,
            }
        }
        ""
    } else {
        value
            .find(char::is_whitespace)
            .map_or("", |end| &value[end..])
    }
}

/// Zero or one native connection resources
///
/// The handle is moved between the driver and the policy hooks; it is never
/// cloned or shared. Dropping a handle releases whatever it holds.
pub enum ConnectionHandle<T> {
    /// No resource
    Empty,
    /// A connect attempt is in flight
    Connecting(PendingConnect<T>),
    /// Established, usable connection
    Connected(T),
}

impl<T> ConnectionHandle<T> {
    /// No resource is held
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// A resource exists (usable or not)
    pub fn is_bound(&self) -> bool {
        !self.is_empty()
    }

    /// A connect attempt is in flight
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }

    /// The handle holds a usable connection
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Borrow the established connection, if any
    pub fn as_connected(&self) -> Option<&T> {
        match self {
            Self::Connected(conn) => Some(conn),
            _ => None,
        }
    }

    /// Mutably borrow the established connection, if any
    pub fn as_connected_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Connected(conn) => Some(conn),
            _ => None,
        }
    }

    /// Short lowercase name of the variant, for logs and errors
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Connecting(_) => "connecting",
            Self::Connected(_) => "connected",
        }
    }

    /// Release the held resource (cancelling an in-flight attempt) and return an empty handle
    pub fn release(self) -> Self {
        match self {
            Self::Empty => {}
            Self::Connecting(pending) => {
                tracing::debug!("cancelling in-flight connect attempt");
                pending.cancel();
            }
            Self::Connected(conn) => {
                tracing::debug!("releasing established connection");
                drop(conn);
            }
        }
        Self::Empty
    }
}

impl<T> Default for ConnectionHandle<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T> fmt::Debug for ConnectionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionHandle::{}", self.describe())
    }
}

/// The underlying connect call a policy schedules
///
/// Implementations open the native resource; dropping the returned
/// connection must release it.
pub trait Connector: Send + Sync + 'static {
    /// Established connection type
    type Conn: Send + 'static;

    /// Cheap synchronous check of the options, run before any I/O.
    ///
    /// Errors here are "immediate setup failures": nothing was opened.
    fn validate(&self, _options: &ConnectionOptions) -> Result<()> {
        Ok(())
    }

    /// Open and fully establish a connection
    fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// Lifecycle hooks controlling when a connection is established
///
/// `start` and `complete` are fallible and return
/// [`Error::ConnectFailure`](crate::Error::ConnectFailure) on failure.
/// `drop_connection` and `is_ready` have no error channel: whatever goes
/// wrong inside them is logged and swallowed.
pub trait ConnectionPolicy: Send {
    /// Connection type held by the handle
    type Conn: Send + 'static;

    /// Policy name used in logs and metric labels
    const NAME: &'static str;

    /// Options this policy was created with
    fn options(&self) -> &ConnectionOptions;

    /// Begin establishing a connection. Default: defer (return the handle unchanged).
    fn start(
        &mut self,
        handle: ConnectionHandle<Self::Conn>,
    ) -> impl Future<Output = Result<ConnectionHandle<Self::Conn>>> + Send {
        async move { Ok(handle) }
    }

    /// Finish establishing a connection. Default: pass-through.
    fn complete(
        &mut self,
        handle: ConnectionHandle<Self::Conn>,
    ) -> impl Future<Output = Result<ConnectionHandle<Self::Conn>>> + Send {
        async move { Ok(handle) }
    }

    /// Release any resource held by `handle`. Idempotent; never fails.
    fn drop_connection(
        &mut self,
        handle: ConnectionHandle<Self::Conn>,
    ) -> ConnectionHandle<Self::Conn> {
        handle.release()
    }

    /// The caller stopped awaiting `complete` before it returned.
    ///
    /// The in-flight handle was dropped with the cancelled future, so
    /// whatever it held is already released. Clear any per-attempt
    /// bookkeeping. Default: nothing to clear.
    fn abandon_attempt(&mut self) {}

    /// Whether `complete` would return without waiting
    fn is_ready(&self, _handle: &ConnectionHandle<Self::Conn>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_roundtrip_unmodified() {
        let opts = ConnectionOptions::new("host=db port=5433  dbname=app");
        assert_eq!(opts.as_str(), "host=db port=5433  dbname=app");
        assert!(!opts.is_empty());
        assert!(ConnectionOptions::new("   ").is_empty());
    }

    #[test]
    fn test_options_debug_redacts_password() {
        let opts = ConnectionOptions::new("host=db password=hunter2 dbname=app");
        let debug = format!("{:?}", opts);
        assert!(debug.contains("password=***"));
        assert!(debug.contains("dbname=app"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_options_redacts_quoted_password() {
        let opts = ConnectionOptions::new(r"password = 'it\'s secret' user=bob");
        let shown = opts.to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.ends_with(" user=bob"));
    }

    #[test]
    fn test_options_redacts_uri_password() {
        let opts = ConnectionOptions::new("postgres://bob:hunter2@db:5432/app");
        assert_eq!(opts.redacted(), "postgres://bob:***@db:5432/app");

        let no_password = ConnectionOptions::new("postgres://bob@db/app");
        assert_eq!(no_password.redacted(), "postgres://bob@db/app");
    }

    #[test]
    fn test_options_redacts_uri_query_password() {
        let opts = ConnectionOptions::new("postgres://db/app?password=hunter2");
        let shown = format!("{:?} / {}", opts, opts);
        assert!(!shown.contains("hunter2"), "{}", shown);
        assert_eq!(opts.redacted(), "postgres://db/app?password=***");

        let both = ConnectionOptions::new(
            "postgresql://bob:hunter2@db/app?sslmode=require&password=hunter3&application_name=x",
        );
        assert_eq!(
            both.redacted(),
            "postgresql://bob:***@db/app?sslmode=require&password=***&application_name=x"
        );

        let encoded = ConnectionOptions::new("postgres://db/app?pass%77ord=hunter2");
        assert_eq!(encoded.redacted(), "postgres://db/app?pass%77ord=***");

        let untouched = ConnectionOptions::new("postgres://db/app?sslmode=disable");
        assert_eq!(untouched.redacted(), "postgres://db/app?sslmode=disable");
    }

    #[test]
    fn test_empty_handle_predicates() {
        let handle: ConnectionHandle<u32> = ConnectionHandle::default();
        assert!(handle.is_empty());
        assert!(!handle.is_bound());
        assert!(!handle.is_connected());
        assert_eq!(handle.describe(), "empty");
    }

    #[test]
    fn test_connected_handle_access() {
        let mut handle = ConnectionHandle::Connected(7u32);
        assert!(handle.is_bound());
        assert_eq!(handle.as_connected(), Some(&7));
        *handle.as_connected_mut().unwrap() = 8;
        assert_eq!(format!("{:?}", handle), "ConnectionHandle::connected");
        assert!(handle.release().is_empty());
    }

    #[test]
    fn test_release_drops_connection() {
        let ledger = testing::Ledger::default();
        let handle = ConnectionHandle::Connected(ledger.open());
        assert_eq!(ledger.open_count(), 1);
        let handle = handle.release();
        assert!(handle.is_empty());
        assert_eq!(ledger.open_count(), 0);
        // Releasing again is a no-op
        assert!(handle.release().is_empty());
    }
}
