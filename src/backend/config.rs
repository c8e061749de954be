//! Options-string parsing
//!
//! Supports formats:
//! * `host=localhost port=5432 dbname=app user=app password='s3 cr\'et'`
//! * `postgres://[user[:password]@][host][:port][/dbname][?key=value&...]`
//! * `postgres:///dbname?host=/path/to/socket/dir` (Unix socket)
//!
//! An empty string means "all defaults".

use super::tls::SslMode;
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default server port
pub const DEFAULT_PORT: u16 = 5432;

/// Socket directories probed, in order, when no host is given
const DEFAULT_SOCKET_DIRS: &[&str] = &["/run/postgresql", "/var/run/postgresql", "/tmp"];

/// Keywords accepted in either syntax
const KEYWORDS: &[&str] = &[
    "host",
    "port",
    "dbname",
    "user",
    "password",
    "sslmode",
    "sslrootcert",
    "sslcert",
    "sslkey",
    "connect_timeout",
    "application_name",
    "options",
    "client_encoding",
];

/// Where to reach the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    /// TCP host name or address
    Tcp(String),
    /// Directory containing the server's Unix socket
    Unix(PathBuf),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Tcp(host) => f.write_str(host),
            Host::Unix(dir) => write!(f, "{}", dir.display()),
        }
    }
}

/// Parsed connection options
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host or socket directory
    pub host: Host,
    /// Server port (also selects the socket file name)
    pub port: u16,
    /// Database name (default: the user name)
    pub dbname: String,
    /// Role name (default: the OS user)
    pub user: String,
    /// Password, if the server asks for one
    pub password: Option<String>,
    /// TLS negotiation mode; ignored for Unix sockets
    pub sslmode: SslMode,
    /// CA bundle for `verify-ca` / `verify-full`
    pub sslrootcert: Option<PathBuf>,
    /// Client certificate
    pub sslcert: Option<PathBuf>,
    /// Client private key
    pub sslkey: Option<PathBuf>,
    /// Bound on the whole connect, handshake included
    pub connect_timeout: Option<Duration>,
    /// Reported in `pg_stat_activity`
    pub application_name: Option<String>,
    /// Command-line options sent to the backend (`-c name=value ...`)
    pub options: Option<String>,
    /// Client-side character set
    pub client_encoding: Option<String>,
}

impl ConnectionConfig {
    /// Parse a keyword/value string or a `postgres://` URI
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let pairs = match s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
        {
            Some(rest) => parse_uri(rest)?,
            None => parse_keywords(s)?,
        };
        Self::from_pairs(pairs)
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self> {
        let mut host = None;
        let mut port = None;
        let mut dbname = None;
        let mut user = None;
        let mut config = Self {
            host: Host::Tcp(String::new()),
            port: DEFAULT_PORT,
            dbname: String::new(),
            user: String::new(),
            password: None,
            sslmode: SslMode::default(),
            sslrootcert: None,
            sslcert: None,
            sslkey: None,
            connect_timeout: None,
            application_name: None,
            options: None,
            client_encoding: None,
        };

        // Later occurrences override earlier ones; empty values mean "unset"
        for (key, value) in pairs {
            if !KEYWORDS.contains(&key.as_str()) {
                return Err(Error::Config(format!("invalid connection option \"{}\"", key)));
            }
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "host" => host = Some(value),
                "port" => port = Some(value),
                "dbname" => dbname = Some(value),
                "user" => user = Some(value),
                "password" => config.password = Some(value),
                "sslmode" => config.sslmode = value.parse()?,
                "sslrootcert" => config.sslrootcert = Some(PathBuf::from(value)),
                "sslcert" => config.sslcert = Some(PathBuf::from(value)),
                "sslkey" => config.sslkey = Some(PathBuf::from(value)),
                "connect_timeout" => config.connect_timeout = parse_timeout(&value)?,
                "application_name" => config.application_name = Some(value),
                "options" => config.options = Some(value),
                "client_encoding" => config.client_encoding = Some(value),
                _ => {}
            }
        }

        if let Some(port) = port {
            config.port = port
                .parse::<u16>()
                .ok()
                .filter(|&p| p != 0)
                .ok_or_else(|| Error::Config(format!("invalid port number: \"{}\"", port)))?;
        }

        if host.as_deref().is_some_and(|h| h.contains(',')) {
            return Err(Error::Config("multiple hosts are not supported".into()));
        }
        config.host = match host {
            Some(h) if h.starts_with('/') => Host::Unix(PathBuf::from(h)),
            Some(h) => Host::Tcp(h),
            None => default_host(),
        };

        config.user = match user {
            Some(user) => user,
            None => whoami::username(),
        };
        config.dbname = dbname.unwrap_or_else(|| config.user.clone());

        Ok(config)
    }

    /// Unix socket file, for socket-directory hosts
    pub fn socket_path(&self) -> Option<PathBuf> {
        match &self.host {
            Host::Unix(dir) => Some(socket_path(dir, self.port)),
            Host::Tcp(_) => None,
        }
    }

    /// Whether TLS will be attempted for this destination
    pub fn uses_tls(&self) -> bool {
        matches!(self.host, Host::Tcp(_)) && self.sslmode.requests_tls()
    }

    /// Parameters for the startup packet
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.dbname.clone()),
        ];
        let optional = [
            ("application_name", &self.application_name),
            ("client_encoding", &self.client_encoding),
            ("options", &self.options),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                params.push((name.to_string(), value.clone()));
            }
        }
        params
    }
}

impl FromStr for ConnectionConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("sslmode", &self.sslmode)
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .finish_non_exhaustive()
    }
}

fn socket_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!(".s.PGSQL.{}", port))
}

fn default_host() -> Host {
    DEFAULT_SOCKET_DIRS
        .iter()
        .map(Path::new)
        .find(|dir| dir.is_dir())
        .map(|dir| Host::Unix(dir.to_path_buf()))
        .unwrap_or_else(|| Host::Tcp("localhost".into()))
}

/// Seconds; zero or negative waits forever; anything shorter than 2s is raised to 2s
fn parse_timeout(value: &str) -> Result<Option<Duration>> {
    let secs: i64 = value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "invalid integer value \"{}\" for connection option \"connect_timeout\"",
            value
        ))
    })?;
    if secs <= 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs(secs.max(2) as u64)))
}

/// `key = value` pairs separated by whitespace
fn parse_keywords(s: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next_if_eq(&'=').is_none() {
            return Err(Error::Config(format!(
                "missing \"=\" after \"{}\" in connection info string",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(c) = chars.next() {
                            value.push(c);
                        }
                    }
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::Config(
                            "unterminated quoted string in connection info string".into(),
                        ))
                    }
                }
            }
            pairs.push((key, value));
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
            pairs.push((key, value));
        }
    }

    Ok(pairs)
}

/// Everything after `postgres://`
fn parse_uri(rest: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };
    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let hostport = match authority.rsplit_once('@') {
        Some((userinfo, hostport)) => {
            let (user, password) = match userinfo.split_once(':') {
                Some((user, password)) => (user, Some(password)),
                None => (userinfo, None),
            };
            pairs.push(("user".to_string(), percent_decode(user)?));
            if let Some(password) = password {
                pairs.push(("password".to_string(), percent_decode(password)?));
            }
            hostport
        }
        None => authority,
    };

    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        // IPv6 literal
        let (host, after) = bracketed.split_once(']').ok_or_else(|| {
            Error::Config(format!("missing \"]\" in IPv6 host address in URI: \"{}\"", hostport))
        })?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':').ok_or_else(|| {
                Error::Config(format!("unexpected \"{}\" after IPv6 host address", after))
            })?),
        };
        (host, port)
    } else {
        match hostport.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };
    if !host.is_empty() {
        pairs.push(("host".to_string(), percent_decode(host)?));
    }
    if let Some(port) = port {
        pairs.push(("port".to_string(), percent_decode(port)?));
    }

    if let Some(path) = path.filter(|p| !p.is_empty()) {
        pairs.push(("dbname".to_string(), percent_decode(path)?));
    }

    for param in query.into_iter().flat_map(|q| q.split('&')) {
        if param.is_empty() {
            continue;
        }
        let (key, value) = param.split_once('=').ok_or_else(|| {
            Error::Config(format!(
                "missing key/value separator \"=\" in URI query parameter: \"{}\"",
                param
            ))
        })?;
        let key = percent_decode(key)?;
        let value = percent_decode(value)?;
        // `ssl=true` is the JDBC spelling of sslmode=require
        if key == "ssl" && value == "true" {
            pairs.push(("sslmode".to_string(), "require".to_string()));
        } else {
            pairs.push((key, value));
        }
    }

    Ok(pairs)
}

fn percent_decode(s: &str) -> Result<String> {
    let invalid = || Error::Config(format!("invalid percent-encoded token: \"{}\"", s));

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).ok_or_else(invalid)?;
            let hex = std::str::from_utf8(hex).map_err(|_| invalid())?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| invalid())?;
            if byte == 0 {
                return Err(Error::Config(format!(
                    "forbidden value %00 in percent-encoded value: \"{}\"",
                    s
                )));
            }
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| invalid())
}
