//! Metric label keys and values

/// Label key for the connection policy name
pub const POLICY: &str = "policy";

/// Label key for the lifecycle state a connection was dropped in
pub const STATE: &str = "state";

/// Label key for the authentication mechanism
pub const MECHANISM: &str = "mechanism";

/// Label key for a failure reason
pub const REASON: &str = "reason";

/// No password exchange (trust / peer)
pub const MECHANISM_TRUST: &str = "trust";

/// Cleartext password
pub const MECHANISM_CLEARTEXT: &str = "cleartext";

/// MD5-hashed password
pub const MECHANISM_MD5: &str = "md5";

/// SCRAM-SHA-256
pub const MECHANISM_SCRAM: &str = "scram-sha-256";
