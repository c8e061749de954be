//! Password authentication helpers
//!
//! * SCRAM-SHA-256 (Postgres 10+ default)
//! * MD5 (legacy `md5` in pg_hba.conf)

mod md5;
pub mod scram;

pub use self::md5::md5_password;
pub use scram::{ScramClient, ScramError, ScramState};
