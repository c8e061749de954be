//! fraiseql-connect: connection-establishment policies for Postgres clients
//!
//! This crate decides *when* the real network connect to a backend happens,
//! independent of how the connection is used afterwards. A
//! [`ManagedConnection`] owns exactly one connection resource and drives a
//! [`ConnectionPolicy`] through its lifecycle hooks:
//!
//! * [`DirectPolicy`]: connect during construction, fail early
//! * [`LazyPolicy`]: defer the connect until first use
//! * [`AsyncPolicy`]: start connecting in the background, complete on demand
//! * [`NullPolicy`]: never connect; exercises failure paths deterministically
//!
//! ```no_run
//! # async fn example() -> fraiseql_connect::Result<()> {
//! use fraiseql_connect::{AsyncPolicy, ManagedConnection};
//!
//! let mut conn = ManagedConnection::new(AsyncPolicy::new("host=localhost dbname=app")).await?;
//!
//! // ... do other work while the handshake is in flight ...
//!
//! let pg = conn.activate().await?;
//! println!("backend pid: {:?}", pg.process_id());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod backend;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod protocol;

pub use backend::{ConnectionConfig, PgConnection, PgConnector, SslMode};
pub use connection::{
    AsyncConnection, ConnectionState, DirectConnection, LazyConnection, ManagedConnection,
    NullConnection,
};
pub use error::{Error, Result};
pub use policy::{
    AsyncPolicy, ConnectionHandle, ConnectionOptions, ConnectionPolicy, Connector, DirectPolicy,
    LazyPolicy, NullPolicy, PendingConnect,
};
