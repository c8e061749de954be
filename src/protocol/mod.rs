//! Postgres wire protocol, startup phase only
//!
//! Covers everything exchanged between opening the socket and the first
//! `ReadyForQuery`: SSL negotiation, the startup packet, authentication,
//! session parameters and backend key data.

pub mod constants;
mod decode;
mod encode;
mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage};
