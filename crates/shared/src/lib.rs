//! Shared wire types and errors for the shiftwire realtime client.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
