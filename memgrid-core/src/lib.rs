//! Core types for the memgrid cluster client: the framed binary protocol
//! and the shared error taxonomy.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;

pub use error::{GridError, RemoteError, Result, StackTraceElement};
pub use protocol::{ClientMessage, ClientMessageCodec, Frame};
