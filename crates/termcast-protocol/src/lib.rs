//! Termcast Protocol - Wire protocol for daemon communication
//!
//! This crate provides the message types exchanged between viewers (or the
//! orchestrating caller) and the termcast daemon over a persistent
//! message-oriented connection: newline-delimited JSON, one message per line.

pub mod message;
pub mod version;

pub use message::{ClientRequest, Request, ServerMessage};
pub use version::ProtocolVersion;
