//! TCP command transport
//!
//! The vision server listens and the edge connects. Every accepted connection
//! is a new session epoch, announced with `Hello`. Commands are never dropped
//! silently on the server side; a failed write ends the session and the edge
//! reconnects with backoff. On the edge, a new session always starts from an
//! empty command register so nothing decided on an older link can be applied.

mod client;
mod server;

pub use client::{CommandClient, CommandLink};
pub use server::{CommandServer, CommandSession};
