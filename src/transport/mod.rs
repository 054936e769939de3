//! Network transports between the edge and the vision server

pub mod backoff;
pub mod command;
pub mod frame;

pub use backoff::Backoff;
pub use command::{CommandClient, CommandLink, CommandServer, CommandSession};
pub use frame::{DropReason, FrameReceiver, FrameSender, FrameStats, SendOutcome};
