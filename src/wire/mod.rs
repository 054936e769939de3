//! Wire formats for the two transports.
//!
//! - [`frame`]: self-contained UDP datagrams carrying one camera frame each
//! - [`command`]: length-prefixed messages on the TCP command link
//!
//! All integers and floats are little endian.

pub mod command;
pub mod frame;

pub use command::{CommandCodec, MAX_MESSAGE_LEN, Message};
pub use frame::{FRAME_HEADER_LEN, FRAME_MAGIC, FRAME_VERSION, decode_frame, encode_frame};
