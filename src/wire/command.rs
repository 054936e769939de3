//! Command stream framing
//!
//! Every message on the command link is length-prefixed:
//!
//! ```text
//! u32 LE  length of (type + body)
//! u8      message type
//! ...     body
//! ```
//!
//! | type | message   | body                                                        |
//! |------|-----------|-------------------------------------------------------------|
//! | 0x01 | Hello     | epoch u32                                                   |
//! | 0x02 | Command   | seq u64, frame epoch u32, issued µs u64, velocity f32, steering f32 |
//! | 0x03 | Heartbeat | sent µs u64                                                 |
//! | 0x04 | Status    | mode u8, velocity f32, steering f32, reported µs u64        |
//! | 0x05 | Shutdown  | (empty)                                                     |
//!
//! Unknown message types are skipped so that newer peers can add messages.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::types::{Command, Mode, StatusReport};
use crate::{LinkError, Result};

/// Upper bound on a single message, including the type byte
pub const MAX_MESSAGE_LEN: usize = 1024;

const TYPE_HELLO: u8 = 0x01;
const TYPE_COMMAND: u8 = 0x02;
const TYPE_HEARTBEAT: u8 = 0x03;
const TYPE_STATUS: u8 = 0x04;
const TYPE_SHUTDOWN: u8 = 0x05;

const COMMAND_BODY_LEN: usize = 28;
const STATUS_BODY_LEN: usize = 17;

/// A message on the command link
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    /// First message of every connection, server → edge
    Hello { epoch: u32 },
    /// Autonomous command, server → edge
    Command(Command),
    /// Liveness signal while no command is pending, server → edge
    Heartbeat { sent_at_us: u64 },
    /// Edge control state report, edge → server
    Status(StatusReport),
    /// Server is ending the session, server → edge
    Shutdown,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Command(_) => "command",
            Message::Heartbeat { .. } => "heartbeat",
            Message::Status(_) => "status",
            Message::Shutdown => "shutdown",
        }
    }
}

/// Length-prefixed codec for [`Message`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCodec;

impl Decoder for CommandCodec {
    type Item = Message;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }

            let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len == 0 || len > MAX_MESSAGE_LEN {
                return Err(LinkError::codec(
                    "command stream",
                    format!("message length {len} outside 1..={MAX_MESSAGE_LEN}"),
                ));
            }

            if src.len() < 4 + len {
                src.reserve(4 + len - src.len());
                return Ok(None);
            }

            src.advance(4);
            let mut body = src.split_to(len);
            let kind = body.get_u8();

            match decode_body(kind, &mut body)? {
                Some(message) => return Ok(Some(message)),
                None => {
                    trace!(kind, "Skipping unknown command stream message");
                    continue;
                }
            }
        }
    }
}

fn decode_body(kind: u8, body: &mut BytesMut) -> Result<Option<Message>> {
    let message = match kind {
        TYPE_HELLO => {
            expect_len(kind, body.len(), 4)?;
            Message::Hello { epoch: body.get_u32_le() }
        }
        TYPE_COMMAND => {
            expect_len(kind, body.len(), COMMAND_BODY_LEN)?;
            Message::Command(Command {
                seq: body.get_u64_le(),
                frame_epoch: body.get_u32_le(),
                issued_at_us: body.get_u64_le(),
                velocity: body.get_f32_le(),
                steering: body.get_f32_le(),
            })
        }
        TYPE_HEARTBEAT => {
            expect_len(kind, body.len(), 8)?;
            Message::Heartbeat { sent_at_us: body.get_u64_le() }
        }
        TYPE_STATUS => {
            expect_len(kind, body.len(), STATUS_BODY_LEN)?;
            Message::Status(StatusReport {
                mode: Mode::from_u8(body.get_u8()),
                velocity: body.get_f32_le(),
                steering: body.get_f32_le(),
                reported_at_us: body.get_u64_le(),
            })
        }
        TYPE_SHUTDOWN => {
            expect_len(kind, body.len(), 0)?;
            Message::Shutdown
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

fn expect_len(kind: u8, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        return Ok(());
    }
    Err(LinkError::codec(
        "command stream",
        format!("message type {kind:#04x} expects {expected} body bytes, got {actual}"),
    ))
}

impl Encoder<Message> for CommandCodec {
    type Error = LinkError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let body_len = match message {
            Message::Hello { .. } => 4,
            Message::Command(_) => COMMAND_BODY_LEN,
            Message::Heartbeat { .. } => 8,
            Message::Status(_) => STATUS_BODY_LEN,
            Message::Shutdown => 0,
        };

        dst.reserve(4 + 1 + body_len);
        dst.put_u32_le((1 + body_len) as u32);

        match message {
            Message::Hello { epoch } => {
                dst.put_u8(TYPE_HELLO);
                dst.put_u32_le(epoch);
            }
            Message::Command(command) => {
                dst.put_u8(TYPE_COMMAND);
                dst.put_u64_le(command.seq);
                dst.put_u32_le(command.frame_epoch);
                dst.put_u64_le(command.issued_at_us);
                dst.put_f32_le(command.velocity);
                dst.put_f32_le(command.steering);
            }
            Message::Heartbeat { sent_at_us } => {
                dst.put_u8(TYPE_HEARTBEAT);
                dst.put_u64_le(sent_at_us);
            }
            Message::Status(report) => {
                dst.put_u8(TYPE_STATUS);
                dst.put_u8(report.mode.to_u8());
                dst.put_f32_le(report.velocity);
                dst.put_f32_le(report.steering);
                dst.put_u64_le(report.reported_at_us);
            }
            Message::Shutdown => dst.put_u8(TYPE_SHUTDOWN),
        }
        Ok(())
    }
}
