//! Frame datagram encoding
//!
//! ```text
//! offset  size  field
//! 0       4     magic "RVFR"
//! 4       1     protocol version
//! 5       4     session epoch          (u32 LE)
//! 9       8     sequence number        (u64 LE)
//! 17      8     capture timestamp, µs  (u64 LE)
//! 25      4     payload length         (u32 LE)
//! 29      n     payload
//! ```

use crate::types::Frame;
use crate::{LinkError, Result};

/// Datagram magic
pub const FRAME_MAGIC: [u8; 4] = *b"RVFR";

/// Frame datagram protocol version
pub const FRAME_VERSION: u8 = 1;

/// Size of the fixed frame header
pub const FRAME_HEADER_LEN: usize = 29;

/// Encode `frame` into `out`, replacing its contents
pub fn encode_frame(frame: &Frame, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(FRAME_HEADER_LEN + frame.payload_len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&frame.epoch.to_le_bytes());
    out.extend_from_slice(&frame.seq.to_le_bytes());
    out.extend_from_slice(&frame.captured_at_us.to_le_bytes());
    out.extend_from_slice(&(frame.payload_len() as u32).to_le_bytes());
    out.extend_from_slice(&frame.payload);
}

/// Decode a single datagram
///
/// The payload length field must match the bytes that follow the header
/// exactly; a truncated datagram is rejected rather than partially decoded.
pub fn decode_frame(datagram: &[u8]) -> Result<Frame> {
    if datagram.len() < FRAME_HEADER_LEN {
        return Err(LinkError::codec(
            "frame datagram",
            format!("{} bytes is shorter than the {FRAME_HEADER_LEN}-byte header", datagram.len()),
        ));
    }
    if datagram[0..4] != FRAME_MAGIC {
        return Err(LinkError::codec("frame datagram", "bad magic"));
    }
    if datagram[4] != FRAME_VERSION {
        return Err(LinkError::codec(
            "frame datagram",
            format!("unsupported version {} (expected {FRAME_VERSION})", datagram[4]),
        ));
    }

    let epoch = u32::from_le_bytes([datagram[5], datagram[6], datagram[7], datagram[8]]);
    let seq = read_u64(&datagram[9..17]);
    let captured_at_us = read_u64(&datagram[17..25]);
    let payload_len =
        u32::from_le_bytes([datagram[25], datagram[26], datagram[27], datagram[28]]) as usize;

    let payload = &datagram[FRAME_HEADER_LEN..];
    if payload.len() != payload_len {
        return Err(LinkError::codec(
            "frame datagram",
            format!("payload length field says {payload_len}, datagram carries {}", payload.len()),
        ));
    }

    Ok(Frame::new(epoch, seq, captured_at_us, payload.to_vec()))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Frame {
        Frame::new(0x0102_0304, 42, 1_700_000_000_000_000, vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    #[test]
    fn header_layout_is_stable() {
        let mut out = Vec::new();
        encode_frame(&sample(), &mut out);

        assert_eq!(out.len(), FRAME_HEADER_LEN + 4);
        assert_eq!(&out[0..4], b"RVFR");
        assert_eq!(out[4], 1);
        assert_eq!(&out[5..9], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(out[9], 42);
        assert_eq!(&out[25..29], &[4, 0, 0, 0]);
        assert_eq!(&out[29..], &[0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[test]
    fn decode_restores_frame() {
        let mut out = Vec::new();
        encode_frame(&sample(), &mut out);
        assert_eq!(decode_frame(&out).unwrap(), sample());
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        let mut out = Vec::new();
        encode_frame(&sample(), &mut out);
        out.pop();
        assert!(matches!(decode_frame(&out), Err(LinkError::Codec { .. })));
        assert!(decode_frame(&out[..10]).is_err());
    }

    #[test]
    fn foreign_traffic_is_rejected() {
        let mut out = Vec::new();
        encode_frame(&sample(), &mut out);
        out[0] = b'X';
        assert!(decode_frame(&out).is_err());

        encode_frame(&sample(), &mut out);
        out[4] = 9;
        let err = decode_frame(&out).unwrap_err();
        assert!(err.to_string().contains("frame datagram"));
    }

    #[test]
    fn encode_reuses_buffer() {
        let mut out = vec![1, 2, 3];
        encode_frame(&Frame::new(1, 1, 1, Vec::new()), &mut out);
        assert_eq!(out.len(), FRAME_HEADER_LEN);
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = decode_frame(&bytes);
        }
    }
}
