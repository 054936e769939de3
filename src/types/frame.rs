//! Camera frame type carried by the frame transport

use std::sync::Arc;

/// Encoded camera frame travelling from the edge to the vision server
///
/// This is the fundamental unit of the frame path. The payload is opaque
/// (typically a JPEG) and shared zero-copy via `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Session epoch of the frame transport that produced this frame
    pub epoch: u32,

    /// Sequence number, monotonically increasing within the epoch
    pub seq: u64,

    /// Capture time in microseconds since the UNIX epoch (edge clock)
    pub captured_at_us: u64,

    /// Encoded image bytes
    pub payload: Arc<[u8]>,
}

impl Frame {
    /// Create a new frame
    pub fn new(epoch: u32, seq: u64, captured_at_us: u64, payload: Vec<u8>) -> Self {
        Self { epoch, seq, captured_at_us, payload: payload.into() }
    }

    /// Length of the encoded payload in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Raw output of the camera collaborator before it is stamped into a [`Frame`]
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    /// Encoded image bytes
    pub payload: Vec<u8>,

    /// Capture time in microseconds since the UNIX epoch
    pub captured_at_us: u64,
}

impl CapturedImage {
    /// Create a captured image stamped with the current wall-clock time
    pub fn now(payload: Vec<u8>) -> Self {
        Self { payload, captured_at_us: super::unix_micros() }
    }
}
