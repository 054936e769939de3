//! Sequence gating for session-scoped streams
//!
//! Frames and commands carry `(epoch, seq)`. Within an epoch, sequence numbers
//! only move forward; anything at or below the highest accepted number is a
//! duplicate or a network reordering and is discarded. A newer epoch starts a
//! new session and an older epoch is never accepted again.

/// Outcome of offering a sequence number to a [`SequenceGate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Next item in the current epoch
    Accepted,
    /// First item of a new epoch; the gate has moved to it
    NewEpoch,
    /// Same sequence number as the highest accepted
    Duplicate,
    /// Lower sequence number than the highest accepted
    Reordered,
    /// Tagged with an epoch older than the current one
    StaleEpoch,
}

impl Admission {
    /// True if the item should be processed
    pub fn is_accepted(self) -> bool {
        matches!(self, Admission::Accepted | Admission::NewEpoch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Admission::Accepted => "accepted",
            Admission::NewEpoch => "new_epoch",
            Admission::Duplicate => "duplicate",
            Admission::Reordered => "reordered",
            Admission::StaleEpoch => "stale_epoch",
        }
    }
}

/// Tracks the current epoch and the highest accepted sequence number in it
#[derive(Debug, Clone, Default)]
pub struct SequenceGate {
    epoch: Option<u32>,
    highest: Option<u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch, if the gate has seen one since the last reset
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Highest accepted sequence number in the current epoch
    pub fn highest(&self) -> Option<u64> {
        self.highest
    }

    /// Offer `(epoch, seq)`; accepted items advance the gate
    pub fn admit(&mut self, epoch: u32, seq: u64) -> Admission {
        match self.epoch {
            None => {
                self.enter(epoch, seq);
                Admission::NewEpoch
            }
            Some(current) if epoch < current => Admission::StaleEpoch,
            Some(current) if epoch > current => {
                self.enter(epoch, seq);
                Admission::NewEpoch
            }
            Some(_) => match self.highest {
                Some(highest) if seq == highest => Admission::Duplicate,
                Some(highest) if seq < highest => Admission::Reordered,
                _ => {
                    self.highest = Some(seq);
                    Admission::Accepted
                }
            },
        }
    }

    /// Forget the current epoch; the next offer of any epoch starts a session
    pub fn reset(&mut self) {
        self.epoch = None;
        self.highest = None;
    }

    fn enter(&mut self, epoch: u32, seq: u64) {
        self.epoch = Some(epoch);
        self.highest = Some(seq);
    }
}
