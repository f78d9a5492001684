//! Input-side types: logical frames, sequence assignment, keystroke
//! coalescing, and the pending-write queue.

mod coalescer;
mod queue;
mod seq;

pub use coalescer::{Batch, FlushReason, InputCoalescer};
pub use queue::{PendingWriteQueue, QueueStats};
pub use seq::SeqCounter;

/// One logical unit of input queued for transmission. A frame survives a
/// failed send attempt unchanged; requeueing does not create a new frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub value: String,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMeta {
    /// Assigned sequence number. `Some` before assignment means the caller
    /// supplied an explicit override (see [`SeqCounter::assign`]).
    pub seq: Option<u64>,
    /// How many keystroke events were coalesced into this frame.
    pub batch_size: usize,
    pub append_newline: bool,
    pub event_type: Option<String>,
    pub source: Option<String>,
}

impl Frame {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            meta: FrameMeta::default(),
        }
    }

    /// The payload as it goes on the wire: newline appended when requested
    /// and not already present. `None` means the frame normalizes to
    /// nothing and must not be transmitted (treated as success upstream).
    pub fn normalized_payload(&self) -> Option<String> {
        let mut payload = self.value.clone();
        if self.meta.append_newline && !payload.ends_with('\n') {
            payload.push('\n');
        }
        if payload.is_empty() { None } else { Some(payload) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_appends_missing_newline() {
        let mut frame = Frame::new("ls");
        frame.meta.append_newline = true;
        assert_eq!(frame.normalized_payload().unwrap(), "ls\n");
    }

    #[test]
    fn normalization_keeps_existing_newline() {
        let mut frame = Frame::new("ls\n");
        frame.meta.append_newline = true;
        assert_eq!(frame.normalized_payload().unwrap(), "ls\n");
    }

    #[test]
    fn empty_frame_normalizes_to_none() {
        assert_eq!(Frame::new("").normalized_payload(), None);
    }

    #[test]
    fn empty_frame_with_newline_request_sends_newline() {
        let mut frame = Frame::new("");
        frame.meta.append_newline = true;
        assert_eq!(frame.normalized_payload().unwrap(), "\n");
    }
}
