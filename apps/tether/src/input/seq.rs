use crate::input::FrameMeta;

/// Per-tab input sequence counter.
///
/// Starts at 0 and is reset when a new session starts, never on reconnect
/// of the same session. Sequence numbers transmitted for a session strictly
/// increase by 1 with no gaps as long as callers let the counter assign.
#[derive(Debug, Default)]
pub struct SeqCounter {
    next: u64,
}

impl SeqCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a sequence number to `meta`, returning it.
    ///
    /// An explicit `meta.seq` is honored as-is and the internal counter is
    /// NOT advanced to match. Mixing explicit overrides with automatic
    /// assignment can therefore collide or go out of order; callers own
    /// that risk.
    pub fn assign(&mut self, meta: &mut FrameMeta) -> u64 {
        if let Some(seq) = meta.seq {
            return seq;
        }
        let seq = self.next;
        self.next += 1;
        meta.seq = Some(seq);
        seq
    }

    /// Reset for a freshly started session.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Next value the counter would assign; diagnostics only.
    pub fn peek(&self) -> u64 {
        self.next
    }
}
