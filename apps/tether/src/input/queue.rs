use std::collections::VecDeque;

use tracing::trace;

use crate::input::Frame;

/// Diagnostics counters for the pending-write queue. Not correctness
/// bearing; surfaced through debug logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    pub batches: u64,
    pub sent: u64,
    pub last_batch_size: usize,
}

/// FIFO of frames that could not be transmitted yet.
///
/// Frames wait here while the socket is not open, and every outgoing frame
/// routes through a flush so that a frame which fails mid-flight is retried
/// before anything newer. Global send order is the enqueue order.
#[derive(Debug, Default)]
pub struct PendingWriteQueue {
    frames: VecDeque<Frame>,
    stats: QueueStats,
}

impl PendingWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, frame: Frame) {
        self.stats.queued += 1;
        self.frames.push_back(frame);
    }

    /// Drain the queue and attempt each frame in order via `send`.
    ///
    /// No-op unless `socket_open`. The queue is spliced out atomically; a
    /// frame whose send fails is reinserted at the FRONT together with the
    /// untouched remainder behind it, so a later flush retries it before
    /// any frame enqueued after the failure. Returns how many frames were
    /// sent.
    pub fn flush<F>(&mut self, socket_open: bool, mut send: F) -> usize
    where
        F: FnMut(&Frame) -> bool,
    {
        if !socket_open || self.frames.is_empty() {
            return 0;
        }

        let mut draining: VecDeque<Frame> = std::mem::take(&mut self.frames);
        self.stats.batches += 1;
        self.stats.last_batch_size = draining.len();

        let mut sent = 0;
        while let Some(frame) = draining.pop_front() {
            if send(&frame) {
                self.stats.sent += 1;
                sent += 1;
            } else {
                trace!(
                    target: "tether::input",
                    remaining = draining.len() + 1,
                    "send failed mid-flush, requeueing at front"
                );
                draining.push_front(frame);
                // Anything enqueued while sending stays behind the retry.
                draining.append(&mut self.frames);
                self.frames = draining;
                break;
            }
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Drop all pending frames (session teardown).
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: &str) -> Frame {
        Frame::new(value)
    }

    #[test]
    fn flush_is_noop_when_socket_closed() {
        let mut queue = PendingWriteQueue::new();
        queue.enqueue(frame("a"));
        let sent = queue.flush(false, |_| panic!("must not attempt send"));
        assert_eq!(sent, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn flush_sends_in_fifo_order() {
        let mut queue = PendingWriteQueue::new();
        queue.enqueue(frame("a"));
        queue.enqueue(frame("b"));
        queue.enqueue(frame("c"));

        let mut seen = Vec::new();
        let sent = queue.flush(true, |f| {
            seen.push(f.value.clone());
            true
        });
        assert_eq!(sent, 3);
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_frame_retries_before_newer_input() {
        let mut queue = PendingWriteQueue::new();
        queue.enqueue(frame("1"));
        queue.enqueue(frame("2"));
        queue.enqueue(frame("3"));

        // Frame 2 fails mid-flush.
        let sent = queue.flush(true, |f| f.value != "2");
        assert_eq!(sent, 1);
        assert_eq!(queue.len(), 2);

        // Input arriving after the failure goes behind the retry.
        queue.enqueue(frame("4"));

        let mut seen = Vec::new();
        queue.flush(true, |f| {
            seen.push(f.value.clone());
            true
        });
        assert_eq!(seen, vec!["2", "3", "4"]);
    }

    #[test]
    fn stats_track_batches_and_sends() {
        let mut queue = PendingWriteQueue::new();
        queue.enqueue(frame("a"));
        queue.enqueue(frame("b"));
        queue.flush(true, |_| true);
        queue.enqueue(frame("c"));
        queue.flush(true, |_| true);

        let stats = queue.stats();
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.last_batch_size, 1);
    }

    #[test]
    fn flush_on_empty_queue_does_not_count_a_batch() {
        let mut queue = PendingWriteQueue::new();
        queue.flush(true, |_| true);
        assert_eq!(queue.stats().batches, 0);
    }
}
