//! The tab: ownership root for one session's client-side state.
//!
//! A tab owns exactly one session, one socket, the pending-write queue,
//! echo buffer, transcript, and sequence counter. Nothing here is shared
//! across tabs, and every socket-scoped mutation checks the socket
//! generation so late events from a superseded connection are discarded
//! instead of acted on.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::echo::EchoBuffer;
use crate::input::{Batch, Frame, FrameMeta, InputCoalescer, PendingWriteQueue, SeqCounter};
use crate::protocol::{OutputDirection, encode_input_frame};
use crate::session::Session;
use crate::session::replay::ReplayState;
use crate::terminal::TerminalSink;
use crate::transcript::{Direction, TranscriptEntry, TranscriptStore};
use crate::transport::{Outbound, Transport};

/// Lifecycle phase of the tab's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Starting,
    Running,
    /// User-initiated stop in progress; the next socket close is terminal.
    Closing,
    Closed,
}

/// Connection state of the tab's current socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Open,
    Error,
    Disconnected,
    Closed,
}

/// Events for the presentational layer (tab chrome, banners, toasts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Phase(SessionPhase),
    /// Persistent error banner.
    ErrorBanner(String),
    /// Timed toast; rejections and invitations, not faults.
    Notice(String),
    /// The server trimmed replay scrollback; reported once per session.
    ReplayTruncated,
}

pub struct Tab {
    pub id: String,
    pub(crate) config: Arc<Config>,
    pub(crate) session: Option<Session>,
    pub(crate) phase: SessionPhase,
    pub(crate) socket_state: SocketState,
    /// Bumped on every connect; events carrying an older generation are
    /// from a superseded socket and must be ignored.
    pub(crate) socket_generation: u64,
    pub(crate) seq: SeqCounter,
    pub(crate) coalescer: InputCoalescer,
    pub(crate) queue: PendingWriteQueue,
    pub(crate) echo: EchoBuffer,
    pub(crate) transcript: TranscriptStore,
    pub(crate) replay: ReplayState,
    pub(crate) has_ever_connected: bool,
    pub(crate) transcript_hydrated: bool,
    pub(crate) transcript_hydrating: bool,
    pub(crate) dims: Option<(u16, u16)>,
    pub(crate) sink: Box<dyn TerminalSink>,
    ui: mpsc::UnboundedSender<UiEvent>,
}

impl Tab {
    pub fn new(
        config: Arc<Config>,
        sink: Box<dyn TerminalSink>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session: None,
            phase: SessionPhase::Idle,
            socket_state: SocketState::Idle,
            socket_generation: 0,
            seq: SeqCounter::new(),
            coalescer: InputCoalescer::new(),
            queue: PendingWriteQueue::new(),
            echo: EchoBuffer::new(config.echo_cap, config.echo_timeout),
            transcript: TranscriptStore::new(
                config.transcript_max_entries,
                config.transcript_max_bytes,
            ),
            replay: ReplayState::default(),
            has_ever_connected: false,
            transcript_hydrated: false,
            transcript_hydrating: false,
            dims: None,
            sink,
            ui,
            config,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(target: "tether::tab", tab = %self.id, ?phase, "phase change");
            self.phase = phase;
            self.emit(UiEvent::Phase(phase));
        }
    }

    pub(crate) fn emit(&self, event: UiEvent) {
        let _ = self.ui.send(event);
    }

    /// Adopt a freshly created session. The sequence counter resets here
    /// and only here; reconnects to the same session keep counting.
    pub fn start_session(&mut self, session: Session) {
        debug!(target: "tether::tab", tab = %self.id, %session, "session started");
        self.session = Some(session);
        self.seq.reset();
        self.queue.clear();
        self.echo.clear();
        self.transcript.reset();
        self.has_ever_connected = false;
        self.transcript_hydrated = false;
        self.transcript_hydrating = false;
        self.set_phase(SessionPhase::Starting);
    }

    /// Forget the session entirely (expiry or explicit teardown).
    pub fn clear_session(&mut self) {
        self.session = None;
        self.queue.clear();
        self.echo.clear();
    }

    /// Per-socket state reset, run on every (re)connect. Supersedes any
    /// prior socket for this tab.
    pub(crate) fn reset_for_socket(&mut self) {
        self.socket_generation += 1;
        self.socket_state = SocketState::Connecting;
        self.replay = ReplayState::for_new_socket();
    }

    /// Feed one keystroke chunk from the terminal widget, in arrival
    /// order. May transmit immediately (control characters, size
    /// threshold); otherwise the batch rides the deferred flush drained by
    /// [`drain_deferred`](Self::drain_deferred) at the end of the turn.
    pub fn write_input(&mut self, text: &str, transport: &mut dyn Transport) {
        if self.config.local_echo {
            let echoed = self.echo.predict(text);
            if !echoed.is_empty() {
                self.sink.write(echoed.as_bytes());
            }
        }
        if let Some(batch) = self.coalescer.push(text) {
            self.send_batch(batch, transport);
        }
    }

    /// End-of-turn deferred flush. The lone-newline debounce lands here: a
    /// deferred batch of exactly `"\n"` is enqueued unsent so it cannot
    /// outrun the echo of characters typed in the same action.
    pub fn drain_deferred(&mut self, transport: &mut dyn Transport) {
        let Some(batch) = self.coalescer.take_deferred() else {
            return;
        };
        if batch.is_debounced_newline() {
            debug!(target: "tether::tab", tab = %self.id, "withholding bare newline flush");
            let frame = Self::frame_from_batch(batch);
            self.enqueue_frame(frame);
            return;
        }
        self.send_batch(batch, transport);
    }

    fn frame_from_batch(batch: Batch) -> Frame {
        Frame {
            value: batch.value,
            meta: FrameMeta {
                batch_size: batch.events,
                ..FrameMeta::default()
            },
        }
    }

    fn send_batch(&mut self, batch: Batch, transport: &mut dyn Transport) {
        let frame = Self::frame_from_batch(batch);
        self.enqueue_frame(frame);
        self.flush_queue(transport);
    }

    /// Queue a frame for transmission, assigning its sequence number. The
    /// frame keeps that number across retries.
    pub fn enqueue_frame(&mut self, mut frame: Frame) {
        self.seq.assign(&mut frame.meta);
        self.queue.enqueue(frame);
    }

    /// Flush the pending-write queue through the transport. No-op unless
    /// the socket is open. Returns the number of frames transmitted.
    pub fn flush_queue(&mut self, transport: &mut dyn Transport) -> usize {
        let open = self.socket_state == SocketState::Open;
        let Tab {
            queue, transcript, ..
        } = self;
        queue.flush(open, |frame| {
            let Some(payload) = frame.normalized_payload() else {
                // Normalizes to nothing: success, no frame on the wire.
                return true;
            };
            let seq = frame.meta.seq.unwrap_or_default();
            let source = frame.meta.source.as_deref().unwrap_or_default();
            let encoded = match encode_input_frame(seq, source, &payload) {
                Ok(encoded) => encoded,
                Err(err) => {
                    warn!(target: "tether::tab", error = %err, seq, "dropping unencodable frame");
                    return true;
                }
            };
            crate::telemetry::record_bytes("input_frame_bytes", encoded.len());
            if transport.send(Outbound::Binary(encoded.to_vec())).is_err() {
                return false;
            }
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(
                    target: "tether::tab",
                    seq,
                    dump = %crate::telemetry::logging::hexdump(payload.as_bytes()),
                    "input sent"
                );
            }
            transcript.record(TranscriptEntry::now(Direction::Stdin).with_data(payload));
            true
        })
    }

    /// Render one output chunk and record it.
    ///
    /// Live output runs through echo reconciliation when local echo is on;
    /// replayed output is historical and always renders byte-for-byte.
    pub fn deliver_output(
        &mut self,
        bytes: Vec<u8>,
        direction: OutputDirection,
        replay: bool,
        record: bool,
    ) {
        crate::telemetry::record_bytes("output_chunk_bytes", bytes.len());
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "tether::tab", tab = %self.id, error = %err, "dropping undecodable output chunk");
                return;
            }
        };

        let rendered = if !replay && self.config.local_echo {
            self.echo.reconcile(&text)
        } else {
            text.clone()
        };
        if !rendered.is_empty() {
            self.sink.write(rendered.as_bytes());
        }

        if record {
            let dir = match direction {
                OutputDirection::Stdout => Direction::Stdout,
                OutputDirection::Stderr => Direction::Stderr,
            };
            self.transcript
                .record(TranscriptEntry::now(dir).with_data(text).with_replay(replay));
        }
    }

    /// Record a status transition in the transcript.
    pub fn record_status(&mut self, status: &str, reason: Option<&str>) {
        let message = match reason {
            Some(reason) => format!("{status}: {reason}"),
            None => status.to_string(),
        };
        self.transcript
            .record(TranscriptEntry::now(Direction::Status).with_message(message));
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock;

    fn test_tab(local_echo: bool) -> (Tab, crate::terminal::CaptureSink, mpsc::UnboundedReceiver<UiEvent>) {
        let config = Arc::new(Config {
            local_echo,
            ..Config::default()
        });
        let sink = crate::terminal::CaptureSink::new();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let tab = Tab::new(config, Box::new(sink.clone()), ui_tx);
        (tab, sink, ui_rx)
    }

    #[test]
    fn typing_ls_newline_sends_one_frame() {
        let (mut tab, _sink, _ui) = test_tab(false);
        tab.socket_state = SocketState::Open;
        let (mut transport, mut handle) = mock::pair();

        tab.write_input("l", &mut transport);
        tab.write_input("s", &mut transport);
        tab.write_input("\n", &mut transport);
        tab.drain_deferred(&mut transport);

        let sent = handle.drain_sent();
        assert_eq!(sent.len(), 1);
        let Outbound::Binary(bytes) = &sent[0] else {
            panic!("input must be binary");
        };
        let decoded = crate::protocol::decode_input_frame(bytes).unwrap();
        assert_eq!(decoded.payload, "ls\n");
        assert_eq!(decoded.seq, 0);
    }

    #[test]
    fn input_before_open_waits_in_queue() {
        let (mut tab, _sink, _ui) = test_tab(false);
        let (mut transport, mut handle) = mock::pair();

        tab.write_input("\u{03}", &mut transport);
        assert!(handle.drain_sent().is_empty());
        assert_eq!(tab.queue.len(), 1);

        tab.socket_state = SocketState::Open;
        tab.flush_queue(&mut transport);
        assert_eq!(handle.drain_sent().len(), 1);
    }

    #[test]
    fn failed_send_keeps_frame_for_retry() {
        let (mut tab, _sink, _ui) = test_tab(false);
        tab.socket_state = SocketState::Open;
        let (mut transport, mut handle) = mock::pair();
        handle.set_fail_sends(true);

        tab.write_input("x\n", &mut transport);
        assert_eq!(tab.queue.len(), 1);

        handle.set_fail_sends(false);
        tab.flush_queue(&mut transport);
        let sent = handle.drain_sent();
        assert_eq!(sent.len(), 1);
        // Same frame, same sequence: a retry is not a new frame.
        let Outbound::Binary(bytes) = &sent[0] else {
            panic!("binary expected");
        };
        assert_eq!(crate::protocol::decode_input_frame(bytes).unwrap().seq, 0);
    }

    #[test]
    fn local_echo_renders_before_send_and_reconciles() {
        let (mut tab, sink, _ui) = test_tab(true);
        tab.socket_state = SocketState::Open;
        let (mut transport, _handle) = mock::pair();

        tab.write_input("hi", &mut transport);
        assert_eq!(sink.written_utf8(), "hi");

        // Server echoes the same characters back: nothing renders twice.
        tab.deliver_output(b"hi".to_vec(), OutputDirection::Stdout, false, true);
        assert_eq!(sink.written_utf8(), "hi");
    }

    #[test]
    fn replay_output_bypasses_echo_filter() {
        let (mut tab, sink, _ui) = test_tab(true);
        let (mut transport, _handle) = mock::pair();
        tab.write_input("hi", &mut transport);

        tab.deliver_output(b"hi".to_vec(), OutputDirection::Stdout, true, true);
        // Local echo "hi" plus the replayed "hi": replay renders verbatim.
        assert_eq!(sink.written_utf8(), "hihi");
    }

    #[test]
    fn invalid_utf8_chunk_is_dropped_not_fatal() {
        let (mut tab, sink, _ui) = test_tab(false);
        tab.deliver_output(vec![0xFF, 0xFE], OutputDirection::Stdout, false, true);
        assert_eq!(sink.written_utf8(), "");
        assert!(tab.transcript.is_empty());
    }

    #[test]
    fn new_session_resets_sequence_counter() {
        let (mut tab, _sink, _ui) = test_tab(false);
        tab.socket_state = SocketState::Open;
        let (mut transport, mut handle) = mock::pair();
        tab.write_input("a\n", &mut transport);

        tab.start_session(Session {
            id: "s2".into(),
            created_at: time::OffsetDateTime::now_utc(),
            command: "bash".into(),
            args: vec![],
        });
        tab.socket_state = SocketState::Open;
        handle.drain_sent();

        tab.write_input("b\n", &mut transport);
        let sent = handle.drain_sent();
        let Outbound::Binary(bytes) = &sent[0] else {
            panic!("binary expected");
        };
        assert_eq!(crate::protocol::decode_input_frame(bytes).unwrap().seq, 0);
    }

    #[test]
    fn phase_changes_reach_the_ui_once() {
        let (mut tab, _sink, mut ui) = test_tab(false);
        tab.set_phase(SessionPhase::Running);
        tab.set_phase(SessionPhase::Running);
        assert_eq!(ui.try_recv(), Ok(UiEvent::Phase(SessionPhase::Running)));
        assert!(ui.try_recv().is_err());
    }

    #[test]
    fn stdin_recorded_at_send_time() {
        let (mut tab, _sink, _ui) = test_tab(false);
        let (mut transport, _handle) = mock::pair();

        tab.write_input("a\n", &mut transport);
        assert!(tab.transcript.is_empty());

        tab.socket_state = SocketState::Open;
        tab.flush_queue(&mut transport);
        let entry = tab.transcript.entries().next().unwrap();
        assert_eq!(entry.direction, Direction::Stdin);
        assert_eq!(entry.data.as_deref(), Some("a\n"));
    }
}
