//! Session socket lifecycle.
//!
//! One driver loop per tab owns the live transport and everything hanging
//! off it: envelope dispatch, the 30-second heartbeat, queue flushing on
//! open, and the single delayed reconnect attempt after an unexpected
//! close. A new connect supersedes the old transport wholesale, so a dead
//! socket's late events can never touch current tab state.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, trace, warn};

use crate::protocol::{
    ClientEnvelope, ServerEnvelope, StatusKind, parse_server_envelope,
};
use crate::session::replay::{apply_replay, hydrate_transcript};
use crate::session::{SessionApi, SessionError};
use crate::tab::{SessionPhase, SocketState, Tab, UiEvent};
use crate::transport::{Connector, Inbound, Outbound, Transport, TransportError, TransportEvent};

/// Commands from the input side (terminal widget / stdin pump).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// Raw keystroke text, in arrival order.
    Keys(String),
    Resize { cols: u16, rows: u16 },
    /// User-initiated stop: DELETE the session and close for good.
    Stop,
}

/// How a session run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user stopped the session.
    UserClosed,
    /// The server ended the session (exit status or server-side close).
    ServerClosed,
    /// Reconnect lookup said 404: the session expired server-side.
    Expired,
    /// Reconnect failed for another reason; terminal.
    ReconnectFailed,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no session attached to tab")]
    NoSession,

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

enum SocketOutcome {
    Terminal(SessionEnd),
    Reconnect,
}

/// Drives one session's socket lifecycle to completion.
pub struct SessionSocket<'a> {
    tab: &'a mut Tab,
    api: &'a SessionApi,
    connector: &'a dyn Connector,
    input_rx: &'a mut mpsc::UnboundedReceiver<InputCommand>,
}

impl<'a> SessionSocket<'a> {
    pub fn new(
        tab: &'a mut Tab,
        api: &'a SessionApi,
        connector: &'a dyn Connector,
        input_rx: &'a mut mpsc::UnboundedReceiver<InputCommand>,
    ) -> Self {
        Self {
            tab,
            api,
            connector,
            input_rx,
        }
    }

    /// Run until the session reaches a terminal state.
    pub async fn run(mut self) -> Result<SessionEnd, ClientError> {
        let session_id = self
            .tab
            .session()
            .map(|s| s.id.clone())
            .ok_or(ClientError::NoSession)?;

        loop {
            match self.drive_socket(&session_id).await? {
                SocketOutcome::Terminal(end) => return Ok(end),
                SocketOutcome::Reconnect => {
                    // Exactly one reconnect attempt per close, after a fixed
                    // delay; the lookup decides whether the session is worth
                    // reconnecting to.
                    sleep(self.tab.config.reconnect_delay).await;
                    match self.api.lookup(&session_id).await {
                        Ok(session) => {
                            debug!(target: "tether::socket", %session, "session still live, reconnecting");
                        }
                        Err(SessionError::Expired) => {
                            debug!(target: "tether::socket", session_id, "session expired server-side");
                            self.tab.clear_session();
                            self.tab.set_phase(SessionPhase::Idle);
                            self.tab.emit(UiEvent::Notice(
                                "session expired — start a new session".into(),
                            ));
                            return Ok(SessionEnd::Expired);
                        }
                        Err(err) => {
                            warn!(target: "tether::socket", session_id, error = %err, "reconnect lookup failed");
                            self.tab
                                .emit(UiEvent::ErrorBanner(format!("reconnect failed: {err}")));
                            self.tab.set_phase(SessionPhase::Closed);
                            return Ok(SessionEnd::ReconnectFailed);
                        }
                    }
                }
            }
        }
    }

    /// Open one socket and run it until it closes.
    async fn drive_socket(&mut self, session_id: &str) -> Result<SocketOutcome, ClientError> {
        let url = self.api.stream_url(session_id)?;
        self.tab.reset_for_socket();

        let mut transport = match self.connector.connect(&url).await {
            Ok(transport) => transport,
            Err(err) => {
                self.tab.socket_state = SocketState::Error;
                self.tab
                    .emit(UiEvent::ErrorBanner(format!("connection failed: {err}")));
                self.tab.set_phase(SessionPhase::Closed);
                return Err(err.into());
            }
        };
        debug!(target: "tether::socket", session_id, generation = self.tab.socket_generation, "socket connecting");

        let period = self.tab.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                event = transport.next_event() => {
                    match event {
                        Some(TransportEvent::Open) => self.on_open(transport.as_mut()),
                        Some(TransportEvent::Message(inbound)) => {
                            self.on_message(inbound).await;
                        }
                        Some(TransportEvent::Error(message)) => {
                            self.tab.socket_state = SocketState::Error;
                            self.tab.emit(UiEvent::ErrorBanner(format!(
                                "terminal stream error: {message}"
                            )));
                        }
                        Some(TransportEvent::Closed { code }) => {
                            return Ok(self.on_close(code));
                        }
                        None => {
                            // Event stream exhausted without a close frame.
                            return Ok(self.on_close(None));
                        }
                    }
                }
                _ = heartbeat.tick(), if self.tab.socket_state == SocketState::Open => {
                    trace!(target: "tether::socket", session_id, "heartbeat");
                    if let Err(err) = transport.send(Outbound::Text(ClientEnvelope::Heartbeat {}.to_json())) {
                        trace!(target: "tether::socket", error = %err, "heartbeat send failed");
                    }
                }
                command = self.input_rx.recv() => {
                    let command = command.unwrap_or(InputCommand::Stop);
                    self.on_command(transport.as_mut(), session_id, command).await;
                    // Everything already queued belongs to the same turn.
                    while let Ok(next) = self.input_rx.try_recv() {
                        self.on_command(transport.as_mut(), session_id, next).await;
                    }
                }
            }

            // End of turn: release any deferred keystroke batch.
            self.tab.drain_deferred(transport.as_mut());
        }
    }

    fn on_open(&mut self, transport: &mut dyn Transport) {
        debug!(target: "tether::socket", generation = self.tab.socket_generation, "socket open");
        self.tab.socket_state = SocketState::Open;
        if let Some((cols, rows)) = self.tab.dims {
            let _ = transport.send(Outbound::Text(
                ClientEnvelope::Resize { cols, rows }.to_json(),
            ));
        }
        let flushed = self.tab.flush_queue(transport);
        if flushed > 0 {
            debug!(target: "tether::socket", flushed, "flushed pending writes");
        }
    }

    async fn on_message(&mut self, inbound: Inbound) {
        let text = match inbound {
            Inbound::Text(text) => text,
            // Binary stream frames carry UTF-8 JSON too.
            Inbound::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        };

        let envelope = match parse_server_envelope(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "tether::socket", error = %err, "dropping malformed envelope");
                return;
            }
        };

        match envelope {
            ServerEnvelope::Output(payload) => {
                let direction = payload.direction();
                match payload.decoded_data() {
                    Ok(bytes) => self.tab.deliver_output(bytes, direction, false, true),
                    Err(err) => {
                        warn!(target: "tether::socket", error = %err, "dropping undecodable output");
                    }
                }
            }
            ServerEnvelope::OutputReplay(payload) => {
                if apply_replay(self.tab, payload) {
                    hydrate_transcript(self.tab, self.api).await;
                }
            }
            ServerEnvelope::Status(payload) => {
                debug!(target: "tether::socket", status = %payload.status, reason = ?payload.reason, "status");
                self.tab
                    .record_status(&payload.status, payload.reason.as_deref());
                match payload.kind() {
                    StatusKind::Started => {
                        self.tab.set_phase(SessionPhase::Running);
                        self.tab.sink.focus();
                    }
                    StatusKind::CommandExitError => {
                        let reason = payload
                            .reason
                            .clone()
                            .unwrap_or_else(|| "command exited with an error".into());
                        self.tab.emit(UiEvent::ErrorBanner(reason));
                    }
                    StatusKind::Closed => {
                        self.tab.set_phase(SessionPhase::Closed);
                    }
                    StatusKind::Other => {}
                }
            }
            ServerEnvelope::Heartbeat => {
                trace!(target: "tether::socket", "server heartbeat");
            }
            ServerEnvelope::Unknown { kind } => {
                debug!(target: "tether::socket", kind, "unrecognized envelope type");
            }
        }
    }

    async fn on_command(
        &mut self,
        transport: &mut dyn Transport,
        session_id: &str,
        command: InputCommand,
    ) {
        match command {
            InputCommand::Keys(text) => {
                self.tab.write_input(&text, transport);
            }
            InputCommand::Resize { cols, rows } => {
                self.tab.dims = Some((cols, rows));
                if self.tab.socket_state == SocketState::Open {
                    let _ = transport.send(Outbound::Text(
                        ClientEnvelope::Resize { cols, rows }.to_json(),
                    ));
                }
            }
            InputCommand::Stop => {
                debug!(target: "tether::socket", session_id, "user stop");
                self.tab.set_phase(SessionPhase::Closing);
                if let Err(err) = self.api.stop(session_id).await {
                    warn!(target: "tether::socket", session_id, error = %err, "session stop failed");
                }
                transport.close();
            }
        }
    }

    /// Decide what the socket close means for the session.
    fn on_close(&mut self, code: Option<u16>) -> SocketOutcome {
        debug!(
            target: "tether::socket",
            code,
            phase = ?self.tab.phase(),
            "socket closed"
        );
        match self.tab.phase() {
            SessionPhase::Closing => {
                self.tab.socket_state = SocketState::Closed;
                self.tab.set_phase(SessionPhase::Closed);
                SocketOutcome::Terminal(SessionEnd::UserClosed)
            }
            SessionPhase::Running => {
                self.tab.socket_state = SocketState::Disconnected;
                SocketOutcome::Reconnect
            }
            _ => {
                self.tab.socket_state = SocketState::Closed;
                self.tab.set_phase(SessionPhase::Closed);
                SocketOutcome::Terminal(SessionEnd::ServerClosed)
            }
        }
    }
}
