//! In-memory transport for tests: the test scripts inbound events through
//! a handle and inspects everything the client sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, Inbound, Outbound, Transport, TransportError, TransportEvent};

pub struct MockTransport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sent: mpsc::UnboundedSender<Outbound>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle paired with a [`MockTransport`].
pub struct MockTransportHandle {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<Outbound>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Create a connected transport/handle pair.
pub fn pair() -> (MockTransport, MockTransportHandle) {
    let (evt_tx, evt_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let fail_sends = Arc::new(AtomicBool::new(false));
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            events: evt_rx,
            sent: sent_tx,
            fail_sends: fail_sends.clone(),
            closed: closed.clone(),
        },
        MockTransportHandle {
            events: evt_tx,
            sent: sent_rx,
            fail_sends,
            closed,
        },
    )
}

impl MockTransportHandle {
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn emit_text(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(Inbound::Text(text.into())));
    }

    pub fn emit_binary(&self, bytes: Vec<u8>) {
        self.emit(TransportEvent::Message(Inbound::Binary(bytes)));
    }

    pub fn emit_closed(&self, code: Option<u16>) {
        self.emit(TransportEvent::Closed { code });
    }

    /// Make subsequent `send` calls fail, as if the socket closed mid-write.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Drain everything the client has sent so far.
    pub fn drain_sent(&mut self) -> Vec<Outbound> {
        let mut drained = Vec::new();
        while let Ok(message) = self.sent.try_recv() {
            drained.push(message);
        }
        drained
    }

    /// Await the next sent message (for tests that race the client loop).
    pub async fn next_sent(&mut self) -> Option<Outbound> {
        self.sent.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn send(&mut self, message: Outbound) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.sent
            .send(message)
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ConnectorState {
    transports: VecDeque<MockTransport>,
    connected: Vec<Url>,
}

/// Hands out pre-scripted transports on successive connects.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport for the next connect call.
    pub fn push_transport(&self, transport: MockTransport) {
        self.state.lock().unwrap().transports.push_back(transport);
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connected.len()
    }

    pub fn connected_urls(&self) -> Vec<Url> {
        self.state.lock().unwrap().connected.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connected.push(url.clone());
        state
            .transports
            .pop_front()
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .ok_or_else(|| TransportError::Connect("no scripted transport available".into()))
    }
}
