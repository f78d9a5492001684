//! WebSocket transport over tokio-tungstenite.
//!
//! The connection is split into a writer task fed by an unbounded channel
//! (so sends stay synchronous for the queue-flush path) and a reader task
//! that normalizes tungstenite messages into [`TransportEvent`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, trace};
use url::Url;

use super::{Connector, Inbound, Outbound, Transport, TransportError, TransportEvent};

pub struct WebSocketTransport {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl WebSocketTransport {
    pub async fn connect(url: &Url) -> Result<Self, TransportError> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(target: "tether::transport", %url, "websocket connected");

        let (mut ws_sink, mut ws_stream) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // The handshake completed above, so the socket is open from the
        // consumer's point of view as soon as events are polled.
        let _ = evt_tx.send(TransportEvent::Open);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let frame = match message {
                    Outbound::Text(text) => Message::Text(text.into()),
                    Outbound::Binary(bytes) => Message::Binary(bytes.into()),
                };
                if let Err(err) = ws_sink.send(frame).await {
                    trace!(target: "tether::transport", error = %err, "websocket write failed");
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        tokio::spawn(async move {
            let mut close_sent = false;
            while let Some(item) = ws_stream.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        let _ = evt_tx.send(TransportEvent::Message(Inbound::Text(text.to_string())));
                    }
                    Ok(Message::Binary(bytes)) => {
                        let _ = evt_tx.send(TransportEvent::Message(Inbound::Binary(bytes.to_vec())));
                    }
                    Ok(Message::Close(frame)) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        let _ = evt_tx.send(TransportEvent::Closed { code });
                        close_sent = true;
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong handled by tungstenite itself.
                    }
                    Err(err) => {
                        let _ = evt_tx.send(TransportEvent::Error(err.to_string()));
                        let _ = evt_tx.send(TransportEvent::Closed { code: None });
                        close_sent = true;
                        break;
                    }
                }
            }
            if !close_sent {
                // Peer went away without a close frame (abnormal closure).
                let _ = evt_tx.send(TransportEvent::Closed { code: Some(1006) });
            }
        });

        Ok(Self {
            outbound: Some(out_tx),
            events: evt_rx,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn send(&mut self, message: Outbound) -> Result<(), TransportError> {
        match &self.outbound {
            Some(tx) => tx
                .send(message)
                .map_err(|_| TransportError::ChannelClosed),
            None => Err(TransportError::ChannelClosed),
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        // Dropping the sender ends the writer task, which closes the sink.
        self.outbound.take();
    }
}

/// Default connector used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(WebSocketTransport::connect(url).await?))
    }
}
