//! Transport abstraction over the session stream.
//!
//! The protocol core never touches a socket API directly: it speaks to a
//! [`Transport`] (open/send/events/close) produced by a [`Connector`], so
//! the whole lifecycle is drivable from tests with the in-memory mock.

pub mod mock;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport channel closed")]
    ChannelClosed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound traffic: control envelopes ride text frames, stdin rides
/// binary wire frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Inbound payload before envelope normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Events surfaced by a live transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream endpoint accepted the connection.
    Open,
    Message(Inbound),
    /// Transport-level fault. Non-fatal by itself; a `Closed` event drives
    /// the terminal/reconnect decision.
    Error(String),
    Closed { code: Option<u16> },
}

/// One live connection to the session stream endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Enqueue a message for transmission. Synchronous: failure means the
    /// transport is no longer writable (closed or closing), which callers
    /// treat as "requeue and retry after reconnect".
    fn send(&mut self, message: Outbound) -> Result<(), TransportError>;

    /// Next transport event. `None` once the event stream is exhausted
    /// (after `Closed` has been delivered).
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Initiate close. Events already in flight still drain.
    fn close(&mut self);
}

/// Opens transports for session stream URLs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError>;
}
