//! JSON envelopes exchanged with the session stream endpoint.
//!
//! Every server message is `{"type": ..., "payload": {...}}`. The type tag
//! is matched first and each known payload is deserialized into an explicit
//! struct, so a malformed known payload is an error at the boundary instead
//! of a half-populated value deeper in. Unknown types are preserved as
//! [`ServerEnvelope::Unknown`] so new server message kinds stay non-fatal.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::protocol::ProtocolError;

/// Server → client envelope, decoded and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEnvelope {
    Output(OutputPayload),
    OutputReplay(ReplayPayload),
    Status(StatusPayload),
    Heartbeat,
    /// Forward-compatible escape hatch: the tag was well-formed JSON but not
    /// a kind this client knows.
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Parse one envelope from the text of a websocket frame.
pub fn parse_server_envelope(text: &str) -> Result<ServerEnvelope, ProtocolError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|err| ProtocolError::MalformedEnvelope {
            detail: err.to_string(),
        })?;

    let envelope = match raw.kind.as_str() {
        "output" => ServerEnvelope::Output(parse_payload(&raw.kind, raw.payload)?),
        "output_replay" => ServerEnvelope::OutputReplay(parse_payload(&raw.kind, raw.payload)?),
        "status" => ServerEnvelope::Status(parse_payload(&raw.kind, raw.payload)?),
        "heartbeat" => ServerEnvelope::Heartbeat,
        _ => ServerEnvelope::Unknown { kind: raw.kind },
    };
    Ok(envelope)
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    kind: &str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|err| ProtocolError::MalformedPayload {
        kind: kind.to_string(),
        detail: err.to_string(),
    })
}

/// Live output from the remote PTY.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputPayload {
    pub data: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub direction: Option<OutputDirection>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl OutputPayload {
    /// Decode the carried bytes, honoring the optional base64 encoding.
    pub fn decoded_data(&self) -> Result<Vec<u8>, ProtocolError> {
        decode_chunk_data(&self.data, self.encoding.as_deref())
    }

    pub fn direction(&self) -> OutputDirection {
        self.direction.unwrap_or(OutputDirection::Stdout)
    }
}

/// One historical chunk inside an `output_replay` envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputChunk {
    pub data: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub direction: Option<OutputDirection>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    /// Chunks default to being recorded in the transcript; a chunk can opt
    /// out (e.g. content the server already persisted elsewhere).
    #[serde(default = "default_true")]
    pub record: bool,
}

impl OutputChunk {
    pub fn decoded_data(&self) -> Result<Vec<u8>, ProtocolError> {
        decode_chunk_data(&self.data, self.encoding.as_deref())
    }

    pub fn direction(&self) -> OutputDirection {
        self.direction.unwrap_or(OutputDirection::Stdout)
    }
}

fn default_true() -> bool {
    true
}

fn decode_chunk_data(data: &str, encoding: Option<&str>) -> Result<Vec<u8>, ProtocolError> {
    match encoding {
        None => Ok(data.as_bytes().to_vec()),
        Some("base64") => BASE64
            .decode(data)
            .map_err(|err| ProtocolError::InvalidChunkData(err.to_string())),
        Some(other) => Err(ProtocolError::InvalidChunkData(format!(
            "unsupported encoding '{other}'"
        ))),
    }
}

/// Buffered history delivered on (re)connect.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayPayload {
    #[serde(default)]
    pub chunks: Vec<OutputChunk>,
    #[serde(default)]
    pub truncated: bool,
    pub complete: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub generated: Option<OffsetDateTime>,
}

/// Session phase transition reported by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusPayload {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl StatusPayload {
    pub fn kind(&self) -> StatusKind {
        match self.status.as_str() {
            "started" => StatusKind::Started,
            "command_exit_error" => StatusKind::CommandExitError,
            "closed" => StatusKind::Closed,
            _ => StatusKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Started,
    CommandExitError,
    Closed,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDirection {
    Stdout,
    Stderr,
}

/// Client → server control messages. Input data rides the binary wire
/// frame, never this envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Resize { cols: u16, rows: u16 },
    Heartbeat {},
}

impl ClientEnvelope {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("client envelopes serialize infallibly")
    }
}
