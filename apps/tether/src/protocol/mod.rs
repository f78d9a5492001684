//! Wire protocol for the session stream: JSON envelopes for server output
//! and control traffic, plus the binary frame that carries stdin.

mod envelope;
mod wire;

use std::str::Utf8Error;

use thiserror::Error;

pub use envelope::{
    ClientEnvelope, OutputChunk, OutputDirection, OutputPayload, ReplayPayload, ServerEnvelope,
    StatusKind, StatusPayload, parse_server_envelope,
};
pub use wire::{
    DecodedInputFrame, WIRE_HEADER_LEN, WIRE_VERSION, decode_input_frame, encode_input_frame,
};

/// Errors raised while encoding or decoding protocol traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("input frame truncated: need {needed} bytes, got {got}")]
    FrameTruncated { needed: usize, got: usize },

    #[error("unsupported wire version {0:#04x}")]
    UnsupportedWireVersion(u8),

    #[error("frame {0} field is not valid UTF-8: {1}")]
    InvalidUtf8(&'static str, Utf8Error),

    #[error("source field too long for wire frame: {len} bytes")]
    SourceTooLong { len: usize },

    #[error("malformed envelope: {detail}")]
    MalformedEnvelope { detail: String },

    #[error("malformed {kind} payload: {detail}")]
    MalformedPayload { kind: String, detail: String },

    #[error("invalid chunk data: {0}")]
    InvalidChunkData(String),
}
