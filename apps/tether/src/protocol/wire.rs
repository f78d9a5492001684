//! Binary codec for the stdin wire frame.
//!
//! Layout: `version(1) | seq(8, big-endian u64) | source_len(2, big-endian
//! u16) | source (UTF-8) | payload (UTF-8, rest of frame)`.
//!
//! The source field is reserved: current producers always emit it empty,
//! but the length prefix keeps room for it so decoders never have to guess.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::ProtocolError;

/// Wire format version emitted by this client.
pub const WIRE_VERSION: u8 = 0x01;

/// Fixed header length: version + sequence + source length prefix.
pub const WIRE_HEADER_LEN: usize = 1 + 8 + 2;

/// Encode one input frame.
///
/// The payload is taken verbatim; newline normalization happens on the
/// `Frame` before sequence assignment, not here.
pub fn encode_input_frame(seq: u64, source: &str, payload: &str) -> Result<Bytes, ProtocolError> {
    if source.len() > u16::MAX as usize {
        return Err(ProtocolError::SourceTooLong { len: source.len() });
    }

    let mut buf = BytesMut::with_capacity(WIRE_HEADER_LEN + source.len() + payload.len());
    buf.put_u8(WIRE_VERSION);
    buf.put_u64(seq);
    buf.put_u16(source.len() as u16);
    buf.put_slice(source.as_bytes());
    buf.put_slice(payload.as_bytes());
    Ok(buf.freeze())
}

/// A decoded input frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInputFrame {
    pub seq: u64,
    pub source: String,
    pub payload: String,
}

/// Decode an input frame produced by [`encode_input_frame`].
///
/// Used by tests and diagnostics; the server is the real consumer.
pub fn decode_input_frame(data: &[u8]) -> Result<DecodedInputFrame, ProtocolError> {
    if data.len() < WIRE_HEADER_LEN {
        return Err(ProtocolError::FrameTruncated {
            needed: WIRE_HEADER_LEN,
            got: data.len(),
        });
    }

    let mut buf = Bytes::copy_from_slice(data);
    let version = buf.get_u8();
    if version != WIRE_VERSION {
        return Err(ProtocolError::UnsupportedWireVersion(version));
    }

    let seq = buf.get_u64();
    let source_len = buf.get_u16() as usize;
    if buf.remaining() < source_len {
        return Err(ProtocolError::FrameTruncated {
            needed: WIRE_HEADER_LEN + source_len,
            got: data.len(),
        });
    }

    let source_bytes = buf.split_to(source_len);
    let source = String::from_utf8(source_bytes.to_vec())
        .map_err(|err| ProtocolError::InvalidUtf8("source", err.utf8_error()))?;
    let payload = String::from_utf8(buf.to_vec())
        .map_err(|err| ProtocolError::InvalidUtf8("payload", err.utf8_error()))?;

    Ok(DecodedInputFrame {
        seq,
        source,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = encode_input_frame(42, "", "ls -la\n").unwrap();
        let decoded = decode_input_frame(&encoded).unwrap();
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.source, "");
        assert_eq!(decoded.payload, "ls -la\n");
    }

    #[test]
    fn roundtrip_preserves_reserved_source() {
        let encoded = encode_input_frame(7, "paste", "hello").unwrap();
        let decoded = decode_input_frame(&encoded).unwrap();
        assert_eq!(decoded.source, "paste");
        assert_eq!(decoded.payload, "hello");
    }

    #[test]
    fn roundtrip_extreme_sequences() {
        for seq in [0, 1, u64::MAX / 2, u64::MAX] {
            let encoded = encode_input_frame(seq, "", "x").unwrap();
            assert_eq!(decode_input_frame(&encoded).unwrap().seq, seq);
        }
    }

    #[test]
    fn roundtrip_multibyte_payload() {
        let payload = "héllo ∑ world\n";
        let encoded = encode_input_frame(3, "", payload).unwrap();
        assert_eq!(decode_input_frame(&encoded).unwrap().payload, payload);
    }

    #[test]
    fn seq_is_big_endian_after_version_byte() {
        let encoded = encode_input_frame(0x0102_0304_0506_0708, "", "").unwrap();
        assert_eq!(encoded[0], WIRE_VERSION);
        assert_eq!(&encoded[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // Reserved source is emitted with an explicit zero length.
        assert_eq!(&encoded[9..11], &[0, 0]);
    }

    #[test]
    fn decode_truncated_header_errors() {
        let encoded = encode_input_frame(1, "", "abc").unwrap();
        let err = decode_input_frame(&encoded[..WIRE_HEADER_LEN - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTruncated { .. }));
    }

    #[test]
    fn decode_truncated_source_errors() {
        let encoded = encode_input_frame(1, "keyboard", "abc").unwrap();
        let err = decode_input_frame(&encoded[..WIRE_HEADER_LEN + 2]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTruncated { .. }));
    }

    #[test]
    fn decode_unknown_version_errors() {
        let mut encoded = encode_input_frame(1, "", "abc").unwrap().to_vec();
        encoded[0] = 0x02;
        let err = decode_input_frame(&encoded).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedWireVersion(0x02)));
    }

    #[test]
    fn decode_invalid_payload_utf8_errors() {
        let mut encoded = encode_input_frame(1, "", "ab").unwrap().to_vec();
        let last = encoded.len() - 1;
        encoded[last] = 0xFF;
        let err = decode_input_frame(&encoded).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8("payload", _)));
    }

    #[test]
    fn source_longer_than_u16_rejected() {
        let source = "s".repeat(u16::MAX as usize + 1);
        let err = encode_input_frame(1, &source, "abc").unwrap_err();
        assert!(matches!(err, ProtocolError::SourceTooLong { .. }));
    }
}
