//! Building request frames and decoding reply frames.

use bincode::{Decode, Encode, config};
use bytes::Bytes;
use wirecall::{
    FrameHeader,
    FrameKind,
    StandardHeader,
    message::{BincodeMessage, RawMessage},
    reply::encode_frame,
};

/// Encode a frame carrying raw `payload` bytes.
///
/// # Panics
///
/// Panics if the header cannot be encoded.
pub fn raw_frame(id: u64, kind: FrameKind, service: &str, method: &str, payload: &[u8]) -> Vec<u8> {
    let mut header = StandardHeader::new(id, kind, service, method);
    encode_frame(&mut header, &RawMessage::new(payload))
        .expect("encode frame")
        .to_vec()
}

/// Encode a request frame whose payload is `value` in `bincode`'s standard
/// configuration.
///
/// # Panics
///
/// Panics if the value or header cannot be encoded.
pub fn request<T: Encode + Decode<()> + Send>(
    id: u64,
    kind: FrameKind,
    service: &str,
    method: &str,
    value: T,
) -> Vec<u8> {
    let mut header = StandardHeader::new(id, kind, service, method);
    encode_frame(&mut header, &BincodeMessage::owned(value))
        .expect("encode frame")
        .to_vec()
}

/// A reply frame split into its header and payload.
#[derive(Debug)]
pub struct DecodedFrame {
    /// Parsed header.
    pub header: StandardHeader,
    /// Payload bytes following the header.
    pub payload: Bytes,
}

impl DecodedFrame {
    /// Decode the payload as a `bincode` value.
    ///
    /// # Panics
    ///
    /// Panics if the payload does not decode as `T`.
    pub fn value<T: Decode<()>>(&self) -> T {
        bincode::decode_from_slice(&self.payload, config::standard())
            .expect("decode payload")
            .0
    }
}

/// Split a byte stream into complete frames, ignoring any trailing partial frame.
///
/// # Panics
///
/// Panics if a header is malformed.
pub fn decode_frames(mut bytes: &[u8]) -> Vec<DecodedFrame> {
    let mut frames = Vec::new();
    loop {
        let mut header = StandardHeader::default();
        let Some(header_len) = header.parse(bytes).expect("well-formed header") else {
            return frames;
        };
        let end = header_len + header.follow_bytes();
        if end > bytes.len() {
            return frames;
        }
        frames.push(DecodedFrame {
            payload: Bytes::copy_from_slice(&bytes[header_len..end]),
            header,
        });
        bytes = &bytes[end..];
    }
}

/// Decode one complete frame.
///
/// # Panics
///
/// Panics unless `bytes` holds exactly one frame.
pub fn decode_frame(bytes: &[u8]) -> DecodedFrame {
    let mut frames = decode_frames(bytes);
    assert_eq!(frames.len(), 1, "expected exactly one frame");
    frames.remove(0)
}
