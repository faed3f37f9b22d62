//! Frame encoding and response delivery.

use bytes::BytesMut;
use log::{debug, warn};
use thiserror::Error;

use crate::{
    header::{FrameHeader, FrameKind, HeaderError},
    message::{CodecError, Message},
    metrics::{self, Direction},
    session::{ConnectionId, Session},
};

/// Errors raised while encoding a complete frame.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameEncodeError {
    /// The header could not be serialized.
    #[error("failed to encode header: {0}")]
    Header(#[from] HeaderError),
    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Payload(#[from] CodecError),
}

/// Encode `header` followed by `payload` into one contiguous buffer.
///
/// The header's follow-bytes field is set to the payload's encoded size
/// before the header is written.
///
/// # Errors
///
/// Returns a [`FrameEncodeError`] if either part fails to serialize.
pub fn encode_frame(
    header: &mut dyn FrameHeader,
    payload: &dyn Message,
) -> Result<BytesMut, FrameEncodeError> {
    let payload_len = payload.byte_size();
    header.set_follow_bytes(payload_len);
    let header_len = header.byte_size();

    let mut frame = BytesMut::zeroed(header_len + payload_len);
    let (head, body) = frame.split_at_mut(header_len);
    header.serialize(head)?;
    payload.serialize(body)?;
    Ok(frame)
}

struct ReplyContext {
    service: String,
    method: String,
    id: u64,
    connection: ConnectionId,
}

/// Encode `response` as the reply to `session` and hand it to the transport.
///
/// The request header is reused with its kind switched to
/// [`FrameKind::Response`], so the reply carries the request's service,
/// method and id. Failures are logged and never propagated.
pub(crate) fn send_reply(mut session: Session, response: &dyn Message) {
    session.header.set_kind(FrameKind::Response);
    let frame = match encode_frame(session.header.as_mut(), response) {
        Ok(frame) => frame.freeze(),
        Err(e) => {
            warn!(
                "response serialize error: service={}, method={}, msg_id={}, error={e}",
                session.header.service(),
                session.header.method(),
                session.header.id()
            );
            metrics::inc_errors();
            return;
        }
    };

    let ctx = ReplyContext {
        service: session.header.service().to_owned(),
        method: session.header.method().to_owned(),
        id: session.header.id(),
        connection: session.connection,
    };
    session.transport.send(
        session.connection,
        frame,
        Box::new(move |result| match result {
            Ok(()) => {
                debug!(
                    "response sent: service={}, method={}, msg_id={}, connection={}",
                    ctx.service, ctx.method, ctx.id, ctx.connection
                );
                metrics::inc_frames(Direction::Outbound);
            }
            Err(e) => {
                warn!(
                    "response send error: service={}, method={}, msg_id={}, connection={}, \
                     error={e}",
                    ctx.service, ctx.method, ctx.id, ctx.connection
                );
                metrics::inc_errors();
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wirecall_testing::logger;

    use super::*;
    use crate::{header::StandardHeader, message::RawMessage, test_helpers::RecordingTransport};

    #[test]
    fn frame_is_header_then_payload() {
        let mut header = StandardHeader::new(7, FrameKind::Response, "S", "M");
        let frame = encode_frame(&mut header, &RawMessage::new(*b"abc")).expect("encode");

        let mut parsed = StandardHeader::default();
        let header_len = parsed
            .parse(&frame)
            .expect("valid header")
            .expect("complete header");
        assert_eq!(parsed.follow_bytes(), 3);
        assert_eq!(&frame[header_len..], b"abc");
    }

    #[test]
    fn reply_reuses_request_identity() {
        let transport = Arc::new(RecordingTransport::default());
        let session = Session {
            connection: ConnectionId::new(3),
            transport: transport.clone(),
            header: Box::new(StandardHeader::new(42, FrameKind::Request, "S", "M")),
        };
        send_reply(session, &RawMessage::new(*b"ok"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let (connection, frame) = &sent[0];
        assert_eq!(*connection, ConnectionId::new(3));

        let mut parsed = StandardHeader::default();
        let header_len = parsed
            .parse(frame)
            .expect("valid header")
            .expect("complete header");
        assert_eq!(parsed.kind(), FrameKind::Response);
        assert_eq!(parsed.id(), 42);
        assert_eq!((parsed.service(), parsed.method()), ("S", "M"));
        assert_eq!(&frame[header_len..], b"ok");
    }

    #[test]
    fn failed_send_is_logged() {
        let mut log = logger();
        let transport = Arc::new(RecordingTransport::failing());
        let session = Session {
            connection: ConnectionId::new(1),
            transport: transport.clone(),
            header: Box::new(StandardHeader::new(9, FrameKind::Request, "S", "M")),
        };
        send_reply(session, &RawMessage::new(*b"x"));

        let mut found = false;
        while let Some(record) = log.pop() {
            if record.level() == log::Level::Warn && record.args().contains("response send error") {
                assert!(record.args().contains("msg_id=9"));
                found = true;
            }
        }
        assert!(found, "send failure not logged");
    }
}
