//! Dispatch loop behaviour observed through an in-memory transport.
//!
//! Frames are fed to a [`Dispatcher`] in chunks the way a transport would,
//! and replies are decoded from what the recording transport captured.

use std::sync::Arc;

use proptest::prelude::*;
use rstest::{fixture, rstest};
use wirecall::{
    ConnectionId,
    DispatchError,
    Dispatcher,
    FrameHeader,
    FrameKind,
    Message,
    config::FairnessConfig,
    message::{BincodeMessage, RawMessage},
    registry::ServiceRegistry,
    service::RpcService,
    transport::Transport,
};
use wirecall_testing::{
    CountingYield,
    DriveOutcome,
    LoggerHandle,
    RecordingTransport,
    decode_frame,
    decode_frames,
    drive_chunks,
    logger,
    raw_frame,
    request,
};

const CONN: ConnectionId = ConnectionId::new(1);

fn identity(payload: &[u8]) -> wirecall::service::MethodResult {
    Ok(Some(Box::new(RawMessage::new(payload)) as Box<dyn Message>))
}

struct Harness {
    dispatcher: Dispatcher,
    recorder: Arc<RecordingTransport>,
    transport: Arc<dyn Transport>,
    yields: Arc<CountingYield>,
}

impl Harness {
    async fn feed<C: AsRef<[u8]>>(&self, chunks: impl IntoIterator<Item = C>) -> DriveOutcome {
        drive_chunks(&self.dispatcher, &self.transport, CONN, chunks).await
    }
}

fn build_harness() -> Harness {
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(Arc::new(
            RpcService::new("S")
                .method("M", identity)
                .expect("register M")
                .typed_method("Double", |n: u64| Some(n * 2))
                .expect("register Double")
                .method("Unencodable", |_: &[u8]| {
                    Ok(Some(Box::new(BincodeMessage::<u32>::empty()) as Box<dyn Message>))
                })
                .expect("register Unencodable"),
        ))
        .expect("register S");
    let dispatcher = Dispatcher::new(registry);
    let yields = CountingYield::new();
    dispatcher.set_yield_point(yields.clone());
    let recorder = RecordingTransport::new();
    Harness {
        dispatcher,
        transport: recorder.clone(),
        recorder,
        yields,
    }
}

#[fixture]
fn harness() -> Harness { build_harness() }

#[rstest]
#[tokio::test]
async fn two_way_round_trip(harness: Harness) {
    let frame = raw_frame(42, FrameKind::Request, "S", "M", b"hello");
    let outcome = harness.feed([frame]).await;
    assert!(outcome.error.is_none());
    assert!(outcome.pending.is_empty());

    let reply = decode_frame(&harness.recorder.sent_bytes(CONN));
    assert_eq!(reply.header.kind(), FrameKind::Response);
    assert_eq!(reply.header.id(), 42);
    assert_eq!((reply.header.service(), reply.header.method()), ("S", "M"));
    assert_eq!(&reply.payload[..], b"hello");
}

#[rstest]
#[tokio::test]
async fn typed_method_round_trip(harness: Harness) {
    let frame = request(7, FrameKind::Request, "S", "Double", 21_u64);
    harness.feed([frame]).await;
    let reply = decode_frame(&harness.recorder.sent_bytes(CONN));
    assert_eq!(reply.value::<u64>(), 42);
}

#[rstest]
#[tokio::test]
async fn oneway_requests_never_reply(harness: Harness) {
    let frames: Vec<_> = (0..5)
        .map(|id| raw_frame(id, FrameKind::OnewayRequest, "S", "M", b"fire"))
        .collect();
    let outcome = harness.feed([frames.concat()]).await;
    assert!(outcome.error.is_none());
    assert!(outcome.pending.is_empty());
    assert!(harness.recorder.sent().is_empty());
}

#[rstest]
#[tokio::test]
async fn partial_frame_is_left_buffered(harness: Harness) {
    let frame = raw_frame(1, FrameKind::Request, "S", "M", b"payload");
    for cut in 0..frame.len() {
        let consumed = harness
            .dispatcher
            .receive(&harness.transport, CONN, &frame[..cut])
            .await
            .expect("partial input is not an error");
        assert_eq!(consumed, 0, "consumed bytes of a frame cut at {cut}");
    }
    assert!(harness.recorder.sent().is_empty());

    let consumed = harness
        .dispatcher
        .receive(&harness.transport, CONN, &frame)
        .await
        .expect("complete frame");
    assert_eq!(consumed, frame.len());
    assert_eq!(harness.recorder.sent().len(), 1);
}

#[rstest]
#[tokio::test]
async fn unknown_service_stops_the_read(harness: Harness) {
    let mut stream = raw_frame(1, FrameKind::Request, "S", "M", b"before");
    let bad = raw_frame(2, FrameKind::Request, "Missing", "M", b"");
    stream.extend(&bad);
    stream.extend(raw_frame(3, FrameKind::Request, "S", "M", b"after"));

    let outcome = harness.feed([stream]).await;
    assert!(matches!(
        outcome.error,
        Some(DispatchError::UnknownService { ref service, id: 2 }) if service == "Missing"
    ));
    let replies = decode_frames(&harness.recorder.sent_bytes(CONN));
    let ids: Vec<_> = replies.iter().map(|r| r.header.id()).collect();
    assert_eq!(ids, vec![1]);
}

#[rstest]
#[tokio::test]
async fn unknown_method_is_dropped_and_logged(harness: Harness, mut logger: LoggerHandle) {
    let mut stream = raw_frame(1, FrameKind::Request, "S", "Nope", b"");
    stream.extend(raw_frame(2, FrameKind::Request, "S", "M", b"next"));

    let outcome = harness.feed([stream]).await;
    assert!(outcome.error.is_none());
    assert!(outcome.pending.is_empty());

    let replies = decode_frames(&harness.recorder.sent_bytes(CONN));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].header.id(), 2);
    assert!(logger.contains(log::Level::Warn, "method=Nope"));
}

#[rstest]
#[tokio::test]
async fn undecodable_request_is_dropped(harness: Harness) {
    let frame = raw_frame(1, FrameKind::Request, "S", "Double", &[]);
    let outcome = harness.feed([frame]).await;
    assert!(outcome.error.is_none());
    assert!(harness.recorder.sent().is_empty());
}

#[rstest]
#[tokio::test]
async fn unencodable_response_is_logged_and_skipped(harness: Harness, mut logger: LoggerHandle) {
    let mut stream = raw_frame(1, FrameKind::Request, "S", "Unencodable", b"");
    stream.extend(raw_frame(2, FrameKind::Request, "S", "M", b"next"));

    let outcome = harness.feed([stream]).await;
    assert!(outcome.error.is_none());
    assert!(outcome.pending.is_empty());

    let replies = decode_frames(&harness.recorder.sent_bytes(CONN));
    let ids: Vec<_> = replies.iter().map(|r| r.header.id()).collect();
    assert_eq!(ids, vec![2]);
    assert!(logger.contains(log::Level::Warn, "response serialize error"));
}

#[rstest]
#[tokio::test]
async fn long_bursts_yield_periodically(harness: Harness) {
    let frames: Vec<u8> = (0..10_000)
        .flat_map(|id| raw_frame(id, FrameKind::OnewayRequest, "S", "M", b""))
        .collect();
    let consumed = harness
        .dispatcher
        .receive(&harness.transport, CONN, &frames)
        .await
        .expect("receive burst");
    assert_eq!(consumed, frames.len());
    assert!(harness.yields.count() >= 10_000 / 256);
    assert_eq!(harness.yields.count(), 10_000 / 256);
}

#[rstest]
#[case(1, 10, 10)]
#[case(4, 10, 2)]
#[case(256, 10, 1)]
#[case(0, 10, 1)]
#[tokio::test]
async fn yield_count_follows_threshold(
    harness: Harness,
    #[case] frames_per_yield: usize,
    #[case] frames: u64,
    #[case] expected: usize,
) {
    harness.dispatcher.set_fairness(FairnessConfig {
        frames_per_yield,
        time_slice: None,
    });
    let data: Vec<u8> = (0..frames)
        .flat_map(|id| raw_frame(id, FrameKind::OnewayRequest, "S", "M", b""))
        .collect();
    harness
        .dispatcher
        .receive(&harness.transport, CONN, &data)
        .await
        .expect("receive");
    assert_eq!(harness.yields.count(), expected);
}

fn reply_ids(chunks: &[Vec<u8>]) -> (Vec<u64>, Vec<Vec<u8>>, usize) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    let h = build_harness();
    let outcome = rt.block_on(h.feed(chunks));
    assert!(outcome.error.is_none());
    let replies = decode_frames(&h.recorder.sent_bytes(CONN));
    (
        replies.iter().map(|r| r.header.id()).collect(),
        replies.iter().map(|r| r.payload.to_vec()).collect(),
        outcome.pending.len(),
    )
}

prop_compose! {
    fn chunked_stream()
        (payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..12))
        (cuts in proptest::collection::vec(any::<proptest::sample::Index>(), 0..16), payloads in Just(payloads))
        -> (Vec<Vec<u8>>, Vec<Vec<u8>>)
    {
        let stream: Vec<u8> = payloads
            .iter()
            .enumerate()
            .flat_map(|(id, p)| raw_frame(id as u64, FrameKind::Request, "S", "M", p))
            .collect();
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();
        let mut chunks = Vec::new();
        let mut start = 0;
        for point in points {
            chunks.push(stream[start..point].to_vec());
            start = point;
        }
        chunks.push(stream[start..].to_vec());
        (chunks, payloads)
    }
}

proptest! {
    #[test]
    fn chunking_does_not_change_dispatch((chunks, payloads) in chunked_stream()) {
        let (ids, replies, pending) = reply_ids(&chunks);
        prop_assert_eq!(ids, (0..payloads.len() as u64).collect::<Vec<_>>());
        prop_assert_eq!(replies, payloads);
        prop_assert_eq!(pending, 0);
    }
}
