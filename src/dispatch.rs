//! Inbound frame extraction and dispatch.
//!
//! [`Dispatcher`] receives the buffered bytes of a connection, splits off
//! every complete frame at the front, routes each to its service and method,
//! and reports how many bytes it consumed. An incomplete trailing frame is
//! left for the transport to redeliver once more bytes arrive.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use log::{debug, trace, warn};
use thiserror::Error;

use crate::{
    config::FairnessConfig,
    fairness::Fairness,
    header::{HeaderError, HeaderFactory, StandardHeader},
    metrics::{self, Direction},
    registry::ServiceRegistry,
    reply::send_reply,
    session::{ConnectionId, Session},
    transport::{ReceiveHandler, Transport},
};

/// Errors that require the connection to be closed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// A frame addressed a service that is not registered.
    #[error("unknown service `{service}` (msg_id={id})")]
    UnknownService { service: String, id: u64 },
    /// A frame header could not be parsed.
    #[error("malformed frame header: {0}")]
    Header(#[from] HeaderError),
}

/// Cooperative scheduling point used between bursts of frames.
#[async_trait]
pub trait YieldPoint: Send + Sync {
    /// Give other tasks a chance to run.
    async fn yield_now(&self);
}

/// [`YieldPoint`] backed by [`tokio::task::yield_now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioYield;

#[async_trait]
impl YieldPoint for TokioYield {
    async fn yield_now(&self) { tokio::task::yield_now().await; }
}

/// Settings consulted once per receive invocation.
#[derive(Clone)]
pub struct DispatchSettings {
    /// Creates a fresh header for every frame.
    pub header_factory: HeaderFactory,
    /// Yield policy for long bursts.
    pub fairness: FairnessConfig,
    /// Where the dispatcher yields.
    pub yield_point: Arc<dyn YieldPoint>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            header_factory: StandardHeader::factory(),
            fairness: FairnessConfig::default(),
            yield_point: Arc::new(TokioYield),
        }
    }
}

impl fmt::Debug for DispatchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchSettings")
            .field("header_factory", &"<factory>")
            .field("fairness", &self.fairness)
            .field("yield_point", &"<yield>")
            .finish()
    }
}

/// Routes inbound frames to registered services.
///
/// Settings may be replaced at any time; a receive invocation already in
/// progress keeps using the snapshot it started with.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    settings: RwLock<Arc<DispatchSettings>>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry` with default settings.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            settings: RwLock::new(Arc::new(DispatchSettings::default())),
        }
    }

    /// Registry the dispatcher routes to.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> { &self.registry }

    /// Snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> Arc<DispatchSettings> {
        Arc::clone(&self.settings.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, f: impl FnOnce(&mut DispatchSettings)) {
        let mut guard = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = DispatchSettings::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Replace the header factory used for subsequent receive invocations.
    pub fn set_header_factory(&self, factory: HeaderFactory) {
        self.update(|s| s.header_factory = factory);
    }

    /// Replace the fairness policy used for subsequent receive invocations.
    pub fn set_fairness(&self, fairness: FairnessConfig) { self.update(|s| s.fairness = fairness); }

    /// Replace the yield point used for subsequent receive invocations.
    pub fn set_yield_point(&self, yield_point: Arc<dyn YieldPoint>) {
        self.update(|s| s.yield_point = yield_point);
    }

    /// Extract and dispatch every complete frame at the front of `data`.
    ///
    /// Returns the number of bytes consumed, which always ends on a frame
    /// boundary. Bytes of an incomplete frame are never consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when a frame addresses an unknown service
    /// or carries a malformed header. Frames after the failing one are not
    /// processed and the connection should be closed.
    pub async fn receive(
        &self,
        transport: &Arc<dyn Transport>,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<usize, DispatchError> {
        let settings = self.settings();
        let mut fairness = Fairness::new(settings.fairness);
        let mut consumed = 0;

        while consumed < data.len() {
            let window = &data[consumed..];
            let mut header = (settings.header_factory)();
            let header_len = match header.parse(window) {
                Ok(Some(len)) if len > 0 => len,
                Ok(_) => break,
                Err(e) => {
                    warn!("malformed frame header: connection={connection}, error={e}");
                    metrics::inc_errors();
                    return Err(e.into());
                }
            };
            let Some(frame_len) = header_len.checked_add(header.follow_bytes()) else {
                break;
            };
            if frame_len > window.len() {
                break;
            }

            let session = Session {
                connection,
                transport: Arc::clone(transport),
                header,
            };
            self.dispatch(session, &window[header_len..frame_len])?;
            consumed += frame_len;

            fairness.after_frame();
            if fairness.should_yield() {
                settings.yield_point.yield_now().await;
                fairness.yielded();
            }
        }

        trace!(
            "receive finished: connection={connection}, frames={}, consumed={consumed}, \
             buffered={}",
            fairness.total(),
            data.len()
        );
        if fairness.needs_final_yield() {
            settings.yield_point.yield_now().await;
        }
        Ok(consumed)
    }

    /// Route one complete frame to its service and method.
    ///
    /// Unknown methods, undecodable requests and handler errors drop the
    /// request without a reply. Only an unknown service is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownService`] if no service is registered
    /// under the frame's service name.
    pub fn dispatch(&self, session: Session, payload: &[u8]) -> Result<(), DispatchError> {
        let header = &session.header;
        let Some(service) = self.registry.get(header.service()) else {
            warn!(
                "unknown service: service={}, method={}, msg_id={}, connection={}",
                header.service(),
                header.method(),
                header.id(),
                session.connection
            );
            metrics::inc_errors();
            return Err(DispatchError::UnknownService {
                service: header.service().to_owned(),
                id: header.id(),
            });
        };
        metrics::inc_frames(Direction::Inbound);

        let response = match service.call_method(header.method(), payload) {
            Ok(Some(response)) => response,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(
                    "request dropped: service={}, method={}, msg_id={}, error={e}",
                    header.service(),
                    header.method(),
                    header.id()
                );
                metrics::inc_dropped();
                return Ok(());
            }
        };

        if header.kind().is_oneway() {
            debug!(
                "oneway response discarded: service={}, method={}, msg_id={}",
                header.service(),
                header.method(),
                header.id()
            );
            return Ok(());
        }
        send_reply(session, response.as_ref());
        Ok(())
    }
}

#[async_trait]
impl ReceiveHandler for Dispatcher {
    async fn on_receive(
        &self,
        transport: &Arc<dyn Transport>,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<usize, DispatchError> {
        self.receive(transport, connection, data).await
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        header::{FrameHeader, FrameKind},
        message::{Message, RawMessage},
        reply::encode_frame,
        service::RpcService,
        test_helpers::{CountingYield, RecordingTransport},
    };

    fn frame(id: u64, kind: FrameKind, service: &str, method: &str, payload: &[u8]) -> Vec<u8> {
        let mut header = StandardHeader::new(id, kind, service, method);
        encode_frame(&mut header, &RawMessage::new(payload))
            .expect("encode frame")
            .to_vec()
    }

    fn echo() -> Arc<RpcService> {
        Arc::new(
            RpcService::new("S")
                .method("M", |p: &[u8]| Ok(Some(Box::new(RawMessage::new(p)) as Box<dyn Message>)))
                .expect("register M"),
        )
    }

    struct Harness {
        dispatcher: Dispatcher,
        recorder: Arc<RecordingTransport>,
        transport: Arc<dyn Transport>,
        yields: Arc<CountingYield>,
    }

    #[fixture]
    fn harness() -> Harness {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(echo()).expect("register S");
        let dispatcher = Dispatcher::new(registry);
        let yields = Arc::new(CountingYield::default());
        dispatcher.set_yield_point(yields.clone());
        let recorder = Arc::new(RecordingTransport::default());
        Harness {
            dispatcher,
            transport: recorder.clone(),
            recorder,
            yields,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn consumes_complete_frames_only(harness: Harness) {
        let mut data = frame(1, FrameKind::Request, "S", "M", b"one");
        let first = data.len();
        data.extend(frame(2, FrameKind::Request, "S", "M", b"two"));
        data.truncate(data.len() - 1);

        let consumed = harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &data)
            .await
            .expect("receive");
        assert_eq!(consumed, first);
        assert_eq!(harness.recorder.sent().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn empty_input_consumes_nothing_and_yields_once(harness: Harness) {
        let consumed = harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &[])
            .await
            .expect("receive");
        assert_eq!(consumed, 0);
        assert_eq!(harness.yields.count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_service_stops_processing(harness: Harness) {
        let mut data = frame(1, FrameKind::Request, "Nope", "M", b"");
        data.extend(frame(2, FrameKind::Request, "S", "M", b"late"));

        let err = harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &data)
            .await
            .expect_err("unknown service is fatal");
        assert!(matches!(err, DispatchError::UnknownService { ref service, id: 1 } if service == "Nope"));
        assert!(harness.recorder.sent().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_header_is_fatal(harness: Harness) {
        let mut data = frame(1, FrameKind::Request, "S", "M", b"x");
        data[0] ^= 0xff;
        let err = harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &data)
            .await
            .expect_err("bad magic is fatal");
        assert!(matches!(err, DispatchError::Header(HeaderError::BadMagic { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn oneway_request_gets_no_reply(harness: Harness) {
        let data = frame(5, FrameKind::OnewayRequest, "S", "M", b"x");
        let consumed = harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &data)
            .await
            .expect("receive");
        assert_eq!(consumed, data.len());
        assert!(harness.recorder.sent().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn settings_replacement_applies_to_next_invocation(harness: Harness) {
        harness.dispatcher.set_fairness(FairnessConfig {
            frames_per_yield: 1,
            time_slice: None,
        });
        let mut data = Vec::new();
        for id in 0..3 {
            data.extend(frame(id, FrameKind::Request, "S", "M", b""));
        }
        harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &data)
            .await
            .expect("receive");
        assert_eq!(harness.yields.count(), 3);
        assert_eq!(harness.dispatcher.settings().fairness.frames_per_yield, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn custom_header_factory_is_used(harness: Harness) {
        #[derive(Debug, Default)]
        struct Never;
        impl FrameHeader for Never {
            fn parse(&mut self, _: &[u8]) -> Result<Option<usize>, HeaderError> { Ok(None) }
            fn byte_size(&self) -> usize { 0 }
            fn serialize(&self, _: &mut [u8]) -> Result<(), HeaderError> { Ok(()) }
            fn follow_bytes(&self) -> usize { 0 }
            fn set_follow_bytes(&mut self, _: usize) {}
            fn id(&self) -> u64 { 0 }
            fn kind(&self) -> FrameKind { FrameKind::Request }
            fn set_kind(&mut self, _: FrameKind) {}
            fn service(&self) -> &str { "" }
            fn method(&self) -> &str { "" }
        }

        harness
            .dispatcher
            .set_header_factory(Arc::new(|| Box::new(Never) as Box<dyn FrameHeader>));
        let data = frame(1, FrameKind::Request, "S", "M", b"x");
        let consumed = harness
            .dispatcher
            .receive(&harness.transport, ConnectionId::new(1), &data)
            .await
            .expect("receive");
        assert_eq!(consumed, 0);
    }
}
