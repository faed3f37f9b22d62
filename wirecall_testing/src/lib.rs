//! Utilities for exercising a `wirecall` dispatcher or server in tests.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use wirecall::{
//!     ConnectionId,
//!     Dispatcher,
//!     FrameKind,
//!     registry::ServiceRegistry,
//!     transport::Transport,
//! };
//! use wirecall_testing::{RecordingTransport, drive_chunks, raw_frame};
//!
//! # async fn example() {
//! let dispatcher = Dispatcher::new(Arc::new(ServiceRegistry::new()));
//! let transport: Arc<dyn Transport> = RecordingTransport::new();
//! let frame = raw_frame(1, FrameKind::Request, "Missing", "m", b"");
//! let outcome = drive_chunks(&dispatcher, &transport, ConnectionId::new(1), [frame]).await;
//! assert!(outcome.error.is_some());
//! # }
//! ```

pub mod client;
pub mod frames;
pub mod logging;
pub mod transport;

pub use client::{IO_TIMEOUT, connect, read_frames, read_until_closed};
pub use frames::{DecodedFrame, decode_frame, decode_frames, raw_frame, request};
pub use logging::{LoggerHandle, logger};
pub use transport::{CountingYield, DriveOutcome, RecordingTransport, drive_chunks};
