#![doc(html_root_url = "https://docs.rs/wirecall/latest")]
//! Server-side dispatch core for a framed RPC protocol.
//!
//! Bytes arriving on a connection are split into frames, each frame is routed
//! to a registered [`Service`](service::Service) method, and any response is
//! framed and handed back to the transport. Long bursts of frames yield to
//! the Tokio scheduler so one busy connection cannot starve the others.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wirecall::{server::Server, service::RpcService};
//!
//! # #[tokio::main]
//! # async fn main() -> wirecall::Result<()> {
//! let mut server = Server::new();
//! server.register_service(Arc::new(
//!     RpcService::new("Echo").typed_method("echo", |code: i32| Some(code))?,
//! ))?;
//! server.listen("tcp://127.0.0.1:48080")?;
//! server.run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
mod fairness;
pub mod header;
pub mod message;
pub mod metrics;
pub mod prelude;
pub mod registrar;
pub mod registry;
pub mod reply;
pub mod server;
pub mod service;
pub mod session;
#[cfg(test)]
mod test_helpers;
pub mod transport;

pub use dispatch::{DispatchError, Dispatcher};
pub use error::{Error, Result};
pub use header::{FrameHeader, FrameKind, StandardHeader};
pub use message::Message;
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_DROPPED, FRAMES_PROCESSED};
pub use server::Server;
pub use service::{RpcService, Service};
pub use session::{ConnectionId, Session};
