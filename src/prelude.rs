//! Optional convenience imports for building a `wirecall` server.
//!
//! Only the types needed to register services and start serving are
//! re-exported. Import everything else from its owning module.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wirecall::prelude::*;
//!
//! fn build() -> Result<Server> {
//!     let server = Server::new();
//!     server.register_service(Arc::new(RpcService::new("Echo")))?;
//!     Ok(server)
//! }
//! ```

pub use crate::{
    config::{FairnessConfig, ServerOptions, TransportOptions},
    error::{Error, Result},
    message::{BincodeMessage, Message, RawMessage},
    server::Server,
    service::{RpcService, Service, ServiceError},
};
