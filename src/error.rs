//! Canonical error and result types for the crate.
//!
//! Each module reports failures through its own enum; [`Error`] gathers them
//! for callers that drive a whole [`Server`](crate::server::Server) and only
//! need one error type.

use thiserror::Error;

use crate::{
    dispatch::DispatchError,
    header::HeaderError,
    message::CodecError,
    registrar::RegistrationError,
    registry::RegistryError,
    reply::FrameEncodeError,
    service::ServiceError,
    transport::TransportError,
};

/// Top-level error type exposed by `wirecall`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Service registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A service or its method table was rejected.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// A transport could not be bound, listened on, or written to.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Publishing the server's address failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// A connection-fatal dispatch failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// A header could not be parsed or written.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A frame could not be assembled.
    #[error(transparent)]
    FrameEncode(#[from] FrameEncodeError),
}

impl Error {
    /// Returns `true` if the error would close the connection it arose on.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool { matches!(self, Self::Dispatch(_) | Self::Header(_)) }
}

/// Canonical result alias used by `wirecall` public APIs.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Error::from(RegistryError::DuplicateService("Echo".into())), "service `Echo` was already registered", false)]
    #[case(Error::from(TransportError::AlreadyBound), "transport is already bound to a server", false)]
    #[case(
        Error::from(DispatchError::UnknownService { service: "X".into(), id: 3 }),
        "unknown service `X` (msg_id=3)",
        true
    )]
    #[case(Error::from(HeaderError::UnknownKind(9)), "unknown frame kind tag 9", true)]
    fn displays_inner_error(#[case] err: Error, #[case] expected: &str, #[case] fatal: bool) {
        assert_eq!(err.to_string(), expected);
        assert_eq!(err.is_connection_fatal(), fatal);
    }
}
