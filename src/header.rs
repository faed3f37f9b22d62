//! Frame headers and the injectable header factory.
//!
//! A header describes one frame on the wire: which service and method the
//! frame targets, its message id and kind, and how many payload bytes follow
//! it. The dispatch loop only relies on the [`FrameHeader`] contract, so an
//! alternative wire format can be plugged in through a [`HeaderFactory`]
//! without touching reassembly.

use std::{fmt, sync::Arc};

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Magic prefix identifying a [`StandardHeader`] (`"WC"`).
pub const MAGIC: u16 = 0x5743;

/// Longest service or method name accepted by [`StandardHeader`].
pub const MAX_NAME_LENGTH: usize = 255;

/// Largest payload a [`StandardHeader`] may announce (16 MiB).
pub const MAX_FOLLOW_BYTES: usize = 16 * 1024 * 1024;

/// Bytes preceding the service name: magic, kind, id and the name length.
const FIXED_PREFIX_LEN: usize = 2 + 1 + 8 + 2;

/// Fixed part of the encoding, excluding the two names.
const FIXED_LEN: usize = FIXED_PREFIX_LEN + 2 + 4;

/// Kind of frame carried on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Two-way call; the caller expects a [`FrameKind::Response`].
    #[default]
    Request,
    /// Reply to an earlier request with the same message id.
    Response,
    /// Fire-and-forget call; no reply is ever sent.
    OnewayRequest,
}

impl FrameKind {
    /// Wire tag for this kind.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::OnewayRequest => 2,
        }
    }

    /// Decode a wire tag, returning `None` for unknown values.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::OnewayRequest),
            _ => None,
        }
    }

    /// Returns `true` if no reply is owed for frames of this kind.
    #[must_use]
    pub const fn is_oneway(self) -> bool { matches!(self, Self::OnewayRequest) }
}

/// Errors raised while decoding or encoding a frame header.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeaderError {
    /// The frame does not start with the expected magic value.
    #[error("bad header magic {found:#06x}")]
    BadMagic { found: u16 },
    /// The kind tag is not one of the known [`FrameKind`] values.
    #[error("unknown frame kind tag {0}")]
    UnknownKind(u8),
    /// A service or method name exceeds [`MAX_NAME_LENGTH`].
    #[error("{field} name is {len} bytes, limit is {max}")]
    NameTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    /// A service or method name is not valid UTF-8.
    #[error("{field} name is not valid UTF-8")]
    InvalidName { field: &'static str },
    /// The announced payload exceeds [`MAX_FOLLOW_BYTES`].
    #[error("declared payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    /// The destination buffer cannot hold the encoded header.
    #[error("buffer of {available} bytes cannot hold {required}-byte header")]
    BufferTooSmall { required: usize, available: usize },
}

/// Contract every wire header must satisfy for the dispatch loop.
///
/// `parse` must be side-effect free unless it succeeds: on an incomplete
/// buffer it returns `Ok(None)` and leaves the header untouched so the caller
/// can retry once more bytes arrive. A returned length of zero is treated the
/// same as `Ok(None)`.
pub trait FrameHeader: Send + Sync + fmt::Debug {
    /// Decode a header from the front of `src`.
    ///
    /// Returns the number of header bytes consumed, or `None` if `src` does
    /// not yet hold a complete header.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] if the bytes can never form a valid header.
    fn parse(&mut self, src: &[u8]) -> Result<Option<usize>, HeaderError>;

    /// Exact encoded size of the header for its current field values.
    fn byte_size(&self) -> usize;

    /// Encode the header into the first [`byte_size`](Self::byte_size) bytes of `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::BufferTooSmall`] if `dst` is too short, or a
    /// validation error if the current fields cannot be encoded.
    fn serialize(&self, dst: &mut [u8]) -> Result<(), HeaderError>;

    /// Length of the payload following the header.
    fn follow_bytes(&self) -> usize;

    /// Set the length of the payload following the header.
    fn set_follow_bytes(&mut self, len: usize);

    /// Message id used to correlate requests and responses.
    fn id(&self) -> u64;

    /// Kind of the frame.
    fn kind(&self) -> FrameKind;

    /// Change the kind of the frame, for example when turning a request into a response.
    fn set_kind(&mut self, kind: FrameKind);

    /// Target service name.
    fn service(&self) -> &str;

    /// Target method name.
    fn method(&self) -> &str;
}

/// Factory producing a fresh header for every inbound frame.
pub type HeaderFactory = Arc<dyn Fn() -> Box<dyn FrameHeader> + Send + Sync>;

/// Default header encoding, in network byte order:
///
/// ```text
/// magic:u16 kind:u8 id:u64 service_len:u16 service method_len:u16 method follow_bytes:u32
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StandardHeader {
    id: u64,
    kind: FrameKind,
    service: String,
    method: String,
    follow_bytes: usize,
}

impl StandardHeader {
    /// Create a header addressed to `service`/`method`.
    #[must_use]
    pub fn new(
        id: u64,
        kind: FrameKind,
        service: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            service: service.into(),
            method: method.into(),
            follow_bytes: 0,
        }
    }

    /// Set the announced payload length.
    #[must_use]
    pub fn with_follow_bytes(mut self, len: usize) -> Self {
        self.follow_bytes = len;
        self
    }

    /// Factory producing empty [`StandardHeader`]s.
    #[must_use]
    pub fn factory() -> HeaderFactory {
        Arc::new(|| Box::new(StandardHeader::default()) as Box<dyn FrameHeader>)
    }
}

fn checked_name_len(name: &str, field: &'static str) -> Result<u16, HeaderError> {
    let too_long = || HeaderError::NameTooLong {
        field,
        len: name.len(),
        max: MAX_NAME_LENGTH,
    };
    if name.len() > MAX_NAME_LENGTH {
        return Err(too_long());
    }
    u16::try_from(name.len()).map_err(|_| too_long())
}

/// Read a length-prefixed name, returning `None` if it is not yet complete.
fn take_name<'a>(buf: &mut &'a [u8], field: &'static str) -> Result<Option<&'a str>, HeaderError> {
    if buf.remaining() < 2 {
        return Ok(None);
    }
    let len = usize::from(buf.get_u16());
    if len > MAX_NAME_LENGTH {
        return Err(HeaderError::NameTooLong {
            field,
            len,
            max: MAX_NAME_LENGTH,
        });
    }
    if buf.remaining() < len {
        return Ok(None);
    }
    let (name, rest) = buf.split_at(len);
    *buf = rest;
    std::str::from_utf8(name)
        .map(Some)
        .map_err(|_| HeaderError::InvalidName { field })
}

impl FrameHeader for StandardHeader {
    fn parse(&mut self, src: &[u8]) -> Result<Option<usize>, HeaderError> {
        let mut buf = src;
        if buf.remaining() < FIXED_PREFIX_LEN - 2 {
            return Ok(None);
        }
        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(HeaderError::BadMagic { found: magic });
        }
        let tag = buf.get_u8();
        let kind = FrameKind::from_u8(tag).ok_or(HeaderError::UnknownKind(tag))?;
        let id = buf.get_u64();
        let Some(service) = take_name(&mut buf, "service")? else {
            return Ok(None);
        };
        let Some(method) = take_name(&mut buf, "method")? else {
            return Ok(None);
        };
        if buf.remaining() < 4 {
            return Ok(None);
        }
        let follow_bytes = buf.get_u32() as usize;
        if follow_bytes > MAX_FOLLOW_BYTES {
            return Err(HeaderError::PayloadTooLarge {
                len: follow_bytes,
                max: MAX_FOLLOW_BYTES,
            });
        }

        let consumed = src.len() - buf.remaining();
        *self = Self {
            id,
            kind,
            service: service.to_owned(),
            method: method.to_owned(),
            follow_bytes,
        };
        Ok(Some(consumed))
    }

    fn byte_size(&self) -> usize { FIXED_LEN + self.service.len() + self.method.len() }

    fn serialize(&self, dst: &mut [u8]) -> Result<(), HeaderError> {
        let required = self.byte_size();
        let available = dst.len();
        let Some(mut out) = dst.get_mut(..required) else {
            return Err(HeaderError::BufferTooSmall {
                required,
                available,
            });
        };
        let service_len = checked_name_len(&self.service, "service")?;
        let method_len = checked_name_len(&self.method, "method")?;
        let follow_bytes = u32::try_from(self.follow_bytes)
            .ok()
            .filter(|len| *len as usize <= MAX_FOLLOW_BYTES)
            .ok_or(HeaderError::PayloadTooLarge {
                len: self.follow_bytes,
                max: MAX_FOLLOW_BYTES,
            })?;

        out.put_u16(MAGIC);
        out.put_u8(self.kind.as_u8());
        out.put_u64(self.id);
        out.put_u16(service_len);
        out.put_slice(self.service.as_bytes());
        out.put_u16(method_len);
        out.put_slice(self.method.as_bytes());
        out.put_u32(follow_bytes);
        Ok(())
    }

    fn follow_bytes(&self) -> usize { self.follow_bytes }

    fn set_follow_bytes(&mut self, len: usize) { self.follow_bytes = len; }

    fn id(&self) -> u64 { self.id }

    fn kind(&self) -> FrameKind { self.kind }

    fn set_kind(&mut self, kind: FrameKind) { self.kind = kind; }

    fn service(&self) -> &str { &self.service }

    fn method(&self) -> &str { &self.method }
}
