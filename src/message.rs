//! Payload codecs.
//!
//! [`Message`] is the seam between the dispatch core and whatever encodes a
//! method's arguments and results. Two codecs ship with the crate:
//! [`BincodeMessage`] for structured values and [`RawMessage`] for opaque
//! byte payloads.

use bincode::{
    Decode,
    Encode,
    config,
    enc::write::SizeWriter,
    error::{DecodeError, EncodeError},
};
use thiserror::Error;

/// Errors reported by payload codecs.
///
/// Codec failures are never fatal for a connection; callers log them and
/// abandon the operation at hand.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The message does not wrap a value.
    #[error("message has no underlying value")]
    Empty,
    /// The destination buffer is shorter than [`Message::byte_size`].
    #[error("buffer of {available} bytes cannot hold {required}-byte message")]
    BufferTooSmall { required: usize, available: usize },
    /// Encoding the value failed.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    /// Decoding the value failed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// A method argument or result that can be written to and read from a frame payload.
pub trait Message: Send {
    /// Exact number of bytes [`serialize`](Self::serialize) will write.
    ///
    /// Returns zero when the message cannot be encoded.
    fn byte_size(&self) -> usize;

    /// Encode the message into the front of `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if `dst` is too small or encoding fails.
    fn serialize(&self, dst: &mut [u8]) -> Result<(), CodecError>;

    /// Replace the message contents with the value decoded from `src`,
    /// returning the number of bytes read.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if `src` is malformed or the message is empty.
    fn parse(&mut self, src: &[u8]) -> Result<usize, CodecError>;
}

impl<M: Message + ?Sized> Message for Box<M> {
    fn byte_size(&self) -> usize { (**self).byte_size() }

    fn serialize(&self, dst: &mut [u8]) -> Result<(), CodecError> { (**self).serialize(dst) }

    fn parse(&mut self, src: &[u8]) -> Result<usize, CodecError> { (**self).parse(src) }
}

enum Slot<'a, T> {
    Empty,
    Borrowed(&'a mut T),
    Owned(Box<T>),
}

/// [`Message`] adapter encoding values with `bincode`'s standard configuration.
///
/// The adapter either borrows a caller-owned value or owns one outright.
/// Dropping the adapter only drops an owned value.
///
/// ```
/// use wirecall::message::{BincodeMessage, Message};
///
/// let mut value = 7_u32;
/// let msg = BincodeMessage::borrowed(&mut value);
/// let mut buf = vec![0; msg.byte_size()];
/// msg.serialize(&mut buf).expect("encode");
///
/// let mut decoded = BincodeMessage::owned(0_u32);
/// decoded.parse(&buf).expect("decode");
/// assert_eq!(decoded.get(), Some(&7));
/// ```
pub struct BincodeMessage<'a, T> {
    slot: Slot<'a, T>,
}

impl<'a, T> BincodeMessage<'a, T> {
    /// Wrap a caller-owned value without taking ownership.
    #[must_use]
    pub fn borrowed(value: &'a mut T) -> Self {
        Self {
            slot: Slot::Borrowed(value),
        }
    }

    /// Adapter with no underlying value; every codec operation fails.
    #[must_use]
    pub fn empty() -> Self { Self { slot: Slot::Empty } }

    /// Take ownership of `value`.
    #[must_use]
    pub fn owned(value: T) -> Self {
        Self {
            slot: Slot::Owned(Box::new(value)),
        }
    }

    /// Borrow the wrapped value, if any.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        match &self.slot {
            Slot::Empty => None,
            Slot::Borrowed(value) => Some(&**value),
            Slot::Owned(value) => Some(value.as_ref()),
        }
    }

    /// Returns `true` if dropping the adapter drops the value.
    #[must_use]
    pub fn is_owned(&self) -> bool { matches!(self.slot, Slot::Owned(_)) }

    /// Consume the adapter, returning the value if it was owned.
    #[must_use]
    pub fn into_inner(self) -> Option<T> {
        match self.slot {
            Slot::Owned(value) => Some(*value),
            Slot::Empty | Slot::Borrowed(_) => None,
        }
    }
}

impl<T: Decode<()>> BincodeMessage<'static, T> {
    /// Decode an owned message from `src`, returning it with the bytes read.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `src` is not a valid encoding of `T`.
    pub fn decode(src: &[u8]) -> Result<(Self, usize), CodecError> {
        let (value, read) = bincode::decode_from_slice::<T, _>(src, config::standard())?;
        Ok((Self::owned(value), read))
    }
}

impl<T> Message for BincodeMessage<'_, T>
where
    T: Encode + Decode<()> + Send,
{
    fn byte_size(&self) -> usize {
        let Some(value) = self.get() else {
            return 0;
        };
        let mut writer = SizeWriter::default();
        match bincode::encode_into_writer(value, &mut writer, config::standard()) {
            Ok(()) => writer.bytes_written,
            Err(_) => 0,
        }
    }

    fn serialize(&self, dst: &mut [u8]) -> Result<(), CodecError> {
        let value = self.get().ok_or(CodecError::Empty)?;
        let required = self.byte_size();
        if dst.len() < required {
            return Err(CodecError::BufferTooSmall {
                required,
                available: dst.len(),
            });
        }
        bincode::encode_into_slice(value, dst, config::standard())?;
        Ok(())
    }

    fn parse(&mut self, src: &[u8]) -> Result<usize, CodecError> {
        if matches!(self.slot, Slot::Empty) {
            return Err(CodecError::Empty);
        }
        let (decoded, read) = bincode::decode_from_slice::<T, _>(src, config::standard())?;
        match &mut self.slot {
            Slot::Borrowed(value) => **value = decoded,
            Slot::Owned(value) => **value = decoded,
            Slot::Empty => return Err(CodecError::Empty),
        }
        Ok(read)
    }
}

/// Opaque payload copied verbatim to and from the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage(pub Vec<u8>);

impl RawMessage {
    /// Wrap `bytes` as a message.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self { Self(bytes.into()) }

    /// Borrow the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl Message for RawMessage {
    fn byte_size(&self) -> usize { self.0.len() }

    fn serialize(&self, dst: &mut [u8]) -> Result<(), CodecError> {
        let available = dst.len();
        let out = dst
            .get_mut(..self.0.len())
            .ok_or(CodecError::BufferTooSmall {
                required: self.0.len(),
                available,
            })?;
        out.copy_from_slice(&self.0);
        Ok(())
    }

    fn parse(&mut self, src: &[u8]) -> Result<usize, CodecError> {
        self.0.clear();
        self.0.extend_from_slice(src);
        Ok(src.len())
    }
}
