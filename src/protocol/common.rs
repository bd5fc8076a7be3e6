//! BARE message framing, used for the session greeting
// (c) 2025 Ross Younger
//!
//! The greeting messages are sent in two parts:
//!
//! * [`MessageHeader`]
//! * The encoded message
//!
//! Both are encoded using [BARE]. Once the greeting is complete, the connection switches to
//! the [frame](super::frame) format.
//!
//! [BARE]: https://www.ietf.org/archive/id/draft-devault-bare-11.html

use anyhow::Error;
use bytes::BytesMut;
use serde_bare::error::Error as sbError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Framing header used on the wire for greeting messages
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq, Debug, Default, Clone, Copy)]
pub struct MessageHeader {
    /// Size of the payload that follows the header
    pub size: u32,
}

impl MessageHeader {
    /// The on-wire size of this struct, which is fixed (any change would constitute a breaking protocol change)
    pub const SIZE: u32 = 4;
}
impl ProtocolMessage for MessageHeader {}

/// Provides I/O functions for BARE-encoded protocol structs.
///
/// Callers are expected to use the `..._framed` functions, which include framing.
///
/// N.B. Message structs are not expected to override the provided implementations.
pub trait ProtocolMessage
where
    Self: serde::Serialize + serde::de::DeserializeOwned + Sync,
{
    /// Specifies an absolute limit on the wire encoding of this type.
    /// The `from_..._framed` functions reject any attempts to deserialise
    /// a message with a header frame longer than the given value for the type.
    const WIRE_ENCODING_LIMIT: u32 = 65536;

    /// Checks the passed-in size against this type's [`WIRE_ENCODING_LIMIT`](Self::WIRE_ENCODING_LIMIT).
    fn check_size(size: u32) -> Result<(), Error> {
        anyhow::ensure!(
            size <= Self::WIRE_ENCODING_LIMIT,
            "Wire message size {} was too long for {} (limit: {})",
            size,
            std::any::type_name::<Self>(),
            Self::WIRE_ENCODING_LIMIT
        );
        Ok(())
    }

    /// Creates this struct from a slice of bytes.
    /// The slice must be the correct size for the payload (that's what [`MessageHeader`] is for).
    fn from_slice(slice: &[u8]) -> Result<Self, sbError> {
        serde_bare::from_slice(slice)
    }

    /// Serializes this struct into a vector of bytes
    fn to_vec(&self) -> Result<Vec<u8>, sbError> {
        serde_bare::to_vec(&self)
    }

    /// Deserializes this struct asynchronously using a given number of bytes from an async reader.
    fn from_reader_async<R>(
        reader: &mut R,
        size: u32,
    ) -> impl std::future::Future<Output = Result<Self, Error>> + Send
    where
        R: AsyncReadExt + std::marker::Unpin + Send,
    {
        async move {
            let mut buffer = BytesMut::zeroed(usize::try_from(size)?);
            let _ = reader.read_exact(&mut buffer).await?;
            Ok(serde_bare::from_slice(&buffer)?)
        }
    }

    /// Deserializes this struct asynchronously from an async reader by reading a [`MessageHeader`], then this struct as payload.
    ///
    /// This function checks the struct's [`WIRE_ENCODING_LIMIT`](Self::WIRE_ENCODING_LIMIT).
    fn from_reader_async_framed<R>(
        reader: &mut R,
    ) -> impl std::future::Future<Output = Result<Self, Error>> + Send
    where
        R: AsyncReadExt + std::marker::Unpin + Send,
    {
        async {
            let header = MessageHeader::from_reader_async(reader, MessageHeader::SIZE).await?;
            Self::check_size(header.size)?;
            Self::from_reader_async(reader, header.size).await
        }
    }

    /// Serializes this struct asynchronously into an async writer by writing a [`MessageHeader`], then this struct as payload
    fn to_writer_async_framed<W>(
        &self,
        writer: &mut W,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send
    where
        W: AsyncWriteExt + std::marker::Unpin + Send,
    {
        async {
            let vec = self.to_vec()?;
            let header = MessageHeader {
                size: vec.len().try_into()?,
            }
            .to_vec()?;
            writer.write_all(&header).await?;
            writer.write_all(&vec).await?;
            Ok(writer.flush().await?)
        }
    }
}
