//! Frame encoding and decoding for the bookie wire protocol.
//!
//! Messages are serialized with postcard and carried in length-delimited
//! frames (4-byte big-endian length prefix). [`frame_codec`] builds the
//! framing codec both ends of a connection use, so the frame-size limit is
//! configured in one place.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;
use tokio_util::codec::LengthDelimitedCodec;

use crate::protocol::{Request, Response};

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("Encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("Decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// An encoded message does not fit in a frame.
    #[snafu(display("Frame of {len} bytes exceeds limit of {max} bytes"))]
    FrameTooLarge {
        /// Encoded length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Encodes a value to bytes using postcard serialization.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value using postcard deserialization.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

/// Builds the length-delimited framing codec with the given frame limit.
#[must_use]
pub fn frame_codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(max_frame_size).new_codec()
}

/// Encodes a request into a frame payload, enforcing the frame limit.
///
/// # Errors
///
/// Returns `CodecError::Encode` on serialization failure and
/// `CodecError::FrameTooLarge` if the result exceeds `max_frame_size`.
pub fn encode_request(request: &Request, max_frame_size: usize) -> Result<Bytes, CodecError> {
    encode_bounded(request, max_frame_size)
}

/// Decodes a request frame.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the frame is not a valid request.
pub fn decode_request(frame: &[u8]) -> Result<Request, CodecError> {
    decode(frame)
}

/// Encodes a response into a frame payload, enforcing the frame limit.
///
/// # Errors
///
/// Returns `CodecError::Encode` on serialization failure and
/// `CodecError::FrameTooLarge` if the result exceeds `max_frame_size`.
pub fn encode_response(response: &Response, max_frame_size: usize) -> Result<Bytes, CodecError> {
    encode_bounded(response, max_frame_size)
}

/// Decodes a response frame.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the frame is not a valid response.
pub fn decode_response(frame: &[u8]) -> Result<Response, CodecError> {
    decode(frame)
}

fn encode_bounded<T: Serialize>(value: &T, max: usize) -> Result<Bytes, CodecError> {
    let bytes = encode(value)?;
    if bytes.len() > max {
        return Err(CodecError::FrameTooLarge { len: bytes.len(), max });
    }
    Ok(Bytes::from(bytes))
}
