//! Error types.
//!
//! Routing failures are the demultiplexer's own. Codec and compression
//! failures come from the per-stream codecs and are forwarded untouched.

use crate::stream_id::{Direction, StreamId};

/// The demultiplexer could not route an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No codec is registered for this stream.
    #[error("no codec registered for stream {0}")]
    UnknownStream(StreamId),

    /// Ingress arrived without a preceding `set_current_stream`.
    #[error("no current stream selected for ingress")]
    NoCurrentStream,

    /// A codec for this stream is already live.
    #[error("codec for stream {0} already registered")]
    DuplicateStream(StreamId),

    /// Push identifiers are only allocated by the responder.
    #[error("push ids cannot be allocated in the {0} role")]
    PushIdNotAllowed(Direction),
}

/// Header compression failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompressionError {
    #[error("header block decode failed on stream {stream_id}: {reason}")]
    Decode { stream_id: StreamId, reason: String },
}

/// Per-stream framing failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The stream ended in the middle of a frame.
    #[error("stream ended with {0} bytes of incomplete frame")]
    Truncated(usize),

    /// A frame type that is not allowed on a request stream.
    #[error("frame type 0x{0:x} not allowed on a request stream")]
    FrameUnexpected(u64),

    #[error("malformed {0} frame")]
    MalformedFrame(&'static str),

    #[error("header block too large ({size} bytes, max {max})")]
    HeaderBlockTooLarge { size: u64, max: u64 },

    #[error("header list too large ({size} bytes, peer max {max})")]
    HeaderListTooLarge { size: u64, max: u64 },

    /// Body or trailers before the message's HEADERS.
    #[error("body or trailers before HEADERS")]
    MissingHeaders,

    #[error("egress after end of message")]
    EgressAfterEom,

    /// A header section or body after trailers, or HEADERS after body.
    #[error("{0} out of order on egress")]
    EgressOutOfOrder(&'static str),

    /// Ingress after the peer ended the stream.
    #[error("ingress after end of stream")]
    IngressAfterEof,

    #[error("push promise not allowed in the {0} role")]
    PushNotAllowed(Direction),

    #[error("value {0} does not fit in a varint")]
    VarintOverflow(u64),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// Escape hatch for codecs outside this crate.
    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// Any failure surfaced by the demultiplexer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Error {
    /// The routing failure, if this is one.
    pub fn as_routing(&self) -> Option<&RoutingError> {
        match self {
            Error::Routing(err) => Some(err),
            Error::Codec(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
