//! Stream identifiers and connection roles.
//!
//! Identifiers follow the QUIC numbering scheme: the two low bits encode who
//! opened the stream and whether it is bidirectional, so consecutive streams
//! of the same kind are `STREAM_ID_STRIDE` apart.

use std::fmt;

/// Identifier of one logical exchange on the connection.
pub type StreamId = u64;

/// Identifier of a server push offer. Separate numbering space from streams.
pub type PushId = u64;

/// One past the largest identifier a QUIC varint can carry. Used as the
/// "no stream" sentinel.
pub const MAX_STREAM_ID: StreamId = 1 << 62;

/// Distance between consecutive identifiers of the same stream kind.
pub const STREAM_ID_STRIDE: StreamId = 4;

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Upstream role: we open requests (client).
    Initiator,
    /// Downstream role: we answer requests and may push (server).
    Responder,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Initiator => f.write_str("upstream"),
            Direction::Responder => f.write_str("downstream"),
        }
    }
}

/// Stream type encoded in the two low bits of a stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    ClientBidirectional,
    ServerBidirectional,
    ClientUnidirectional,
    ServerUnidirectional,
}

impl StreamKind {
    /// Classify a stream identifier.
    pub fn of(stream_id: StreamId) -> Self {
        match stream_id & 0x3 {
            0x0 => StreamKind::ClientBidirectional,
            0x1 => StreamKind::ServerBidirectional,
            0x2 => StreamKind::ClientUnidirectional,
            _ => StreamKind::ServerUnidirectional,
        }
    }

    pub fn is_bidirectional(self) -> bool {
        matches!(
            self,
            StreamKind::ClientBidirectional | StreamKind::ServerBidirectional
        )
    }

    /// True when the stream was opened by the side playing `direction`.
    pub fn initiated_by(self, direction: Direction) -> bool {
        match self {
            StreamKind::ClientBidirectional | StreamKind::ClientUnidirectional => {
                direction == Direction::Initiator
            }
            StreamKind::ServerBidirectional | StreamKind::ServerUnidirectional => {
                direction == Direction::Responder
            }
        }
    }
}

/// Request streams opened by the client: the only kind a responder counts
/// towards its GOAWAY boundary.
pub fn is_client_bidirectional(stream_id: StreamId) -> bool {
    StreamKind::of(stream_id) == StreamKind::ClientBidirectional
}
