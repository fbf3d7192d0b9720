//! hq-demux: a sans-I/O stream demultiplexer for HTTP over multiplexed transports
//!
//! On a transport with native stream multiplexing (QUIC), every request gets
//! its own stream, but all streams on a connection share one header
//! compression context. This crate sits between the transport and the
//! per-stream codecs: it owns one codec per stream, routes ingress bytes and
//! egress generation calls to the right one, and lends every codec the
//! shared compression state for the duration of a call.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime, no sockets; you feed bytes in and
//!   drain bytes out
//! - **Typed routing errors**: Unknown streams and wrong-role push allocation
//!   are `Err`, never a panic
//! - **Shared compression**: One context and one pair of instruction streams
//!   per connection, borrowed by codecs call by call
//! - **Identifier bookkeeping**: Push id allocation plus the lowest unseen
//!   stream and push ids for GOAWAY
//! - **Pluggable codecs**: Implement [`StreamCodec`] or use the bundled
//!   HTTP/3 request-stream codec
//!
//! # Quick Start
//!
//! ```rust
//! use bytes::BytesMut;
//! use hq_demux::{Demultiplexer, Direction, Header};
//!
//! let mut demux: Demultiplexer = Demultiplexer::new(Direction::Responder);
//! demux.add_codec(0).unwrap();
//!
//! // HEADERS frame with ":method: GET" (static table index 2)
//! assert!(demux.set_current_stream(0));
//! let consumed = demux.on_ingress(&[0x01, 0x01, 0x82]).unwrap();
//! assert_eq!(consumed, 3);
//! assert_eq!(demux.current_stream(), None);
//!
//! let mut out = BytesMut::new();
//! demux
//!     .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
//!     .unwrap();
//! demux.generate_body(&mut out, 0, b"hello", None, true).unwrap();
//!
//! assert_eq!(demux.min_unseen_stream_id(), 4);
//! assert!(!demux.decoder_stream().is_empty()); // section acknowledgement
//! ```
//!
//! # Architecture
//!
//! - [`stream_id`]: identifiers, roles, stream kinds
//! - [`allocator`]: push id allocation and unseen-id bounds
//! - [`frame`]: varints and HTTP/3 frame headers
//! - [`compression`]: the connection's shared compression context
//! - [`stream_codec`]: the per-stream codec seam and the default codec
//! - [`demux`]: the demultiplexer itself
//!
//! It does NOT provide:
//! - QUIC transport, stream scheduling or flow control
//! - Control-stream parsing or SETTINGS wire encoding
//! - HTTP message semantics

pub mod allocator;
pub mod compression;
pub mod demux;
pub mod error;
pub mod frame;
pub mod settings;
pub mod stream_codec;
pub mod stream_id;

pub use allocator::IdAllocator;
pub use compression::{header_list_size, CompressionContext, CompressionInfo, Header};
pub use demux::Demultiplexer;
pub use error::{CodecError, CompressionError, Error, Result, RoutingError};
pub use frame::{frame_type, FrameHeader};
pub use settings::{settings_id, Settings};
pub use stream_codec::{
    Callback, HeaderSize, HqStreamCodec, SharedCallback, SharedState, StreamCodec, StreamEvent,
    MAX_HEADER_BLOCK_SIZE,
};
pub use stream_id::{
    Direction, PushId, StreamId, StreamKind, MAX_STREAM_ID, STREAM_ID_STRIDE,
};
