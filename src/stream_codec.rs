//! Per-stream codecs.
//!
//! A `StreamCodec` handles the frames of exactly one request stream. It owns
//! nothing connection-scoped: the compression context, the two instruction
//! streams and the settings records are lent to it through `SharedState` for
//! the length of one call.
//!
//! `HqStreamCodec` is the default implementation and speaks HTTP/3
//! request-stream framing (RFC 9114 Section 4.1).

use std::rc::Rc;

use bytes::BytesMut;
use tracing::trace;

use crate::compression::{header_list_size, CompressionContext, Header};
use crate::error::{CodecError, CompressionError};
use crate::frame::{decode_varint, encode_varint, frame_type, write_frame, FrameHeader};
use crate::settings::Settings;
use crate::stream_id::{Direction, PushId, StreamId};

/// Upper bound on a header block when the advertised MAX_FIELD_SECTION_SIZE
/// is larger (256 KB).
pub const MAX_HEADER_BLOCK_SIZE: u64 = 256 * 1024;

/// Events a codec reports while parsing ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The message's header section.
    Headers { headers: Vec<Header> },
    /// A push offer received on this request stream.
    PushPromise { push_id: PushId, headers: Vec<Header> },
    Body { data: Vec<u8> },
    /// A header section after the first one.
    Trailers { headers: Vec<Header> },
    /// The peer finished the stream.
    MessageComplete,
}

/// Receiver for stream events. One instance is shared by every codec on a
/// connection.
pub trait Callback {
    fn on_event(&self, stream_id: StreamId, event: StreamEvent);
}

pub type SharedCallback = Rc<dyn Callback>;

/// Connection-scoped resources lent to a codec for one call.
pub struct SharedState<'a> {
    pub compression: &'a mut CompressionContext,
    /// Instructions for the peer's decoder.
    pub encoder_stream: &'a mut BytesMut,
    /// Instructions for the peer's encoder.
    pub decoder_stream: &'a mut BytesMut,
    /// What the peer advertised.
    pub ingress_settings: &'a Settings,
    /// What we advertised.
    pub egress_settings: &'a Settings,
    pub max_encoder_data: Option<&'a dyn Fn() -> u64>,
}

impl SharedState<'_> {
    /// Bytes a codec may append to the encoder stream right now.
    pub fn encoder_budget(&self) -> u64 {
        self.max_encoder_data.map_or(u64::MAX, |max| max())
    }

    pub fn encode_headers(&mut self, headers: &[Header]) -> Vec<u8> {
        self.compression.encode(headers)
    }

    pub fn decode_headers(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
    ) -> Result<Vec<Header>, CompressionError> {
        self.compression.decode(stream_id, block, self.decoder_stream)
    }
}

/// Compressed and uncompressed size of a generated header section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderSize {
    /// Bytes written to the output buffer.
    pub compressed: usize,
    /// Header list size (RFC 9114 accounting).
    pub uncompressed: u64,
}

/// The contract the demultiplexer drives.
pub trait StreamCodec {
    fn new(stream_id: StreamId, direction: Direction) -> Self
    where
        Self: Sized;

    fn stream_id(&self) -> StreamId;

    fn set_callback(&mut self, callback: Option<SharedCallback>);

    fn callback(&self) -> Option<&SharedCallback>;

    /// Feed ingress bytes; returns how many were consumed.
    fn on_ingress(&mut self, buf: &[u8], shared: &mut SharedState<'_>) -> Result<usize, CodecError>;

    fn on_ingress_eof(&mut self, shared: &mut SharedState<'_>) -> Result<(), CodecError>;

    fn generate_header(
        &mut self,
        out: &mut BytesMut,
        headers: &[Header],
        eom: bool,
        shared: &mut SharedState<'_>,
    ) -> Result<HeaderSize, CodecError>;

    fn generate_push_promise(
        &mut self,
        out: &mut BytesMut,
        push_id: PushId,
        headers: &[Header],
        shared: &mut SharedState<'_>,
    ) -> Result<HeaderSize, CodecError>;

    fn generate_body(
        &mut self,
        out: &mut BytesMut,
        body: &[u8],
        padding: Option<u8>,
        eom: bool,
    ) -> Result<usize, CodecError>;

    fn generate_trailers(
        &mut self,
        out: &mut BytesMut,
        trailers: &[Header],
        shared: &mut SharedState<'_>,
    ) -> Result<usize, CodecError>;

    fn generate_eom(&mut self, out: &mut BytesMut) -> Result<usize, CodecError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum IngressState {
    #[default]
    AwaitingHeaders,
    Body,
    TrailersReceived,
    /// End of stream seen.
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum EgressState {
    #[default]
    Idle,
    HeadersSent,
    BodySent,
    TrailersSent,
    Complete,
}

/// A DATA or unknown frame whose payload is passed through as it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartialFrame {
    frame_type: u64,
    remaining: u64,
    /// Header and payload bytes seen so far.
    received: usize,
}

/// HTTP/3 request-stream codec.
///
/// HEADERS and PUSH_PROMISE payloads are buffered until complete (bounded by
/// the header block limit). DATA payload is delivered in pieces as it
/// arrives and unknown frames are skipped the same way, so the buffer never
/// holds more than one header block.
pub struct HqStreamCodec {
    stream_id: StreamId,
    direction: Direction,
    callback: Option<SharedCallback>,
    /// Buffer for incomplete frames
    buffer: Vec<u8>,
    partial: Option<PartialFrame>,
    ingress: IngressState,
    egress: EgressState,
}

impl std::fmt::Debug for HqStreamCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HqStreamCodec")
            .field("stream_id", &self.stream_id)
            .field("direction", &self.direction)
            .field("has_callback", &self.callback.is_some())
            .field("buffered", &self.buffer.len())
            .field("partial", &self.partial)
            .field("ingress", &self.ingress)
            .field("egress", &self.egress)
            .finish()
    }
}

impl HqStreamCodec {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_ingress_complete(&self) -> bool {
        self.ingress == IngressState::Complete
    }

    pub fn is_egress_complete(&self) -> bool {
        self.egress == EgressState::Complete
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(callback) = &self.callback {
            callback.on_event(self.stream_id, event);
        }
    }

    fn check_egress_open(&self) -> Result<(), CodecError> {
        if self.egress == EgressState::Complete {
            return Err(CodecError::EgressAfterEom);
        }
        Ok(())
    }

    /// Size of a header section, checked against the peer's limit.
    fn check_header_list(headers: &[Header], shared: &SharedState<'_>) -> Result<u64, CodecError> {
        let size = header_list_size(headers);
        let max = shared.ingress_settings.max_field_section_size();
        if size > max {
            return Err(CodecError::HeaderListTooLarge { size, max });
        }
        Ok(size)
    }

    fn check_data_allowed(&self) -> Result<(), CodecError> {
        match self.ingress {
            IngressState::AwaitingHeaders => Err(CodecError::MissingHeaders),
            IngressState::Body => Ok(()),
            IngressState::TrailersReceived | IngressState::Complete => {
                Err(CodecError::FrameUnexpected(frame_type::DATA))
            }
        }
    }

    /// Pass buffered bytes of the partial frame on. Returns whether parsing
    /// can continue.
    fn drain_partial(&mut self) -> bool {
        let Some(partial) = self.partial.as_mut() else {
            return false;
        };
        if partial.remaining == 0 {
            self.partial = None;
            return true;
        }
        if self.buffer.is_empty() {
            return false;
        }

        let take = usize::try_from(partial.remaining)
            .map_or(self.buffer.len(), |remaining| remaining.min(self.buffer.len()));
        partial.remaining -= take as u64;
        partial.received += take;
        let kind = partial.frame_type;
        if partial.remaining == 0 {
            self.partial = None;
        }

        let remainder = self.buffer.split_off(take);
        let chunk = std::mem::replace(&mut self.buffer, remainder);
        if kind == frame_type::DATA {
            self.emit(StreamEvent::Body { data: chunk });
        }
        true
    }

    /// Parse a complete HEADERS or PUSH_PROMISE frame
    fn handle_header_frame(
        &mut self,
        header: &FrameHeader,
        payload: Vec<u8>,
        shared: &mut SharedState<'_>,
    ) -> Result<(), CodecError> {
        if header.frame_type == frame_type::PUSH_PROMISE {
            // Only servers push
            if self.direction != Direction::Initiator {
                return Err(CodecError::FrameUnexpected(header.frame_type));
            }
            let (push_id, id_len) =
                decode_varint(&payload).ok_or(CodecError::MalformedFrame("PUSH_PROMISE"))?;
            let headers = shared.decode_headers(self.stream_id, &payload[id_len..])?;
            self.emit(StreamEvent::PushPromise { push_id, headers });
            return Ok(());
        }

        match self.ingress {
            IngressState::AwaitingHeaders => {
                let headers = shared.decode_headers(self.stream_id, &payload)?;
                self.ingress = IngressState::Body;
                self.emit(StreamEvent::Headers { headers });
            }
            IngressState::Body => {
                let headers = shared.decode_headers(self.stream_id, &payload)?;
                self.ingress = IngressState::TrailersReceived;
                self.emit(StreamEvent::Trailers { headers });
            }
            IngressState::TrailersReceived | IngressState::Complete => {
                return Err(CodecError::FrameUnexpected(header.frame_type));
            }
        }
        Ok(())
    }
}

impl StreamCodec for HqStreamCodec {
    fn new(stream_id: StreamId, direction: Direction) -> Self {
        Self {
            stream_id,
            direction,
            callback: None,
            buffer: Vec::new(),
            partial: None,
            ingress: IngressState::AwaitingHeaders,
            egress: EgressState::Idle,
        }
    }

    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn set_callback(&mut self, callback: Option<SharedCallback>) {
        self.callback = callback;
    }

    fn callback(&self) -> Option<&SharedCallback> {
        self.callback.as_ref()
    }

    fn on_ingress(&mut self, buf: &[u8], shared: &mut SharedState<'_>) -> Result<usize, CodecError> {
        if self.ingress == IngressState::Complete {
            return Err(CodecError::IngressAfterEof);
        }
        self.buffer.extend_from_slice(buf);
        let max_block = shared
            .egress_settings
            .max_field_section_size()
            .min(MAX_HEADER_BLOCK_SIZE);

        loop {
            if self.partial.is_some() {
                if !self.drain_partial() {
                    break;
                }
                continue;
            }

            let header = match FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => break,
            };

            if header.is_control_only() {
                return Err(CodecError::FrameUnexpected(header.frame_type));
            }

            match header.frame_type {
                frame_type::HEADERS | frame_type::PUSH_PROMISE => {
                    // Reject oversized header blocks before buffering them
                    if header.length > max_block {
                        return Err(CodecError::HeaderBlockTooLarge {
                            size: header.length,
                            max: max_block,
                        });
                    }
                    let total_size = header.total_size();
                    if self.buffer.len() < total_size {
                        break;
                    }

                    let remainder = self.buffer.split_off(total_size);
                    let mut payload = std::mem::replace(&mut self.buffer, remainder);
                    payload.drain(..header.header_len);

                    self.handle_header_frame(&header, payload, shared)?;
                }
                other => {
                    if other == frame_type::DATA {
                        self.check_data_allowed()?;
                    } else {
                        // Reserved and unknown frame types are skipped
                        trace!(stream_id = self.stream_id, frame_type = other, "ignoring frame");
                    }
                    self.buffer.drain(..header.header_len);
                    self.partial = Some(PartialFrame {
                        frame_type: other,
                        remaining: header.length,
                        received: header.header_len,
                    });
                }
            }
        }

        Ok(buf.len())
    }

    fn on_ingress_eof(&mut self, _shared: &mut SharedState<'_>) -> Result<(), CodecError> {
        if let Some(partial) = self.partial {
            return Err(CodecError::Truncated(partial.received));
        }
        if !self.buffer.is_empty() {
            return Err(CodecError::Truncated(self.buffer.len()));
        }
        if self.ingress != IngressState::Complete {
            self.ingress = IngressState::Complete;
            self.emit(StreamEvent::MessageComplete);
        }
        Ok(())
    }

    fn generate_header(
        &mut self,
        out: &mut BytesMut,
        headers: &[Header],
        eom: bool,
        shared: &mut SharedState<'_>,
    ) -> Result<HeaderSize, CodecError> {
        match self.egress {
            EgressState::Idle | EgressState::HeadersSent => {}
            EgressState::BodySent | EgressState::TrailersSent => {
                return Err(CodecError::EgressOutOfOrder("HEADERS"));
            }
            EgressState::Complete => return Err(CodecError::EgressAfterEom),
        }
        let uncompressed = Self::check_header_list(headers, shared)?;

        let block = shared.encode_headers(headers);
        let compressed = write_frame(out, frame_type::HEADERS, &block)?;
        self.egress = EgressState::HeadersSent;
        if eom {
            self.generate_eom(out)?;
        }
        Ok(HeaderSize {
            compressed,
            uncompressed,
        })
    }

    fn generate_push_promise(
        &mut self,
        out: &mut BytesMut,
        push_id: PushId,
        headers: &[Header],
        shared: &mut SharedState<'_>,
    ) -> Result<HeaderSize, CodecError> {
        if self.direction != Direction::Responder {
            return Err(CodecError::PushNotAllowed(self.direction));
        }
        self.check_egress_open()?;
        let uncompressed = Self::check_header_list(headers, shared)?;

        let mut payload = BytesMut::new();
        encode_varint(push_id, &mut payload)?;
        payload.extend_from_slice(&shared.encode_headers(headers));
        let compressed = write_frame(out, frame_type::PUSH_PROMISE, &payload)?;
        Ok(HeaderSize {
            compressed,
            uncompressed,
        })
    }

    fn generate_body(
        &mut self,
        out: &mut BytesMut,
        body: &[u8],
        padding: Option<u8>,
        eom: bool,
    ) -> Result<usize, CodecError> {
        match self.egress {
            EgressState::HeadersSent | EgressState::BodySent => {}
            EgressState::Idle => return Err(CodecError::MissingHeaders),
            EgressState::TrailersSent => return Err(CodecError::EgressOutOfOrder("DATA")),
            EgressState::Complete => return Err(CodecError::EgressAfterEom),
        }
        if padding.is_some() {
            trace!(stream_id = self.stream_id, "HTTP/3 has no DATA padding, ignoring");
        }

        let mut written = 0;
        if !body.is_empty() {
            written = write_frame(out, frame_type::DATA, body)?;
            self.egress = EgressState::BodySent;
        }
        if eom {
            written += self.generate_eom(out)?;
        }
        Ok(written)
    }

    fn generate_trailers(
        &mut self,
        out: &mut BytesMut,
        trailers: &[Header],
        shared: &mut SharedState<'_>,
    ) -> Result<usize, CodecError> {
        match self.egress {
            EgressState::HeadersSent | EgressState::BodySent => {}
            EgressState::Idle => return Err(CodecError::MissingHeaders),
            EgressState::TrailersSent => return Err(CodecError::EgressOutOfOrder("trailers")),
            EgressState::Complete => return Err(CodecError::EgressAfterEom),
        }
        Self::check_header_list(trailers, shared)?;

        let block = shared.encode_headers(trailers);
        let written = write_frame(out, frame_type::HEADERS, &block)?;
        self.egress = EgressState::TrailersSent;
        Ok(written)
    }

    /// End of message is the transport FIN, so nothing is written here.
    fn generate_eom(&mut self, _out: &mut BytesMut) -> Result<usize, CodecError> {
        self.check_egress_open()?;
        self.egress = EgressState::Complete;
        Ok(0)
    }
}
