//! Per-connection stream demultiplexer.
//!
//! Routes ingress bytes and egress generation calls to the codec that owns
//! each stream, while every codec shares one compression context, one pair
//! of instruction streams and one pair of settings records.
//!
//! Ingress uses a two-step protocol: the transport layer first selects the
//! stream with [`Demultiplexer::set_current_stream`], then calls
//! [`Demultiplexer::on_ingress`]. The selection is consumed by that call
//! whatever its outcome. Egress calls name their stream explicitly.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::allocator::IdAllocator;
use crate::compression::{CompressionContext, CompressionInfo, Header};
use crate::error::{CodecError, Result, RoutingError};
use crate::frame::create_goaway;
use crate::settings::Settings;
use crate::stream_codec::{HeaderSize, HqStreamCodec, SharedCallback, SharedState, StreamCodec};
use crate::stream_id::{Direction, PushId, StreamId, MAX_STREAM_ID};

/// Routes per-stream operations to per-stream codecs.
///
/// Driven by one thread of control per connection; there is no locking.
pub struct Demultiplexer<C: StreamCodec = HqStreamCodec> {
    direction: Direction,
    control_stream_id: StreamId,
    codecs: HashMap<StreamId, C>,
    /// Stream selected for the next ingress call
    current_stream: Option<StreamId>,
    callback: Option<SharedCallback>,
    compression: CompressionContext,
    encoder_stream: BytesMut,
    decoder_stream: BytesMut,
    max_encoder_data: Option<Box<dyn Fn() -> u64>>,
    ingress_settings: Settings,
    egress_settings: Settings,
    ids: IdAllocator,
    goaway_sent: bool,
}

impl<C: StreamCodec> std::fmt::Debug for Demultiplexer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("direction", &self.direction)
            .field("control_stream_id", &self.control_stream_id)
            .field("streams", &self.codecs.len())
            .field("current_stream", &self.current_stream)
            .field("ids", &self.ids)
            .field("goaway_sent", &self.goaway_sent)
            .finish()
    }
}

impl<C: StreamCodec> Demultiplexer<C> {
    pub fn new(direction: Direction) -> Self {
        debug!(%direction, "creating demultiplexer");
        Self {
            direction,
            control_stream_id: MAX_STREAM_ID,
            codecs: HashMap::new(),
            current_stream: None,
            callback: None,
            compression: CompressionContext::new(),
            encoder_stream: BytesMut::new(),
            decoder_stream: BytesMut::new(),
            max_encoder_data: None,
            ingress_settings: Settings::new(),
            egress_settings: Settings::new(),
            ids: IdAllocator::new(direction),
            goaway_sent: false,
        }
    }

    /// Start from known settings records instead of empty ones.
    pub fn with_settings(mut self, ingress: Settings, egress: Settings) -> Self {
        self.ingress_settings = ingress;
        self.egress_settings = egress;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_control_stream_id(&mut self, stream_id: StreamId) {
        self.control_stream_id = stream_id;
    }

    /// `MAX_STREAM_ID` until the transport assigns one.
    pub fn control_stream_id(&self) -> StreamId {
        self.control_stream_id
    }

    /// Install the function codecs consult for the encoder-stream budget.
    pub fn set_max_encoder_data_fn(&mut self, max_data: impl Fn() -> u64 + 'static) {
        self.max_encoder_data = Some(Box::new(max_data));
    }

    // ------------------------------------------------------------------
    // Stream registry
    // ------------------------------------------------------------------

    /// Create and register the codec for a new stream.
    ///
    /// Fails with [`RoutingError::DuplicateStream`] if the stream already has
    /// a live codec; the existing codec and all counters are left untouched.
    pub fn add_codec(&mut self, stream_id: StreamId) -> std::result::Result<&mut C, RoutingError> {
        match self.codecs.entry(stream_id) {
            Entry::Occupied(_) => {
                warn!(stream_id, "codec already registered for stream");
                Err(RoutingError::DuplicateStream(stream_id))
            }
            Entry::Vacant(slot) => {
                self.ids.observe_stream(stream_id);
                let mut codec = C::new(stream_id, self.direction);
                codec.set_callback(self.callback.clone());
                debug!(stream_id, direction = %self.direction, "added stream codec");
                Ok(slot.insert(codec))
            }
        }
    }

    /// Drop the codec for a stream. Returns whether one was registered.
    pub fn remove_codec(&mut self, stream_id: StreamId) -> bool {
        if self.current_stream == Some(stream_id) {
            self.current_stream = None;
        }
        let removed = self.codecs.remove(&stream_id).is_some();
        if removed {
            debug!(stream_id, "removed stream codec");
        }
        removed
    }

    pub fn codec(&self, stream_id: StreamId) -> std::result::Result<&C, RoutingError> {
        self.codecs
            .get(&stream_id)
            .ok_or(RoutingError::UnknownStream(stream_id))
    }

    pub fn codec_mut(&mut self, stream_id: StreamId) -> std::result::Result<&mut C, RoutingError> {
        self.codecs
            .get_mut(&stream_id)
            .ok_or(RoutingError::UnknownStream(stream_id))
    }

    pub fn contains_stream(&self, stream_id: StreamId) -> bool {
        self.codecs.contains_key(&stream_id)
    }

    pub fn stream_count(&self) -> usize {
        self.codecs.len()
    }

    /// Registered stream identifiers, in no particular order.
    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.codecs.keys().copied()
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    /// Select the stream the next ingress call belongs to.
    ///
    /// Returns `false` and leaves the selection alone if the stream has no
    /// codec.
    pub fn set_current_stream(&mut self, stream_id: StreamId) -> bool {
        if !self.codecs.contains_key(&stream_id) {
            return false;
        }
        self.current_stream = Some(stream_id);
        true
    }

    pub fn current_stream(&self) -> Option<StreamId> {
        self.current_stream
    }

    /// Feed bytes to the selected stream's codec and clear the selection.
    pub fn on_ingress(&mut self, buf: &[u8]) -> Result<usize> {
        let stream_id = self.take_current_stream()?;
        self.dispatch(stream_id, |codec, shared| codec.on_ingress(buf, shared))
    }

    /// Signal end of stream to the selected stream's codec and clear the
    /// selection.
    pub fn on_ingress_eof(&mut self) -> Result<()> {
        let stream_id = self.take_current_stream()?;
        self.dispatch(stream_id, |codec, shared| codec.on_ingress_eof(shared))
    }

    /// Select-and-feed in one call.
    pub fn on_ingress_for(&mut self, stream_id: StreamId, buf: &[u8]) -> Result<usize> {
        self.current_stream = None;
        self.dispatch(stream_id, |codec, shared| codec.on_ingress(buf, shared))
    }

    /// Record a push identifier the peer referenced.
    pub fn on_ingress_push_id(&mut self, push_id: PushId) {
        self.ids.observe_push_id(push_id);
    }

    fn take_current_stream(&mut self) -> std::result::Result<StreamId, RoutingError> {
        self.current_stream.take().ok_or_else(|| {
            warn!("ingress without a selected stream");
            RoutingError::NoCurrentStream
        })
    }

    // ------------------------------------------------------------------
    // Egress
    // ------------------------------------------------------------------

    pub fn generate_header(
        &mut self,
        out: &mut BytesMut,
        stream_id: StreamId,
        headers: &[Header],
        eom: bool,
    ) -> Result<HeaderSize> {
        self.dispatch(stream_id, |codec, shared| {
            codec.generate_header(out, headers, eom, shared)
        })
    }

    pub fn generate_push_promise(
        &mut self,
        out: &mut BytesMut,
        stream_id: StreamId,
        push_id: PushId,
        headers: &[Header],
    ) -> Result<HeaderSize> {
        self.dispatch(stream_id, |codec, shared| {
            codec.generate_push_promise(out, push_id, headers, shared)
        })
    }

    pub fn generate_body(
        &mut self,
        out: &mut BytesMut,
        stream_id: StreamId,
        body: &[u8],
        padding: Option<u8>,
        eom: bool,
    ) -> Result<usize> {
        self.dispatch(stream_id, |codec, _| codec.generate_body(out, body, padding, eom))
    }

    pub fn generate_trailers(
        &mut self,
        out: &mut BytesMut,
        stream_id: StreamId,
        trailers: &[Header],
    ) -> Result<usize> {
        self.dispatch(stream_id, |codec, shared| {
            codec.generate_trailers(out, trailers, shared)
        })
    }

    pub fn generate_eom(&mut self, out: &mut BytesMut, stream_id: StreamId) -> Result<usize> {
        self.dispatch(stream_id, |codec, _| codec.generate_eom(out))
    }

    /// Lend the shared resources to one stream's codec.
    fn dispatch<R>(
        &mut self,
        stream_id: StreamId,
        op: impl FnOnce(&mut C, &mut SharedState<'_>) -> std::result::Result<R, CodecError>,
    ) -> Result<R> {
        let Some(codec) = self.codecs.get_mut(&stream_id) else {
            warn!(stream_id, "no codec registered for stream");
            return Err(RoutingError::UnknownStream(stream_id).into());
        };
        let mut shared = SharedState {
            compression: &mut self.compression,
            encoder_stream: &mut self.encoder_stream,
            decoder_stream: &mut self.decoder_stream,
            ingress_settings: &self.ingress_settings,
            egress_settings: &self.egress_settings,
            max_encoder_data: self.max_encoder_data.as_deref(),
        };
        Ok(op(codec, &mut shared)?)
    }

    // ------------------------------------------------------------------
    // Identifiers
    // ------------------------------------------------------------------

    /// Allocate the next push identifier. Responder only.
    pub fn allocate_push_id(&mut self) -> std::result::Result<PushId, RoutingError> {
        self.ids.allocate_push_id().inspect_err(|err| {
            warn!(direction = %self.direction, "{err}");
        })
    }

    pub fn next_push_id(&self) -> PushId {
        self.ids.next_push_id()
    }

    pub fn min_unseen_stream_id(&self) -> StreamId {
        self.ids.min_unseen_stream_id()
    }

    pub fn min_unseen_push_id(&self) -> PushId {
        self.ids.min_unseen_push_id()
    }

    // ------------------------------------------------------------------
    // Callback and connection state
    // ------------------------------------------------------------------

    /// Replace the callback on every live codec and on codecs created later.
    pub fn set_callback(&mut self, callback: Option<SharedCallback>) {
        debug!(streams = self.codecs.len(), installed = callback.is_some(), "setting callback");
        for codec in self.codecs.values_mut() {
            codec.set_callback(callback.clone());
        }
        self.callback = callback;
    }

    pub fn callback(&self) -> Option<&SharedCallback> {
        self.callback.as_ref()
    }

    /// False once a GOAWAY has been generated.
    pub fn is_reusable(&self) -> bool {
        !self.goaway_sent
    }

    pub fn supports_parallel_requests(&self) -> bool {
        true
    }

    /// Write a GOAWAY frame for the control stream.
    ///
    /// A responder names the lowest request stream it has not seen; an
    /// initiator names the lowest push it has not seen. Only the first call
    /// writes anything.
    pub fn generate_goaway(&mut self, out: &mut BytesMut) -> Result<usize> {
        if self.goaway_sent {
            return Ok(0);
        }
        let id = match self.direction {
            Direction::Responder => self.ids.min_unseen_stream_id(),
            Direction::Initiator => self.ids.min_unseen_push_id(),
        };
        let written = create_goaway(out, id)?;
        self.goaway_sent = true;
        debug!(id, control_stream_id = self.control_stream_id, "sent goaway");
        Ok(written)
    }

    /// The connection preface belongs to the transport; nothing to write.
    pub fn generate_connection_preface(&mut self, _out: &mut BytesMut) -> usize {
        0
    }

    /// Settings acknowledgement is not a frame on this transport.
    pub fn generate_settings_ack(&mut self, _out: &mut BytesMut) -> usize {
        0
    }

    pub fn user_agent(&self) -> &str {
        ""
    }

    /// Flow control lives in the transport.
    pub fn default_window_size(&self) -> u32 {
        u32::MAX
    }

    // ------------------------------------------------------------------
    // Shared resources
    // ------------------------------------------------------------------

    pub fn compression(&self) -> &CompressionContext {
        &self.compression
    }

    pub fn compression_mut(&mut self) -> &mut CompressionContext {
        &mut self.compression
    }

    pub fn compression_info(&self) -> CompressionInfo {
        self.compression.compression_info()
    }

    /// Pending encoder instructions for the transport to send.
    pub fn encoder_stream(&self) -> &BytesMut {
        &self.encoder_stream
    }

    pub fn encoder_stream_mut(&mut self) -> &mut BytesMut {
        &mut self.encoder_stream
    }

    /// Pending decoder instructions for the transport to send.
    pub fn decoder_stream(&self) -> &BytesMut {
        &self.decoder_stream
    }

    pub fn decoder_stream_mut(&mut self) -> &mut BytesMut {
        &mut self.decoder_stream
    }

    pub fn ingress_settings(&self) -> &Settings {
        &self.ingress_settings
    }

    pub fn ingress_settings_mut(&mut self) -> &mut Settings {
        &mut self.ingress_settings
    }

    pub fn egress_settings(&self) -> &Settings {
        &self.egress_settings
    }

    pub fn egress_settings_mut(&mut self) -> &mut Settings {
        &mut self.egress_settings
    }
}
