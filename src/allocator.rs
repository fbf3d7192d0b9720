//! Stream and push identifier bookkeeping.
//!
//! Stream identifiers are assigned by the transport; this only tracks the
//! lowest ones not yet seen so a GOAWAY can name the right boundary. Push
//! identifiers are allocated here when we are the responder.

use crate::error::RoutingError;
use crate::stream_id::{is_client_bidirectional, Direction, PushId, StreamId, STREAM_ID_STRIDE};

/// Monotonic identifier counters for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    direction: Direction,
    next_push_id: PushId,
    min_unseen_stream_id: StreamId,
    min_unseen_push_id: PushId,
}

impl IdAllocator {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            next_push_id: 0,
            min_unseen_stream_id: 0,
            min_unseen_push_id: 0,
        }
    }

    /// Record a stream the transport handed us.
    ///
    /// Only client-initiated bidirectional streams seen by a responder move
    /// the bound.
    pub fn observe_stream(&mut self, stream_id: StreamId) {
        if self.direction == Direction::Responder
            && is_client_bidirectional(stream_id)
            && stream_id >= self.min_unseen_stream_id
        {
            self.min_unseen_stream_id = stream_id.saturating_add(STREAM_ID_STRIDE);
        }
    }

    /// Hand out the next push identifier.
    pub fn allocate_push_id(&mut self) -> Result<PushId, RoutingError> {
        if self.direction != Direction::Responder {
            return Err(RoutingError::PushIdNotAllowed(self.direction));
        }
        let push_id = self.next_push_id;
        self.next_push_id += 1;
        Ok(push_id)
    }

    /// Record a push identifier announced by the peer.
    pub fn observe_push_id(&mut self, push_id: PushId) {
        self.min_unseen_push_id = self.min_unseen_push_id.max(push_id.saturating_add(1));
    }

    /// The identifier `allocate_push_id` would return next.
    pub fn next_push_id(&self) -> PushId {
        self.next_push_id
    }

    pub fn min_unseen_stream_id(&self) -> StreamId {
        self.min_unseen_stream_id
    }

    pub fn min_unseen_push_id(&self) -> PushId {
        self.min_unseen_push_id
    }
}
