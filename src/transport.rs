use std::io;

use bytes::Bytes;

use crate::{error::Reason, frame::StreamId};

/// Connection-level notification pushed up to the embedder.
#[derive(Debug, Clone)]
pub enum Event {
    /// The peer announced shutdown. `last_stream_id` is the highest stream id
    /// the peer promises to have processed; `debug` is opaque diagnostic data.
    GoAway {
        last_stream_id: StreamId,
        reason: Reason,
        debug: Bytes,
    },
}

/// The byte-transport collaborator underneath a [`Connection`].
///
/// The engine never blocks on it: `write` queues a fully serialized frame,
/// `is_flushing` reports outbound backpressure, and the embedder is expected
/// to call [`Connection::recv`] again once more inbound bytes arrive.
///
/// [`Connection`]: crate::Connection
/// [`Connection::recv`]: crate::Connection::recv
pub trait Transport {
    /// Queue serialized bytes for the peer.
    fn write(&mut self, frame: Bytes) -> io::Result<()>;

    /// Push queued bytes toward the socket.
    fn flush(&mut self) -> io::Result<()>;

    /// Whether previously queued bytes are still in flight.
    fn is_flushing(&self) -> bool;

    /// Tear the transport down immediately.
    fn close(&mut self);

    /// Close once pending writes have drained.
    fn close_gracefully(&mut self) {
        self.close();
    }

    /// Surface a connection-level event to the embedder.
    fn post_event(&mut self, event: Event);
}
