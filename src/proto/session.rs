use bytes::Bytes;

use crate::{
    error::{Error, Reason},
    frame::{Headers, Settings, StreamId},
};

/// The application collaborator: stream factory plus settings hooks.
///
/// The engine calls `create_stream` whenever a peer-initiated HEADERS or a
/// local `send_header_client`/`push` opens a new stream id, and holds the
/// returned handler as a trait object for the stream's lifetime.
pub trait Session {
    fn create_stream(&mut self, id: StreamId) -> Box<dyn StreamHandler>;

    /// Fill the local settings record before it is first advertised.
    fn init_settings(&mut self, _settings: &mut Settings) {}

    /// Veto a peer settings record. Returning an error kills the connection
    /// with the error's code.
    fn validate_remote_settings(&mut self, _settings: &Settings) -> Result<(), Error> {
        Ok(())
    }
}

/// Per-stream lifecycle callbacks.
///
/// The fallible callbacks let the application surface a local fault; the
/// dispatch loop reports it back through `on_error` and resets the stream
/// with INTERNAL_ERROR instead of letting it escape the frame loop.
pub trait StreamHandler {
    /// The header block is complete and validated. `has_body` is false when
    /// END_STREAM arrived with the block. Trailer blocks are delivered here
    /// too, always with `has_body` false.
    fn on_header_done(&mut self, headers: Headers, has_body: bool) -> Result<(), Error>;

    /// One DATA payload, padding already stripped.
    fn on_data(&mut self, data: Bytes) -> Result<(), Error>;

    /// The peer finished its side of the stream.
    fn on_done(&mut self) -> Result<(), Error>;

    /// The stream is gone; always called exactly once, whatever came first.
    fn on_finish(&mut self);

    /// Peer-initiated abort with the carried error code.
    fn on_rst(&mut self, reason: Reason);

    /// A local fault was detected while driving this stream.
    fn on_error(&mut self, _error: &Error) {}

    /// The peer granted more send-window credit.
    fn on_window_update(&mut self) {}
}
