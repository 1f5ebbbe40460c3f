use std::{fmt, io};

use thiserror::Error as ThisError;

use crate::{frame::StreamId, hpack::DecoderError};

/// HTTP/2 error codes (RFC 9113 §7).
///
/// Carried by RST_STREAM and GOAWAY frames. Codes outside the defined range
/// are preserved as-is; the RFC requires treating them as equivalent to
/// `INTERNAL_ERROR`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reason(u32);

impl Reason {
    pub const NO_ERROR: Reason = Reason(0);
    pub const PROTOCOL_ERROR: Reason = Reason(1);
    pub const INTERNAL_ERROR: Reason = Reason(2);
    pub const FLOW_CONTROL_ERROR: Reason = Reason(3);
    pub const SETTINGS_TIMEOUT: Reason = Reason(4);
    pub const STREAM_CLOSED: Reason = Reason(5);
    pub const FRAME_SIZE_ERROR: Reason = Reason(6);
    pub const REFUSED_STREAM: Reason = Reason(7);
    pub const CANCEL: Reason = Reason(8);
    pub const COMPRESSION_ERROR: Reason = Reason(9);
    pub const CONNECT_ERROR: Reason = Reason(10);
    pub const ENHANCE_YOUR_CALM: Reason = Reason(11);
    pub const INADEQUATE_SECURITY: Reason = Reason(12);
    pub const HTTP_1_1_REQUIRED: Reason = Reason(13);

    pub fn description(&self) -> &str {
        match self.0 {
            0 => "no error",
            1 => "protocol error",
            2 => "internal error",
            3 => "flow control error",
            4 => "settings timeout",
            5 => "stream closed",
            6 => "frame size error",
            7 => "refused stream",
            8 => "cancel",
            9 => "compression error",
            10 => "connect error",
            11 => "enhance your calm",
            12 => "inadequate security",
            13 => "http/1.1 required",
            _ => "unknown error code",
        }
    }
}

impl From<u32> for Reason {
    fn from(src: u32) -> Reason {
        Reason(src)
    }
}

impl From<Reason> for u32 {
    fn from(src: Reason) -> u32 {
        src.0
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self.0 {
            0 => "NO_ERROR",
            1 => "PROTOCOL_ERROR",
            2 => "INTERNAL_ERROR",
            3 => "FLOW_CONTROL_ERROR",
            4 => "SETTINGS_TIMEOUT",
            5 => "STREAM_CLOSED",
            6 => "FRAME_SIZE_ERROR",
            7 => "REFUSED_STREAM",
            8 => "CANCEL",
            9 => "COMPRESSION_ERROR",
            10 => "CONNECT_ERROR",
            11 => "ENHANCE_YOUR_CALM",
            12 => "INADEQUATE_SECURITY",
            13 => "HTTP_1_1_REQUIRED",
            other => return write!(f, "Reason({other})"),
        };
        f.write_str(name)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// The crate error taxonomy.
///
/// `GoAway` and `Compression` are connection-fatal: the dispatch loop emits a
/// GOAWAY frame with the matching code, flushes, and closes the transport.
/// `Reset` is scoped to one stream and leaves the connection alive. `Io`
/// closes the transport without GOAWAY. `User` never reaches the wire; it
/// reports local API misuse back to the caller.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("connection error ({reason}): {message}")]
    GoAway {
        reason: Reason,
        message: &'static str,
    },
    #[error("stream error on {id:?}: {reason}")]
    Reset { id: StreamId, reason: Reason },
    #[error("compression error: {0}")]
    Compression(#[from] DecoderError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("user error: {0}")]
    User(&'static str),
}

impl Error {
    pub(crate) fn go_away(reason: Reason, message: &'static str) -> Error {
        Error::GoAway { reason, message }
    }

    pub(crate) fn protocol(message: &'static str) -> Error {
        Error::go_away(Reason::PROTOCOL_ERROR, message)
    }

    pub(crate) fn frame_size(message: &'static str) -> Error {
        Error::go_away(Reason::FRAME_SIZE_ERROR, message)
    }

    pub(crate) fn flow_control(message: &'static str) -> Error {
        Error::go_away(Reason::FLOW_CONTROL_ERROR, message)
    }

    pub(crate) fn reset(id: StreamId, reason: Reason) -> Error {
        Error::Reset { id, reason }
    }

    /// Error code this error puts on the wire.
    pub fn reason(&self) -> Reason {
        match self {
            Error::GoAway { reason, .. } => *reason,
            Error::Reset { reason, .. } => *reason,
            Error::Compression(_) => Reason::COMPRESSION_ERROR,
            Error::Io(_) | Error::User(_) => Reason::INTERNAL_ERROR,
        }
    }
}
