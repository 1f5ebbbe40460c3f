//! Wire-level framing: the 9-octet frame head, frame types, flag masks and
//! the negotiated parameter record.
//!
//! Frames are never materialized as owned objects; the connection parses the
//! head, slices the payload and dispatches in place.

pub(crate) mod headers;
mod settings;
mod stream_id;

pub use self::{
    headers::{Headers, Pseudo},
    settings::Settings,
    stream_id::StreamId,
};

use bytes::{BufMut, BytesMut};

/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 9;

pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

// Frame flag bits. ACK shares a bit with END_STREAM; which one applies is
// fixed by the frame type.
pub const ACK: u8 = 0x01;
pub const END_STREAM: u8 = 0x01;
pub const END_HEADERS: u8 = 0x04;
pub const PADDED: u8 = 0x08;
pub const PRIORITY: u8 = 0x20;

/// Frame types 0–11 (RFC 9113 §6, plus ALTSVC and the historical BLOCKED).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Data = 0,
    Headers = 1,
    Priority = 2,
    Reset = 3,
    Settings = 4,
    PushPromise = 5,
    Ping = 6,
    GoAway = 7,
    WindowUpdate = 8,
    Continuation = 9,
    AltSvc = 10,
    Blocked = 11,
}

impl Kind {
    pub fn new(byte: u8) -> Option<Kind> {
        use Kind::*;
        Some(match byte {
            0 => Data,
            1 => Headers,
            2 => Priority,
            3 => Reset,
            4 => Settings,
            5 => PushPromise,
            6 => Ping,
            7 => GoAway,
            8 => WindowUpdate,
            9 => Continuation,
            10 => AltSvc,
            11 => Blocked,
            _ => return None,
        })
    }
}

// Legal flag bits per frame type, indexed by `Kind as usize`. Any other bit
// set on the wire is a connection PROTOCOL_ERROR.
const LEGAL_FLAGS: [u8; 12] = [
    PADDED | END_STREAM,                           // DATA
    PRIORITY | PADDED | END_HEADERS | END_STREAM,  // HEADERS
    0,                                             // PRIORITY
    0,                                             // RST_STREAM
    ACK,                                           // SETTINGS
    PADDED | END_HEADERS,                          // PUSH_PROMISE
    ACK,                                           // PING
    0,                                             // GOAWAY
    0,                                             // WINDOW_UPDATE
    END_HEADERS,                                   // CONTINUATION
    0,                                             // ALTSVC
    0,                                             // BLOCKED
];

pub fn legal_flags(kind: Kind) -> u8 {
    LEGAL_FLAGS[kind as usize]
}

/// The fixed portion of a frame, minus the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub kind: Kind,
    pub flag: u8,
    pub stream_id: StreamId,
}

impl Head {
    pub fn new(kind: Kind, flag: u8, stream_id: StreamId) -> Head {
        Head {
            kind,
            flag,
            stream_id,
        }
    }

    /// Write the 9-octet head for a payload of `payload_len` bytes.
    /// The reserved stream-id bit is always written as zero.
    pub fn encode(&self, payload_len: usize, dst: &mut BytesMut) {
        debug_assert!(payload_len <= MAX_MAX_FRAME_SIZE as usize);
        dst.put_uint(payload_len as u64, 3);
        dst.put_u8(self.kind as u8);
        dst.put_u8(self.flag);
        dst.put_u32(self.stream_id.as_u32() & 0x7fff_ffff);
    }
}
