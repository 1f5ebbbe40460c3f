//! The RFC 9113 engine: connection dispatch, per-stream state machines,
//! flow-control accounting and the defensive rate meter.

mod calm;
mod connection;
mod flow_control;
mod ping_pong;
mod session;
mod stream;

pub use self::{
    calm::MeterConfig,
    connection::{Connection, Role},
    flow_control::{Batched, FlowControl, Grant, Immediate},
    session::{Session, StreamHandler},
    stream::State,
};

pub type WindowSize = u32;

/// Largest legal flow-control window (RFC 9113 §6.9.1).
pub const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;

/// Client connection preface, sent before any frame (RFC 9113 §3.4).
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
