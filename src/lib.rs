//! HTTP/2 connection, stream and header-compression layers.
//!
//! `h2mux` implements the framing codec, per-stream state machine,
//! flow-control bookkeeping and HPACK header compression of RFC 9113 and
//! RFC 7541 as a non-blocking, single-owner protocol engine. Bytes come in
//! through [`Connection::recv`]; frames go out through a [`Transport`]
//! collaborator; the application observes streams through the
//! [`StreamHandler`] callbacks its [`Session`] factory hands out.
//!
//! The engine is written for adversarial input: malformed frames, header
//! interleaving, compression bombs and control-frame floods all terminate
//! the connection with the proper error code instead of consuming memory or
//! CPU. There is no locking and no blocking anywhere; backpressure is
//! expressed purely through the flow-control windows and the
//! `send_data` limited-by-flow-control return.

mod error;
pub mod frame;
pub mod hpack;
mod proto;
mod transport;

pub use crate::{
    error::{Error, Reason},
    frame::{Headers, Pseudo, Settings, StreamId},
    proto::{
        Batched, Connection, FlowControl, Grant, Immediate, MeterConfig, Role, Session, State,
        StreamHandler, MAX_WINDOW_SIZE, PREFACE,
    },
    transport::{Event, Transport},
};
