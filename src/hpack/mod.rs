//! HPACK header compression (RFC 7541).
//!
//! Stateless with respect to connection objects; an [`Encoder`]/[`Decoder`]
//! pair holds nothing but its own tables. The 61-entry static table is a
//! process-wide constant shared by every connection.

mod decoder;
mod encoder;
pub(crate) mod header;
pub(crate) mod huffman;
mod table;


pub use self::{
    decoder::{Decoder, DecoderError},
    encoder::Encoder,
    header::{BytesStr, Field, Indexing},
};
