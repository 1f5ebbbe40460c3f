use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error as ThisError;

use super::{
    header::Field,
    huffman,
    table::Table,
};

/// Malformed-input cases the decoder can hit. Every one of them leaves the
/// dynamic table in an unknowable state, so they are all promoted to
/// connection-fatal COMPRESSION_ERROR by the dispatch layer.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    #[error("table index out of range")]
    InvalidTableIndex,
    #[error("integer continuation chain exceeds four octets")]
    IntegerOverflow,
    #[error("table size update above the negotiated limit")]
    InvalidTableSizeUpdate,
    #[error("header block did not lead with a table size update")]
    ExpectedTableSizeUpdate,
    #[error("invalid huffman code")]
    HuffmanCode,
    #[error("EOS symbol inside a huffman string")]
    HuffmanEos,
    #[error("huffman padding is not an EOS prefix")]
    HuffmanPadding,
    #[error("invalid octet in field name")]
    InvalidFieldName,
    #[error("header block ends mid-instruction")]
    TruncatedBlock,
}

/// The decode-direction half of the header codec.
///
/// Stateful across header blocks: the dynamic table persists for the life of
/// the connection. `decode` works incrementally so a block split across
/// CONTINUATION frames can be drained fragment by fragment.
#[derive(Debug)]
pub struct Decoder {
    table: Table,
    /// Ceiling for table size updates, from the local SETTINGS.
    limit: usize,
    /// After the limit changes, the peer must lead its next block with a
    /// size update (RFC 7541 §4.2).
    expect_size_update: bool,
}

impl Decoder {
    pub fn new(limit: usize) -> Decoder {
        Decoder {
            table: Table::new(limit),
            limit,
            expect_size_update: false,
        }
    }

    /// Apply a change to the local `header_table_size` once the peer has
    /// acknowledged our SETTINGS.
    pub fn update_limit(&mut self, limit: usize) {
        if limit != self.limit {
            self.limit = limit;
            self.table.set_capacity(limit);
            self.expect_size_update = true;
        }
    }

    /// Current dynamic table occupancy in octets.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Decode the next field out of `src`, consuming complete instructions
    /// only. `Ok(None)` means the buffer ends mid-instruction; the partial
    /// bytes stay in place for the next fragment.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Field>, DecoderError> {
        loop {
            let mut cur = Cursor::new(&src[..]);
            let Some(first) = cur.take_u8() else {
                return Ok(None);
            };
            let class = first >> 4;
            if self.expect_size_update && !(2..=3).contains(&class) {
                return Err(DecoderError::ExpectedTableSizeUpdate);
            }
            match class {
                // 1xxx xxxx: indexed field
                8..=15 => {
                    let Some(index) = decode_int(&mut cur, first, 7)? else {
                        return Ok(None);
                    };
                    let field = self.table.get(index).ok_or(DecoderError::InvalidTableIndex)?;
                    src.advance(cur.pos);
                    return Ok(Some(field));
                }
                // 01xx xxxx: literal with incremental indexing
                4..=7 => {
                    let Some(field) = self.literal(&mut cur, first, 6, false)? else {
                        return Ok(None);
                    };
                    self.table.insert(field.clone());
                    src.advance(cur.pos);
                    return Ok(Some(field));
                }
                // 001x xxxx: dynamic table size update
                2 | 3 => {
                    let Some(capacity) = decode_int(&mut cur, first, 5)? else {
                        return Ok(None);
                    };
                    if capacity > self.limit {
                        return Err(DecoderError::InvalidTableSizeUpdate);
                    }
                    self.table.set_capacity(capacity);
                    self.expect_size_update = false;
                    src.advance(cur.pos);
                }
                // 0001 xxxx: literal, never indexed
                1 => {
                    let Some(field) = self.literal(&mut cur, first, 4, true)? else {
                        return Ok(None);
                    };
                    src.advance(cur.pos);
                    return Ok(Some(field));
                }
                // 0000 xxxx: literal without indexing
                _ => {
                    let Some(field) = self.literal(&mut cur, first, 4, false)? else {
                        return Ok(None);
                    };
                    src.advance(cur.pos);
                    return Ok(Some(field));
                }
            }
        }
    }

    fn literal(
        &self,
        cur: &mut Cursor<'_>,
        first: u8,
        prefix_bits: u8,
        sensitive: bool,
    ) -> Result<Option<Field>, DecoderError> {
        let Some(index) = decode_int(cur, first, prefix_bits)? else {
            return Ok(None);
        };
        let name = if index == 0 {
            let Some(name) = decode_string(cur)? else {
                return Ok(None);
            };
            validate_name(&name)?;
            name
        } else {
            self.table
                .get(index)
                .ok_or(DecoderError::InvalidTableIndex)?
                .name
        };
        let Some(value) = decode_string(cur)? else {
            return Ok(None);
        };
        Ok(Some(Field {
            name,
            value,
            sensitive,
        }))
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    fn take_u8(&mut self) -> Option<u8> {
        let byte = self.buf.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let slice = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(slice)
    }
}

/// Prefixed varint (RFC 7541 §5.1). At most four continuation octets.
fn decode_int(
    cur: &mut Cursor<'_>,
    first: u8,
    prefix_bits: u8,
) -> Result<Option<usize>, DecoderError> {
    let max = (1usize << prefix_bits) - 1;
    let mut value = (first as usize) & max;
    if value < max {
        return Ok(Some(value));
    }
    let mut shift = 0u32;
    loop {
        let Some(byte) = cur.take_u8() else {
            return Ok(None);
        };
        value += ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
        if shift >= 28 {
            return Err(DecoderError::IntegerOverflow);
        }
    }
}

fn decode_string(cur: &mut Cursor<'_>) -> Result<Option<Bytes>, DecoderError> {
    let Some(first) = cur.take_u8() else {
        return Ok(None);
    };
    let huffman = first & 0x80 != 0;
    let Some(len) = decode_int(cur, first, 7)? else {
        return Ok(None);
    };
    let Some(raw) = cur.take(len) else {
        return Ok(None);
    };
    if huffman {
        let mut out = BytesMut::with_capacity(len * 2);
        huffman::decode(raw, &mut out)?;
        Ok(Some(out.freeze()))
    } else {
        Ok(Some(Bytes::copy_from_slice(raw)))
    }
}

/// Field names must be lowercase visible ASCII; a colon is only legal as the
/// pseudo-header prefix.
fn validate_name(name: &[u8]) -> Result<(), DecoderError> {
    if name.is_empty() {
        return Err(DecoderError::InvalidFieldName);
    }
    let rest = if name[0] == b':' { &name[1..] } else { &name[..] };
    for &byte in rest {
        if byte <= 0x20 || byte >= 0x7f || byte.is_ascii_uppercase() || byte == b':' {
            return Err(DecoderError::InvalidFieldName);
        }
    }
    Ok(())
}
