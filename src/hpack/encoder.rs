use bytes::{BufMut, Bytes, BytesMut};

use super::{
    header::{Field, Indexing},
    huffman,
    table::{static_find, Lookup, Table},
};

/// The encode-direction half of the header codec.
///
/// Table capacity follows the peer's `header_table_size`; a pending change
/// is signalled with a size-update instruction at the front of the next
/// header block.
#[derive(Debug)]
pub struct Encoder {
    table: Table,
    pending_capacity: Option<usize>,
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new(4096)
    }
}

impl Encoder {
    pub fn new(capacity: usize) -> Encoder {
        Encoder {
            table: Table::new(capacity),
            pending_capacity: None,
        }
    }

    /// Adopt the peer's advertised `header_table_size`.
    pub fn update_capacity(&mut self, capacity: usize) {
        if capacity != self.table.capacity() {
            self.table.set_capacity(capacity);
            self.pending_capacity = Some(capacity);
        }
    }

    /// Current dynamic table occupancy in octets.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Encode one field into `dst` using the representation `mode` for
    /// literals. A full pair match in either table always wins and is sent
    /// indexed.
    pub fn encode(&mut self, name: &[u8], value: &[u8], mode: Indexing, dst: &mut BytesMut) {
        if let Some(capacity) = self.pending_capacity.take() {
            encode_int(0x20, 5, capacity, dst);
        }

        let mut name_index = None;
        match static_find(name, value) {
            Lookup::Pair(index) => {
                encode_int(0x80, 7, index, dst);
                return;
            }
            Lookup::Name(index) => name_index = Some(index),
            Lookup::Miss => {}
        }
        if self.table.capacity() > 0 {
            match self.table.find(name, value) {
                Lookup::Pair(index) => {
                    encode_int(0x80, 7, index, dst);
                    return;
                }
                Lookup::Name(index) => {
                    if name_index.is_none() {
                        name_index = Some(index);
                    }
                }
                Lookup::Miss => {}
            }
        }

        let index = name_index.unwrap_or(0);
        match mode {
            Indexing::Save => {
                self.table.insert(Field::new(
                    Bytes::copy_from_slice(name),
                    Bytes::copy_from_slice(value),
                ));
                encode_int(0x40, 6, index, dst);
            }
            Indexing::Discard => encode_int(0x00, 4, index, dst),
            Indexing::DiscardAlways => encode_int(0x10, 4, index, dst),
        }
        if index == 0 {
            encode_string(name, dst);
        }
        encode_string(value, dst);
    }
}

/// Raw ASCII or huffman, whichever is shorter; the huffman length is
/// precomputed to decide.
fn encode_string(src: &[u8], dst: &mut BytesMut) {
    let huffman_len = huffman::encoded_len(src);
    if huffman_len < src.len() {
        encode_int(0x80, 7, huffman_len, dst);
        huffman::encode(src, dst);
    } else {
        encode_int(0x00, 7, src.len(), dst);
        dst.put_slice(src);
    }
}

/// Prefixed varint (RFC 7541 §5.1).
fn encode_int(prefix: u8, prefix_bits: u8, mut value: usize, dst: &mut BytesMut) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        dst.put_u8(prefix | value as u8);
        return;
    }
    dst.put_u8(prefix | max as u8);
    value -= max;
    while value >= 0x80 {
        dst.put_u8((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}
