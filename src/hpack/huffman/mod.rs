//! The canonical HPACK Huffman code (RFC 7541 Appendix B).
//!
//! Encoding packs right-aligned codes MSB-first and pads the final partial
//! octet with the high bits of EOS. Decoding walks an 8-bit-fanout trie,
//! retracting the bits a leaf did not consume.

mod table;

use bytes::{BufMut, BytesMut};

use self::table::{decode_trie, Slot, ENCODE_TABLE};
use super::DecoderError;

/// Exact encoded size of `src` in octets, padding included. Computed ahead
/// of encoding so the string representation (raw vs huffman) can be chosen
/// by length alone.
pub(crate) fn encoded_len(src: &[u8]) -> usize {
    let bits: u64 = src
        .iter()
        .map(|&byte| ENCODE_TABLE[byte as usize].1 as u64)
        .sum();
    ((bits + 7) / 8) as usize
}

pub(crate) fn encode(src: &[u8], dst: &mut BytesMut) {
    let mut acc: u64 = 0;
    let mut pending: u32 = 0;
    for &byte in src {
        let (code, len) = ENCODE_TABLE[byte as usize];
        acc = (acc << len) | code as u64;
        pending += len as u32;
        while pending >= 8 {
            pending -= 8;
            dst.put_u8((acc >> pending) as u8);
        }
    }
    if pending > 0 {
        dst.put_u8(((acc << (8 - pending)) as u8) | (0xff >> pending));
    }
}

pub(crate) fn decode(src: &[u8], dst: &mut BytesMut) -> Result<(), DecoderError> {
    let trie = decode_trie();
    let total = src.len() * 8;
    let mut pos = 0;

    'symbols: while pos < total {
        let start = pos;
        let mut node = 0;
        loop {
            if pos == total {
                pos = start;
                break 'symbols;
            }
            match trie.slot(node, peek8(src, pos)) {
                Slot::Leaf { sym, bits } => {
                    if total - pos < bits as usize {
                        // Over-read into padding; retract to the symbol start.
                        pos = start;
                        break 'symbols;
                    }
                    pos += bits as usize;
                    if sym == 256 {
                        return Err(DecoderError::HuffmanEos);
                    }
                    dst.put_u8(sym as u8);
                    continue 'symbols;
                }
                Slot::Branch(next) => {
                    if total - pos < 8 {
                        pos = start;
                        break 'symbols;
                    }
                    pos += 8;
                    node = next;
                }
                Slot::Empty => return Err(DecoderError::HuffmanCode),
            }
        }
    }

    // Whatever is left must be a strict prefix of EOS: fewer than eight
    // bits, all ones.
    let rem = total - pos;
    if rem >= 8 {
        return Err(DecoderError::HuffmanPadding);
    }
    if rem > 0 {
        let mask = (1u16 << rem) as u8 - 1;
        if src[src.len() - 1] & mask != mask {
            return Err(DecoderError::HuffmanPadding);
        }
    }
    Ok(())
}

/// The eight bits starting at bit offset `pos`, zero-padded past the end.
fn peek8(src: &[u8], pos: usize) -> usize {
    let index = pos / 8;
    let offset = pos % 8;
    let window = (src[index] as u16) << 8
        | src.get(index + 1).copied().unwrap_or(0) as u16;
    ((window >> (8 - offset)) & 0xff) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_vec(src: &[u8]) -> Result<Vec<u8>, DecoderError> {
        let mut out = BytesMut::new();
        decode(src, &mut out)?;
        Ok(out.to_vec())
    }

    fn encode_vec(src: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::new();
        encode(src, &mut out);
        out.to_vec()
    }

    #[test]
    fn rfc7541_c4_request_vector() {
        // "www.example.com" from RFC 7541 C.4.1.
        let wire = hex::decode("f1e3c2e5f23a6ba0ab90f4ff").unwrap();
        assert_eq!(encode_vec(b"www.example.com"), wire);
        assert_eq!(decode_vec(&wire).unwrap(), b"www.example.com");
    }

    #[test]
    fn rfc7541_c6_response_vector() {
        // "302" from RFC 7541 C.6.1.
        let wire = hex::decode("6402").unwrap();
        assert_eq!(encode_vec(b"302"), wire);
        assert_eq!(decode_vec(&wire).unwrap(), b"302");
    }

    #[test]
    fn empty_string_round_trips() {
        assert!(encode_vec(b"").is_empty());
        assert_eq!(decode_vec(b"").unwrap(), b"");
    }

    #[test]
    fn every_byte_value_round_trips() {
        let all: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode_vec(&encode_vec(&all)).unwrap(), all);
    }

    #[test]
    fn zero_padding_is_rejected() {
        // 'a' is 00011 (5 bits); a zero-filled tail is not an EOS prefix.
        let wire = [0b0001_1000];
        assert_eq!(decode_vec(&wire).unwrap_err(), DecoderError::HuffmanPadding);
    }

    #[test]
    fn eos_in_the_stream_is_rejected() {
        // 30 bits of EOS followed by ones to the octet boundary.
        let wire = [0xff, 0xff, 0xff, 0xff];
        assert_eq!(decode_vec(&wire).unwrap_err(), DecoderError::HuffmanEos);
    }

    #[test]
    fn padding_longer_than_seven_bits_is_rejected() {
        // A lone 0xff octet decodes no symbol (shortest 1111.... code is
        // longer than 8 bits), leaving 8 bits of "padding".
        let wire = [0xff];
        assert_eq!(decode_vec(&wire).unwrap_err(), DecoderError::HuffmanPadding);
    }

    #[test]
    fn encoded_len_matches_encode() {
        for input in [&b"www.example.com"[..], b"no-cache", b"", b"a", b"custom-key"] {
            assert_eq!(encoded_len(input), encode_vec(input).len());
        }
    }

    quickcheck::quickcheck! {
        fn round_trip(data: Vec<u8>) -> bool {
            decode_vec(&encode_vec(&data)).unwrap() == data
        }
    }
}
