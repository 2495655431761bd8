/*
 * encoder.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embeddable HTTP client engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HPACK encoder (RFC 7541). Encodes request headers using static table
//! indexing and Huffman strings.
//!
//! The encoder never grows its dynamic table, so its declared table use is
//! always zero and no size-update opcodes are needed when the peer shrinks
//! SETTINGS_HEADER_TABLE_SIZE. Credentials and cookies are emitted
//! never-indexed so intermediaries do not cache them.

use bytes::BufMut;

use super::huffman;
use super::static_table;

/// Stateful per-connection encoder for the outbound direction.
pub struct Encoder {
    /// Peer's SETTINGS_HEADER_TABLE_SIZE, tracked for completeness.
    max_table_size: usize,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self { max_table_size }
    }

    /// Record the peer's new table size cap. No opcode is required because
    /// this encoder's dynamic table is permanently empty.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
    }

    pub fn max_table_size(&self) -> usize {
        self.max_table_size
    }

    /// Encode a (name, value) list into a header block. Names must already
    /// be lowercase, pseudo-headers first.
    pub fn encode(&mut self, headers: &[(String, String)], out: &mut impl BufMut) {
        for (name, value) in headers {
            if is_sensitive(name) {
                self.encode_never_indexed(name, value, out);
            } else if let Some(index) = static_table::find_exact(name, value) {
                encode_integer(index as u64, 7, 0x80, out);
            } else if let Some(index) = static_table::find_name(name) {
                // Literal without indexing, name from static table (4-bit).
                encode_integer(index as u64, 4, 0x00, out);
                encode_string(value.as_bytes(), out);
            } else {
                out.put_u8(0x00);
                encode_string(name.as_bytes(), out);
                encode_string(value.as_bytes(), out);
            }
        }
    }

    fn encode_never_indexed(&self, name: &str, value: &str, out: &mut impl BufMut) {
        match static_table::find_name(name) {
            Some(index) => encode_integer(index as u64, 4, 0x10, out),
            None => {
                out.put_u8(0x10);
                encode_string(name.as_bytes(), out);
            }
        }
        encode_string(value.as_bytes(), out);
    }
}

fn is_sensitive(name: &str) -> bool {
    matches!(name, "authorization" | "proxy-authorization" | "cookie" | "set-cookie")
}

/// Encode a string with Huffman when that is shorter, plain otherwise.
fn encode_string(s: &[u8], out: &mut impl BufMut) {
    let huffman_len = huffman::encoded_length(s);
    if huffman_len < s.len() {
        encode_integer(huffman_len as u64, 7, 0x80, out);
        out.put_slice(&huffman::encode(s));
    } else {
        encode_integer(s.len() as u64, 7, 0x00, out);
        out.put_slice(s);
    }
}

fn encode_integer(mut value: u64, prefix_bits: u8, opcode: u8, out: &mut impl BufMut) {
    let prefix_max = (1u64 << prefix_bits) - 1;
    if value < prefix_max {
        out.put_u8(opcode | value as u8);
        return;
    }
    out.put_u8(opcode | prefix_max as u8);
    value -= prefix_max;
    while value >= 128 {
        out.put_u8(0x80 | (value % 128) as u8);
        value /= 128;
    }
    out.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::Decoder;
    use bytes::BytesMut;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|&(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn static_exact_match_is_one_byte() {
        let mut buf = BytesMut::new();
        Encoder::new(4096).encode(&pairs(&[(":method", "GET")]), &mut buf);
        assert_eq!(&buf[..], &[0x82]);
    }

    #[test]
    fn roundtrips_through_decoder() {
        let input = pairs(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "www.example.com"),
            (":path", "/resource"),
            ("accept", "text/html"),
            ("user-agent", "corriere/0.1"),
            ("x-custom-header", "some value"),
        ]);
        let mut buf = BytesMut::new();
        Encoder::new(4096).encode(&input, &mut buf);

        let decoded = Decoder::new(4096).decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn sensitive_headers_are_never_indexed() {
        let mut buf = BytesMut::new();
        Encoder::new(4096).encode(&pairs(&[("authorization", "Basic abc")]), &mut buf);
        // 0x1f 0x08: never-indexed, name index 23 (authorization).
        assert_eq!(buf[0] & 0xf0, 0x10);
        let decoded = Decoder::new(4096).decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded[0].1, "Basic abc");
    }

    #[test]
    fn integer_prefix_overflow_uses_continuation() {
        let mut buf = BytesMut::new();
        encode_integer(1337, 5, 0x00, &mut buf);
        // RFC 7541 C.1.2
        assert_eq!(&buf[..], &[0x1f, 0x9a, 0x0a]);
    }
}
