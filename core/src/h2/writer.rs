/*
 * writer.rs
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

//! HTTP/2 frame serializer. Frames accumulate in an internal buffer that the
//! session drains to the socket under its writer lock.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::*;

/// Serializes frames into a buffer; the caller owns the flush.
pub struct FrameWriter {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_MAX_FRAME_SIZE + FRAME_HEADER_LENGTH),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Honor the peer's SETTINGS_MAX_FRAME_SIZE for frames we emit.
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size.clamp(MIN_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE);
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn frame_header(&mut self, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
        debug_assert!(length <= self.max_frame_size);
        self.buf.put_u8((length >> 16) as u8);
        self.buf.put_u8((length >> 8) as u8);
        self.buf.put_u8(length as u8);
        self.buf.put_u8(frame_type);
        self.buf.put_u8(flags);
        self.buf.put_u32(stream_id & 0x7fff_ffff);
    }

    pub fn preface(&mut self) {
        self.buf.extend_from_slice(CONNECTION_PREFACE);
    }

    /// One DATA frame. The payload must already fit the peer's frame size;
    /// the session slices bodies against the flow-control window first.
    pub fn data(&mut self, stream_id: u32, payload: &[u8], end_stream: bool) {
        debug_assert_ne!(stream_id, 0);
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        self.frame_header(payload.len(), TYPE_DATA, flags, stream_id);
        self.buf.extend_from_slice(payload);
    }

    /// A complete header block as HEADERS plus as many CONTINUATION frames
    /// as the peer's frame size requires.
    pub fn headers(&mut self, stream_id: u32, header_block: &[u8], end_stream: bool) {
        debug_assert_ne!(stream_id, 0);
        let limit = self.max_frame_size;
        let mut flags = if end_stream { FLAG_END_STREAM } else { 0 };
        if header_block.len() <= limit {
            flags |= FLAG_END_HEADERS;
            self.frame_header(header_block.len(), TYPE_HEADERS, flags, stream_id);
            self.buf.extend_from_slice(header_block);
            return;
        }
        self.frame_header(limit, TYPE_HEADERS, flags, stream_id);
        self.buf.extend_from_slice(&header_block[..limit]);
        let mut rest = &header_block[limit..];
        while rest.len() > limit {
            self.frame_header(limit, TYPE_CONTINUATION, 0, stream_id);
            self.buf.extend_from_slice(&rest[..limit]);
            rest = &rest[limit..];
        }
        self.frame_header(rest.len(), TYPE_CONTINUATION, FLAG_END_HEADERS, stream_id);
        self.buf.extend_from_slice(rest);
    }

    pub fn rst_stream(&mut self, stream_id: u32, error_code: u32) {
        debug_assert_ne!(stream_id, 0);
        self.frame_header(4, TYPE_RST_STREAM, 0, stream_id);
        self.buf.put_u32(error_code);
    }

    pub fn settings(&mut self, settings: &[(u16, u32)]) {
        self.frame_header(settings.len() * 6, TYPE_SETTINGS, 0, 0);
        for &(id, value) in settings {
            self.buf.put_u16(id);
            self.buf.put_u32(value);
        }
    }

    pub fn settings_ack(&mut self) {
        self.frame_header(0, TYPE_SETTINGS, FLAG_ACK, 0);
    }

    pub fn ping(&mut self, payload: u64, ack: bool) {
        let flags = if ack { FLAG_ACK } else { 0 };
        self.frame_header(8, TYPE_PING, flags, 0);
        self.buf.put_u64(payload);
    }

    pub fn goaway(&mut self, last_stream_id: u32, error_code: u32, debug_data: &[u8]) {
        self.frame_header(8 + debug_data.len(), TYPE_GOAWAY, 0, 0);
        self.buf.put_u32(last_stream_id & 0x7fff_ffff);
        self.buf.put_u32(error_code);
        self.buf.extend_from_slice(debug_data);
    }

    pub fn window_update(&mut self, stream_id: u32, increment: u32) {
        debug_assert!(increment > 0);
        self.frame_header(4, TYPE_WINDOW_UPDATE, 0, stream_id);
        self.buf.put_u32(increment & 0x7fff_ffff);
    }

    /// Take everything accumulated so far; the writer stays usable.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_layout() {
        let mut w = FrameWriter::new();
        w.data(3, b"abc", true);
        let out = w.take();
        assert_eq!(
            &out[..],
            &[0, 0, 3, TYPE_DATA, FLAG_END_STREAM, 0, 0, 0, 3, b'a', b'b', b'c']
        );
    }

    #[test]
    fn small_headers_carry_end_headers() {
        let mut w = FrameWriter::new();
        w.headers(1, &[0x82], false);
        let out = w.take();
        assert_eq!(out[3], TYPE_HEADERS);
        assert_eq!(out[4], FLAG_END_HEADERS);
    }

    #[test]
    fn oversized_header_block_splits_into_continuation() {
        let mut w = FrameWriter::new();
        let block = vec![0u8; DEFAULT_MAX_FRAME_SIZE + 100];
        w.headers(1, &block, true);
        let out = w.take();
        // First frame: HEADERS without END_HEADERS, with END_STREAM.
        assert_eq!(out[3], TYPE_HEADERS);
        assert_eq!(out[4], FLAG_END_STREAM);
        // Second frame starts right after the first payload.
        let second = FRAME_HEADER_LENGTH + DEFAULT_MAX_FRAME_SIZE;
        assert_eq!(out[second + 3], TYPE_CONTINUATION);
        assert_eq!(out[second + 4], FLAG_END_HEADERS);
        let len = ((out[second] as usize) << 16)
            | ((out[second + 1] as usize) << 8)
            | out[second + 2] as usize;
        assert_eq!(len, 100);
    }

    #[test]
    fn goaway_masks_reserved_bit() {
        let mut w = FrameWriter::new();
        w.goaway(0xffff_ffff, ERROR_NO_ERROR, b"bye");
        let out = w.take();
        assert_eq!(out[FRAME_HEADER_LENGTH] & 0x80, 0);
        assert_eq!(&out[out.len() - 3..], b"bye");
    }

    #[test]
    fn settings_frame_pairs() {
        let mut w = FrameWriter::new();
        w.settings(&[(SETTINGS_ENABLE_PUSH, 0), (SETTINGS_HEADER_TABLE_SIZE, 4096)]);
        let out = w.take();
        assert_eq!(out[2], 12);
        assert_eq!(out[FRAME_HEADER_LENGTH + 1], SETTINGS_ENABLE_PUSH as u8);
    }
}
