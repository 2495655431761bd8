/*
 * parser.rs
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

//! HTTP/2 frame push parser: consumes complete frames from a buffer and
//! dispatches them to an [`H2FrameHandler`]. Unknown frame types are
//! ignored, as required for extensibility.

use bytes::{Buf, Bytes, BytesMut};

use super::frame::*;
use super::handler::H2FrameHandler;

/// Push parser for HTTP/2 frames. Partial frames stay in the buffer.
pub struct H2Parser {
    max_frame_size: usize,
}

impl H2Parser {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Raise the acceptable frame size after we advertise a larger
    /// SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: usize) {
        assert!(
            (MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&size),
            "max frame size out of range"
        );
        self.max_frame_size = size;
    }

    /// Consume as many complete frames as possible from `buf`.
    pub fn receive<H: H2FrameHandler>(&mut self, buf: &mut BytesMut, handler: &mut H) {
        while buf.len() >= FRAME_HEADER_LENGTH {
            let length = (buf[0] as usize) << 16 | (buf[1] as usize) << 8 | buf[2] as usize;
            if length > self.max_frame_size {
                handler.connection_error(
                    ERROR_FRAME_SIZE_ERROR,
                    format!("frame size {} exceeds max {}", length, self.max_frame_size),
                );
                return;
            }
            if buf.len() < FRAME_HEADER_LENGTH + length {
                return;
            }
            let frame_type = buf[3];
            let flags = buf[4];
            // High bit of the stream id is reserved and ignored on receipt.
            let stream_id = ((buf[5] & 0x7f) as u32) << 24
                | (buf[6] as u32) << 16
                | (buf[7] as u32) << 8
                | buf[8] as u32;

            buf.advance(FRAME_HEADER_LENGTH);
            let payload = buf.split_to(length).freeze();
            dispatch(frame_type, flags, stream_id, payload, handler);
        }
    }
}

impl Default for H2Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch<H: H2FrameHandler>(
    frame_type: u8,
    flags: u8,
    stream_id: u32,
    payload: Bytes,
    handler: &mut H,
) {
    match frame_type {
        TYPE_DATA => data(flags, stream_id, payload, handler),
        TYPE_HEADERS => headers(flags, stream_id, payload, handler),
        TYPE_PRIORITY => priority(stream_id, payload, handler),
        TYPE_RST_STREAM => rst_stream(stream_id, payload, handler),
        TYPE_SETTINGS => settings(flags, stream_id, payload, handler),
        TYPE_PUSH_PROMISE => push_promise(flags, stream_id, payload, handler),
        TYPE_PING => ping(flags, stream_id, payload, handler),
        TYPE_GOAWAY => goaway(stream_id, payload, handler),
        TYPE_WINDOW_UPDATE => window_update(stream_id, payload, handler),
        TYPE_CONTINUATION => continuation(flags, stream_id, payload, handler),
        _ => {}
    }
}

/// Strip PADDED framing: leading pad length octet, trailing padding.
/// Returns None (after reporting) when padding exceeds the payload.
fn unpad<H: H2FrameHandler>(
    mut payload: Bytes,
    stream_id: u32,
    handler: &mut H,
) -> Option<Bytes> {
    if payload.is_empty() {
        handler.stream_error(stream_id, ERROR_PROTOCOL_ERROR, "PADDED frame too short".into());
        return None;
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        handler.stream_error(
            stream_id,
            ERROR_PROTOCOL_ERROR,
            "padding exceeds frame payload".into(),
        );
        return None;
    }
    payload.truncate(payload.len() - pad_len);
    Some(payload)
}

fn data<H: H2FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.stream_error(0, ERROR_PROTOCOL_ERROR, "DATA frame on stream 0".into());
        return;
    }
    let data = if (flags & FLAG_PADDED) != 0 {
        match unpad(payload, stream_id, handler) {
            Some(d) => d,
            None => return,
        }
    } else {
        payload
    };
    handler.on_data(stream_id, (flags & FLAG_END_STREAM) != 0, data);
}

fn headers<H: H2FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.stream_error(0, ERROR_PROTOCOL_ERROR, "HEADERS frame on stream 0".into());
        return;
    }
    let mut payload = if (flags & FLAG_PADDED) != 0 {
        match unpad(payload, stream_id, handler) {
            Some(p) => p,
            None => return,
        }
    } else {
        payload
    };
    if (flags & FLAG_PRIORITY) != 0 {
        if payload.len() < 5 {
            handler.stream_error(
                stream_id,
                ERROR_FRAME_SIZE_ERROR,
                "HEADERS with PRIORITY too short".into(),
            );
            return;
        }
        // Dependency and weight are parsed and discarded; prioritization is
        // not implemented.
        payload.advance(5);
    }
    handler.on_headers(
        stream_id,
        (flags & FLAG_END_STREAM) != 0,
        (flags & FLAG_END_HEADERS) != 0,
        payload,
    );
}

fn priority<H: H2FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.stream_error(0, ERROR_PROTOCOL_ERROR, "PRIORITY frame on stream 0".into());
        return;
    }
    if payload.len() != 5 {
        handler.stream_error(
            stream_id,
            ERROR_FRAME_SIZE_ERROR,
            "PRIORITY frame must be 5 bytes".into(),
        );
        return;
    }
    let mut p = payload;
    let word = p.get_u32();
    let exclusive = (word & 0x8000_0000) != 0;
    let dependency = word & 0x7fff_ffff;
    let weight = p.get_u8().saturating_add(1);
    handler.on_priority(stream_id, dependency, exclusive, weight);
}

fn rst_stream<H: H2FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.stream_error(0, ERROR_PROTOCOL_ERROR, "RST_STREAM frame on stream 0".into());
        return;
    }
    if payload.len() != 4 {
        handler.connection_error(ERROR_FRAME_SIZE_ERROR, "RST_STREAM frame must be 4 bytes".into());
        return;
    }
    let mut p = payload;
    handler.on_rst_stream(stream_id, p.get_u32());
}

fn settings<H: H2FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id != 0 {
        handler.connection_error(ERROR_PROTOCOL_ERROR, "SETTINGS frame on a stream".into());
        return;
    }
    let ack = (flags & FLAG_ACK) != 0;
    if ack {
        if !payload.is_empty() {
            handler.connection_error(ERROR_FRAME_SIZE_ERROR, "SETTINGS ACK with payload".into());
            return;
        }
        handler.on_settings(true, Vec::new());
        return;
    }
    if payload.len() % 6 != 0 {
        handler.connection_error(
            ERROR_FRAME_SIZE_ERROR,
            "SETTINGS payload not a multiple of 6".into(),
        );
        return;
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    let mut p = payload;
    while p.has_remaining() {
        let id = p.get_u16();
        let value = p.get_u32();
        settings.push((id, value));
    }
    handler.on_settings(false, settings);
}

fn push_promise<H: H2FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.stream_error(0, ERROR_PROTOCOL_ERROR, "PUSH_PROMISE frame on stream 0".into());
        return;
    }
    let mut payload = if (flags & FLAG_PADDED) != 0 {
        match unpad(payload, stream_id, handler) {
            Some(p) => p,
            None => return,
        }
    } else {
        payload
    };
    if payload.len() < 4 {
        handler.connection_error(ERROR_FRAME_SIZE_ERROR, "PUSH_PROMISE frame too short".into());
        return;
    }
    let promised = payload.get_u32() & 0x7fff_ffff;
    handler.on_push_promise(stream_id, promised, (flags & FLAG_END_HEADERS) != 0, payload);
}

fn ping<H: H2FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id != 0 {
        handler.connection_error(ERROR_PROTOCOL_ERROR, "PING frame on a stream".into());
        return;
    }
    if payload.len() != 8 {
        handler.connection_error(ERROR_FRAME_SIZE_ERROR, "PING frame must be 8 bytes".into());
        return;
    }
    let mut p = payload;
    handler.on_ping((flags & FLAG_ACK) != 0, p.get_u64());
}

fn goaway<H: H2FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id != 0 {
        handler.connection_error(ERROR_PROTOCOL_ERROR, "GOAWAY frame on a stream".into());
        return;
    }
    if payload.len() < 8 {
        handler.connection_error(ERROR_FRAME_SIZE_ERROR, "GOAWAY frame too short".into());
        return;
    }
    let mut p = payload;
    let last_stream_id = p.get_u32() & 0x7fff_ffff;
    let error_code = p.get_u32();
    handler.on_goaway(last_stream_id, error_code, p);
}

fn window_update<H: H2FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if payload.len() != 4 {
        handler.connection_error(
            ERROR_FRAME_SIZE_ERROR,
            "WINDOW_UPDATE frame must be 4 bytes".into(),
        );
        return;
    }
    let mut p = payload;
    let increment = p.get_u32() & 0x7fff_ffff;
    if increment == 0 {
        handler.stream_error(
            stream_id,
            ERROR_PROTOCOL_ERROR,
            "WINDOW_UPDATE with zero increment".into(),
        );
        return;
    }
    handler.on_window_update(stream_id, increment);
}

fn continuation<H: H2FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.stream_error(0, ERROR_PROTOCOL_ERROR, "CONTINUATION frame on stream 0".into());
        return;
    }
    handler.on_continuation(stream_id, (flags & FLAG_END_HEADERS) != 0, payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events {
        data: Vec<(u32, bool, Vec<u8>)>,
        headers: Vec<(u32, bool, bool, Vec<u8>)>,
        settings: Vec<(bool, Vec<(u16, u32)>)>,
        pings: Vec<(bool, u64)>,
        goaways: Vec<(u32, u32)>,
        window_updates: Vec<(u32, u32)>,
        rsts: Vec<(u32, u32)>,
        conn_errors: Vec<(u32, String)>,
        stream_errors: Vec<(u32, u32, String)>,
    }

    impl H2FrameHandler for Events {
        fn on_data(&mut self, id: u32, end: bool, data: Bytes) {
            self.data.push((id, end, data.to_vec()));
        }
        fn on_headers(&mut self, id: u32, es: bool, eh: bool, block: Bytes) {
            self.headers.push((id, es, eh, block.to_vec()));
        }
        fn on_priority(&mut self, _: u32, _: u32, _: bool, _: u8) {}
        fn on_rst_stream(&mut self, id: u32, code: u32) {
            self.rsts.push((id, code));
        }
        fn on_settings(&mut self, ack: bool, settings: Vec<(u16, u32)>) {
            self.settings.push((ack, settings));
        }
        fn on_push_promise(&mut self, _: u32, _: u32, _: bool, _: Bytes) {}
        fn on_ping(&mut self, ack: bool, payload: u64) {
            self.pings.push((ack, payload));
        }
        fn on_goaway(&mut self, last: u32, code: u32, _: Bytes) {
            self.goaways.push((last, code));
        }
        fn on_window_update(&mut self, id: u32, inc: u32) {
            self.window_updates.push((id, inc));
        }
        fn on_continuation(&mut self, _: u32, _: bool, _: Bytes) {}
        fn connection_error(&mut self, code: u32, message: String) {
            self.conn_errors.push((code, message));
        }
        fn stream_error(&mut self, id: u32, code: u32, message: String) {
            self.stream_errors.push((id, code, message));
        }
    }

    fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LENGTH + payload.len());
        out.extend_from_slice(&[
            (payload.len() >> 16) as u8,
            (payload.len() >> 8) as u8,
            payload.len() as u8,
            frame_type,
            flags,
        ]);
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_data_with_padding() {
        let mut events = Events::default();
        let mut payload = vec![2u8]; // pad length
        payload.extend_from_slice(b"hello");
        payload.extend_from_slice(&[0, 0]);
        let mut buf = BytesMut::from(&frame(TYPE_DATA, FLAG_PADDED | FLAG_END_STREAM, 1, &payload)[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(events.data, vec![(1, true, b"hello".to_vec())]);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut events = Events::default();
        let wire = frame(TYPE_DATA, 0, 1, b"abcdef");
        let mut buf = BytesMut::from(&wire[..7]);
        let mut parser = H2Parser::new();
        parser.receive(&mut buf, &mut events);
        assert!(events.data.is_empty());
        buf.extend_from_slice(&wire[7..]);
        parser.receive(&mut buf, &mut events);
        assert_eq!(events.data.len(), 1);
    }

    #[test]
    fn settings_payload_must_be_multiple_of_six() {
        let mut events = Events::default();
        let mut buf = BytesMut::from(&frame(TYPE_SETTINGS, 0, 0, &[0, 3, 0, 0])[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(events.conn_errors.len(), 1);
        assert_eq!(events.conn_errors[0].0, ERROR_FRAME_SIZE_ERROR);
    }

    #[test]
    fn settings_parsed_in_order() {
        let mut events = Events::default();
        let payload = [0, 3, 0, 0, 0, 100, 0, 4, 0, 1, 0, 0];
        let mut buf = BytesMut::from(&frame(TYPE_SETTINGS, 0, 0, &payload)[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(
            events.settings,
            vec![(false, vec![(3, 100), (4, 65536)])]
        );
    }

    #[test]
    fn data_on_stream_zero_reports_stream_error_for_escalation() {
        let mut events = Events::default();
        let mut buf = BytesMut::from(&frame(TYPE_DATA, 0, 0, b"x")[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(events.stream_errors[0].0, 0);
    }

    #[test]
    fn window_update_zero_increment_is_stream_error() {
        let mut events = Events::default();
        let mut buf = BytesMut::from(&frame(TYPE_WINDOW_UPDATE, 0, 5, &[0, 0, 0, 0])[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(events.stream_errors[0], (5, ERROR_PROTOCOL_ERROR, "WINDOW_UPDATE with zero increment".into()));
    }

    #[test]
    fn ping_and_goaway() {
        let mut events = Events::default();
        let mut wire = frame(TYPE_PING, FLAG_ACK, 0, &7u64.to_be_bytes());
        wire.extend_from_slice(&frame(TYPE_GOAWAY, 0, 0, &[0, 0, 0, 9, 0, 0, 0, 0]));
        let mut buf = BytesMut::from(&wire[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(events.pings, vec![(true, 7)]);
        assert_eq!(events.goaways, vec![(9, ERROR_NO_ERROR)]);
    }

    #[test]
    fn oversized_frame_is_connection_error() {
        let mut events = Events::default();
        let mut buf = BytesMut::from(&frame(TYPE_DATA, 0, 1, &vec![0u8; 16_385])[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert_eq!(events.conn_errors[0].0, ERROR_FRAME_SIZE_ERROR);
    }

    #[test]
    fn unknown_frame_type_ignored() {
        let mut events = Events::default();
        let mut buf = BytesMut::from(&frame(0x42, 0, 1, b"whatever")[..]);
        H2Parser::new().receive(&mut buf, &mut events);
        assert!(events.conn_errors.is_empty());
        assert!(events.stream_errors.is_empty());
    }
}
