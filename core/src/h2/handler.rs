/*
 * handler.rs
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

//! Callback trait for parsed HTTP/2 frames. The session's reader task is the
//! only implementor outside tests.

use bytes::Bytes;

/// Receives each complete frame, plus validation failures at the two
/// severities the protocol distinguishes. A stream error on stream id 0 is
/// the session's cue to escalate to a connection error.
pub trait H2FrameHandler {
    fn on_data(&mut self, stream_id: u32, end_stream: bool, data: Bytes);
    #[allow(clippy::too_many_arguments)]
    fn on_headers(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        end_headers: bool,
        header_block_fragment: Bytes,
    );
    fn on_priority(&mut self, stream_id: u32, dependency: u32, exclusive: bool, weight: u8);
    fn on_rst_stream(&mut self, stream_id: u32, error_code: u32);
    fn on_settings(&mut self, ack: bool, settings: Vec<(u16, u32)>);
    fn on_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        end_headers: bool,
        header_block_fragment: Bytes,
    );
    fn on_ping(&mut self, ack: bool, payload: u64);
    fn on_goaway(&mut self, last_stream_id: u32, error_code: u32, debug_data: Bytes);
    fn on_window_update(&mut self, stream_id: u32, increment: u32);
    fn on_continuation(&mut self, stream_id: u32, end_headers: bool, header_block_fragment: Bytes);

    /// Unrecoverable framing violation; the connection must die.
    fn connection_error(&mut self, error_code: u32, message: String);
    /// Violation scoped to one stream; the stream should be reset.
    fn stream_error(&mut self, stream_id: u32, error_code: u32, message: String);
}
