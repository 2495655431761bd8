/*
 * stream.rs
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

//! Per-stream state shared between a session's reader task and the exchange
//! that owns the stream. The reader fills buffers and wakes waiters; it
//! never runs application code.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::error::HttpError;
use crate::headers::Headers;
use crate::response::ResponseHead;

use super::frame::{error_to_string, ERROR_CANCEL, ERROR_REFUSED_STREAM, MAX_WINDOW_SIZE};

/// Why a stream died before its clean end.
#[derive(Debug, Clone)]
pub(crate) enum StreamFailure {
    /// Peer sent RST_STREAM with this code.
    Reset(u32),
    /// We canceled it locally.
    LocalCancel,
    /// Stream was cut off by GOAWAY before the server processed it.
    Shutdown,
    /// The whole session failed.
    Connection(String),
}

impl StreamFailure {
    pub(crate) fn to_error(&self) -> HttpError {
        match self {
            StreamFailure::Reset(ERROR_REFUSED_STREAM) => HttpError::connection_shutdown(),
            StreamFailure::Reset(code) => {
                HttpError::protocol(format!("stream reset: {}", error_to_string(*code)))
            }
            StreamFailure::LocalCancel => HttpError::canceled(),
            StreamFailure::Shutdown => HttpError::connection_shutdown(),
            StreamFailure::Connection(msg) => HttpError::protocol(msg.clone()),
        }
    }

    pub(crate) fn is_local_cancel(&self) -> bool {
        matches!(self, StreamFailure::LocalCancel)
    }
}

pub(crate) struct StreamBuf {
    /// Response heads in arrival order: informational 1xx, then the final
    /// head. Trailers do not land here.
    pub heads: VecDeque<ResponseHead>,
    /// Whether the final (non-1xx) head has arrived.
    pub final_head_seen: bool,
    pub data: VecDeque<Bytes>,
    pub trailers: Option<Headers>,
    /// Peer half-closed: no more heads, data, or trailers will arrive.
    pub closed_for_receive: bool,
    /// We sent END_STREAM.
    pub closed_for_send: bool,
    pub failure: Option<StreamFailure>,
    /// Outbound flow-control credit. May go negative after a settings change.
    pub send_window: i64,
    /// Inbound bytes handed to the application but not yet returned to the
    /// peer via WINDOW_UPDATE.
    pub unacked_recv: u64,
}

/// One HTTP/2 stream, client-initiated, odd id.
pub(crate) struct StreamHandle {
    pub id: u32,
    pub buf: Mutex<StreamBuf>,
    /// Woken when heads/data/trailers/failure state changes.
    pub readable: Notify,
    /// Woken when send_window grows or the stream dies.
    pub window: Notify,
}

impl StreamHandle {
    pub fn new(id: u32, initial_send_window: u32) -> Self {
        Self {
            id,
            buf: Mutex::new(StreamBuf {
                heads: VecDeque::new(),
                final_head_seen: false,
                data: VecDeque::new(),
                trailers: None,
                closed_for_receive: false,
                closed_for_send: false,
                failure: None,
                send_window: initial_send_window as i64,
                unacked_recv: 0,
            }),
            readable: Notify::new(),
            window: Notify::new(),
        }
    }

    /// Deliver a decoded head. 1xx heads queue ahead of the final head.
    pub fn push_head(&self, head: ResponseHead, end_stream: bool) {
        let mut buf = self.buf.lock().unwrap();
        if !(100..200).contains(&head.code) {
            buf.final_head_seen = true;
        }
        buf.heads.push_back(head);
        if end_stream {
            buf.closed_for_receive = true;
        }
        drop(buf);
        self.readable.notify_waiters();
    }

    pub fn push_data(&self, data: Bytes, end_stream: bool) {
        let mut buf = self.buf.lock().unwrap();
        if !data.is_empty() {
            buf.data.push_back(data);
        }
        if end_stream {
            buf.closed_for_receive = true;
        }
        drop(buf);
        self.readable.notify_waiters();
    }

    pub fn push_trailers(&self, trailers: Headers, end_stream: bool) {
        let mut buf = self.buf.lock().unwrap();
        buf.trailers = Some(trailers);
        if end_stream {
            buf.closed_for_receive = true;
        }
        drop(buf);
        self.readable.notify_waiters();
    }

    /// Terminal failure: release buffers and wake both wait sides.
    ///
    /// A stream the peer already finished keeps its buffered response: a
    /// late RST, GOAWAY, or session teardown cannot retract data that was
    /// delivered complete. Local cancellation still overrides.
    pub fn fail(&self, failure: StreamFailure) {
        let mut buf = self.buf.lock().unwrap();
        if buf.closed_for_receive
            && buf.failure.is_none()
            && !matches!(failure, StreamFailure::LocalCancel)
        {
            return;
        }
        if buf.failure.is_none() {
            buf.failure = Some(failure);
        }
        buf.data.clear();
        buf.closed_for_receive = true;
        drop(buf);
        self.readable.notify_waiters();
        self.window.notify_waiters();
    }

    /// Grow the send window from a WINDOW_UPDATE or settings delta.
    /// Errors if the window would exceed 2^31-1.
    pub fn grow_send_window(&self, delta: i64) -> Result<(), ()> {
        let mut buf = self.buf.lock().unwrap();
        let next = buf.send_window + delta;
        if next > MAX_WINDOW_SIZE {
            return Err(());
        }
        buf.send_window = next;
        drop(buf);
        self.window.notify_waiters();
        Ok(())
    }

    /// True when both directions are finished or the stream failed.
    pub fn is_terminal(&self) -> bool {
        let buf = self.buf.lock().unwrap();
        buf.failure.is_some() || (buf.closed_for_receive && buf.closed_for_send)
    }

    pub fn failure(&self) -> Option<StreamFailure> {
        self.buf.lock().unwrap().failure.clone()
    }

    pub fn local_cancel_code(&self) -> u32 {
        ERROR_CANCEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Protocol;

    fn head(code: u16) -> ResponseHead {
        ResponseHead {
            protocol: Protocol::H2,
            code,
            reason: None,
            headers: Headers::new(),
        }
    }

    #[test]
    fn informational_heads_queue_before_final() {
        let stream = StreamHandle::new(1, 65_535);
        stream.push_head(head(100), false);
        assert!(!stream.buf.lock().unwrap().final_head_seen);
        stream.push_head(head(200), false);
        let buf = stream.buf.lock().unwrap();
        assert!(buf.final_head_seen);
        assert_eq!(buf.heads.len(), 2);
    }

    #[test]
    fn failure_clears_data_and_is_sticky() {
        let stream = StreamHandle::new(1, 65_535);
        stream.push_data(Bytes::from_static(b"x"), false);
        stream.fail(StreamFailure::Shutdown);
        stream.fail(StreamFailure::Reset(2));
        let buf = stream.buf.lock().unwrap();
        assert!(matches!(buf.failure, Some(StreamFailure::Shutdown)));
        assert!(buf.data.is_empty());
    }

    #[test]
    fn completed_stream_survives_late_failure() {
        let stream = StreamHandle::new(1, 65_535);
        stream.push_data(Bytes::from_static(b"done"), true);
        stream.fail(StreamFailure::Connection("session died".into()));
        let buf = stream.buf.lock().unwrap();
        assert!(buf.failure.is_none());
        assert_eq!(buf.data.len(), 1);
        drop(buf);
        // Cancellation still takes effect.
        stream.fail(StreamFailure::LocalCancel);
        assert!(stream.failure().is_some());
    }

    #[test]
    fn send_window_overflow_detected() {
        let stream = StreamHandle::new(1, 65_535);
        assert!(stream.grow_send_window(MAX_WINDOW_SIZE).is_err());
        assert!(stream.grow_send_window(100).is_ok());
    }

    #[test]
    fn refused_stream_maps_to_retryable_error() {
        assert!(StreamFailure::Reset(ERROR_REFUSED_STREAM)
            .to_error()
            .is_recoverable());
        assert!(!StreamFailure::Reset(0x2).to_error().is_recoverable());
        assert!(StreamFailure::LocalCancel.to_error().is_canceled());
    }
}
